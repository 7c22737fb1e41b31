use std::sync::Arc;

use camino::Utf8Path;
use futures::prelude::*;
use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, TokenResponse,
    TokenUrl,
};
pub use oauth2::{AccessToken, RefreshToken, Scope};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

mod pkce;
mod server;
mod token_cache;

pub use self::token_cache::{CacheResult, TokenCache, TokenPersist};
use crate::PersistCache;

/// OAuth2 application secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
    pub auth_url: AuthUrl,
    pub token_url: TokenUrl,
}

/// Loads an application secret from a `client_secret.json` file such as
/// downloaded from the Google API console.
/// Both `installed` and `web` secret kinds are accepted.
pub async fn load_secret(path: &Utf8Path) -> anyhow::Result<Secret> {
    let json = tokio::fs::read(path).await?;
    let goog: GoogleAppSecret = serde_json::from_slice(&json)?;
    let secret = match goog {
        GoogleAppSecret::Installed(secret) => secret,
        GoogleAppSecret::Web(secret) => secret,
    };
    Ok(Secret {
        client_id: ClientId::new(secret.client_id),
        client_secret: ClientSecret::new(secret.client_secret),
        auth_url: AuthUrl::new(secret.auth_uri)?,
        token_url: TokenUrl::new(secret.token_uri)?,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GoogleSecret {
    client_id: String,
    client_secret: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    redirect_uris: Vec<String>,
    auth_uri: String,
    token_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_provider_x509_cert_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_x509_cert_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GoogleAppSecret {
    Installed(GoogleSecret),
    Web(GoogleSecret),
}

/// Something that can provide an access token for a set of scopes.
pub trait GetToken: Send + Sync + 'static {
    fn get_token(
        &self,
        scopes: Vec<Scope>,
    ) -> impl Future<Output = crate::Result<AccessToken>> + Send;
}

#[derive(Debug)]
struct Inner {
    cache: RwLock<TokenCache>,
    http: reqwest::Client,
    oauth2: BasicClient,
}

/// OAuth2 client managing the token lifecycle: tokens are served from the
/// cache, refreshed with the refresh grant when expired, or obtained
/// interactively with the installed-app PKCE flow.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub async fn new(
        secret: Secret,
        persist: TokenPersist,
        http: Option<reqwest::Client>,
    ) -> crate::Result<Self> {
        let cache = TokenCache::new(persist).await?;
        let cache = RwLock::new(cache);
        let oauth2 = BasicClient::new(
            secret.client_id,
            Some(secret.client_secret),
            secret.auth_url,
            Some(secret.token_url),
        );
        let http = http.unwrap_or_default();

        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                http,
                oauth2,
            }),
        })
    }

    async fn refresh_token(
        &self,
        refresh_token: RefreshToken,
        scopes: Vec<Scope>,
    ) -> crate::Result<AccessToken> {
        log::info!("refreshing access token");
        let token_response = self
            .inner
            .oauth2
            .exchange_refresh_token(&refresh_token)
            .add_scopes(scopes)
            .request_async(|req| async { self.http(req).await })
            .await
            .map_err(|err| crate::auth_error!("{err}"))?;

        let access = token_response.access_token().to_owned();

        let mut cache = self.inner.cache.write().await;
        cache.put(&token_response);

        Ok(access)
    }

    async fn http(&self, req: HttpRequest) -> reqwest::Result<HttpResponse> {
        let method = req.method.clone();
        let url = req.url.clone();

        let resp = self
            .inner
            .http
            .request(req.method, req.url)
            .headers(req.headers)
            .body(req.body)
            .send()
            .await?;

        let status_code = resp.status();
        let headers = resp.headers().to_owned();
        let body = resp.bytes().await?.to_vec();

        if !status_code.is_success() {
            log::warn!("{method} {url} returned {status_code}");
            if let Ok(body) = std::str::from_utf8(&body) {
                log::warn!("{body}");
            }
        }

        Ok(HttpResponse {
            status_code,
            headers,
            body,
        })
    }
}

impl GetToken for Client {
    async fn get_token(&self, scopes: Vec<Scope>) -> crate::Result<AccessToken> {
        let cache = self.inner.cache.read().await.check(&scopes);
        match cache {
            CacheResult::Ok(access_token) => Ok(access_token),
            CacheResult::Expired(refresh_token, scopes) => {
                self.refresh_token(refresh_token, scopes).await
            }
            CacheResult::None => {
                let resp = self.fetch_token_pkce(scopes).await?;
                let mut cache = self.inner.cache.write().await;
                cache.put(&resp);
                Ok(resp.access_token().clone())
            }
        }
    }
}

impl PersistCache for Client {
    async fn persist_cache(&self) -> crate::Result<()> {
        self.inner.cache.read().await.persist_cache().await
    }
}

#[cfg(test)]
mod tests {
    use super::{GoogleAppSecret, GoogleSecret};

    #[test]
    fn google_secret_serialization() -> anyhow::Result<()> {
        let secret = GoogleAppSecret::Installed(GoogleSecret {
            client_id: "client id".to_string(),
            client_secret: "client secret".to_string(),
            redirect_uris: vec!["redirect uri".to_string()],
            auth_uri: "auth uri".to_string(),
            token_uri: "token uri".to_string(),
            client_email: None,
            auth_provider_x509_cert_url: None,
            client_x509_cert_url: None,
        });
        let json = serde_json::to_string_pretty(&secret)?;
        const EXPECTED: &str = r#"{
  "installed": {
    "client_id": "client id",
    "client_secret": "client secret",
    "redirect_uris": [
      "redirect uri"
    ],
    "auth_uri": "auth uri",
    "token_uri": "token uri"
  }
}"#;
        assert_eq!(json, EXPECTED);
        Ok(())
    }

    #[test]
    fn web_secret_accepted() -> anyhow::Result<()> {
        let json = r#"{
            "web": {
                "client_id": "id",
                "client_secret": "secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;
        let goog: GoogleAppSecret = serde_json::from_str(json)?;
        assert!(matches!(goog, GoogleAppSecret::Web(_)));
        Ok(())
    }
}
