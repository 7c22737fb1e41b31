use std::net::SocketAddr;

use chrono::Utc;
use oauth2::{
    basic::BasicTokenResponse, AuthorizationCode, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope,
};
use tokio::{io, net};

use super::{server, Client};

impl Client {
    /// Interactive installed-app flow: a localhost server is bound on an
    /// ephemeral port, the system browser is opened on the authorization URL
    /// and the authorization code is exchanged for a token with PKCE.
    pub(super) async fn fetch_token_pkce(
        &self,
        scopes: Vec<Scope>,
    ) -> crate::Result<BasicTokenResponse> {
        log::info!("starting PKCE flow for scopes {scopes:?}");

        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let listener = net::TcpListener::bind(&addr).await?;
        let redirect_addr = listener.local_addr()?;

        let redirect_url = RedirectUrl::new(format!("http://{redirect_addr}"))
            .map_err(|err| crate::auth_error!("invalid redirect URL: {err}"))?;
        let redirect_url = std::borrow::Cow::Borrowed(&redirect_url);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_state) = self
            .inner
            .oauth2
            .authorize_url(CsrfToken::new_random)
            .set_redirect_uri(redirect_url.clone())
            .add_scopes(scopes)
            .set_pkce_challenge(pkce_challenge)
            .url();

        log::info!("opening browser to {auth_url}");
        tokio::task::spawn_blocking(move || webbrowser::open(auth_url.as_str()));

        log::trace!("waiting for the redirect on {redirect_addr}");
        let (socket, addr) = listener.accept().await?;

        log::trace!("incoming request from {addr:?}");
        let (reader, writer) = io::split(socket);
        let reader = io::BufReader::new(reader);
        let writer = io::BufWriter::new(writer);
        let req = server::parse_request(reader)
            .await
            .map_err(|err| crate::auth_error!("{err}"))?;
        let query = server::QueryMap::parse(req.uri().query());

        let code = query
            .get("code")
            .map(str::to_string)
            .map(AuthorizationCode::new)
            .ok_or_else(|| {
                crate::auth_error!(
                    "'code' was not returned by {}",
                    self.inner.oauth2.auth_url().as_str()
                )
            })?;
        let state = query
            .get("state")
            .map(str::to_string)
            .map(CsrfToken::new)
            .ok_or_else(|| {
                crate::auth_error!(
                    "'state' was not returned by {}",
                    self.inner.oauth2.auth_url().as_str()
                )
            })?;

        if state.secret() != csrf_state.secret() {
            log::error!("failed CSRF verification");
            let resp = http::Response::builder()
                .status(401)
                .header("Date", Utc::now().to_rfc2822())
                .header("Connection", "close")
                .body("Could not verify the CSRF token :-(")
                .expect("Response should be correctly built");
            let _ = server::write_response(resp, writer).await;
            crate::auth_bail!("Could not verify the CSRF token");
        }

        log::trace!("exchanging code for token");

        let token_response = self
            .inner
            .oauth2
            .exchange_code(code)
            .set_pkce_verifier(pkce_verifier)
            .set_redirect_uri(redirect_url)
            .request_async(|req| async { self.http(req).await })
            .await
            .map_err(|err| crate::auth_error!("{err}"))?;

        let resp = http::Response::builder()
            .status(200)
            .header("Date", Utc::now().to_rfc2822())
            .header("Connection", "close")
            .body("All good, you can close this window ;-)")
            .expect("Response should be correctly built");
        server::write_response(resp, writer)
            .await
            .map_err(|err| crate::auth_error!("{err}"))?;

        Ok(token_response)
    }
}
