use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use oauth2::{AccessToken, RefreshToken, Scope, TokenResponse, TokenType};
use serde::{Deserialize, Serialize};

use crate::PersistCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenEntry {
    scopes: Vec<Scope>,
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    expiration: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum CacheResult {
    None,
    Expired(RefreshToken, Vec<Scope>),
    Ok(AccessToken),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct TokenStore {
    entries: Vec<TokenEntry>,
}

impl TokenStore {
    /// Attempts to read the store from disk.
    /// Returns `Ok(None)` if the file can't be read (e.g. first run).
    /// Returns `Err` if the deserialization failed.
    async fn try_read_from_disk(path: &Utf8Path) -> crate::Result<Option<Self>> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(_) => return Ok(None),
        };
        log::info!("read cached tokens from {path}");
        let entries = serde_json::from_str(&json)?;
        Ok(Some(TokenStore { entries }))
    }

    async fn write_to_disk(&self, path: &Utf8Path) -> crate::Result<()> {
        log::info!("caching tokens to {path}");
        let json = serde_json::to_string_pretty(&self.entries)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    fn insert<T, TT>(&mut self, tok: &T)
    where
        T: TokenResponse<TT>,
        TT: TokenType,
    {
        let scopes = {
            let mut scopes = tok.scopes().cloned().unwrap_or_default();
            scopes.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
            scopes
        };
        let expiration = tok.expires_in().map(|exp| Utc::now() + exp);
        let entry = TokenEntry {
            scopes,
            access_token: tok.access_token().clone(),
            refresh_token: tok.refresh_token().cloned(),
            expiration,
        };
        self.emplace_entry(entry);
    }

    fn emplace_entry(&mut self, token: TokenEntry) {
        for ent in self.entries.iter_mut() {
            if ent.scopes == token.scopes {
                *ent = token;
                return;
            }
        }
        self.entries.push(token);
    }

    fn get(&self, scopes: &[Scope]) -> CacheResult {
        for ent in self.entries.iter() {
            if !scopes.iter().all(|s| ent.scopes.contains(s)) {
                continue;
            }
            // ent covers all required scopes, check expiration.
            // Only a handful of scope combinations exist in practice,
            // so the first entry meeting the requirement wins.
            if let Some(expiration) = ent.expiration {
                if expiration < Utc::now() {
                    if let Some(refresh_token) = &ent.refresh_token {
                        let scopes = ent.scopes.clone();
                        return CacheResult::Expired(refresh_token.clone(), scopes);
                    } else {
                        return CacheResult::None;
                    }
                }
            }
            return CacheResult::Ok(ent.access_token.clone());
        }
        CacheResult::None
    }
}

/// Specifies how the cache should persist tokens
#[derive(Debug, Clone)]
pub enum TokenPersist {
    /// No persistence. A token is fetched for each request.
    None,
    /// Persist in memory only, starting from scratch
    /// each time the program runs.
    Memory,
    /// Load from disk when the program starts, keep in memory while it
    /// runs, save back to disk through [PersistCache].
    MemoryAndDisk(Utf8PathBuf),
}

impl TokenPersist {
    fn try_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::MemoryAndDisk(path) => Some(path),
            _ => None,
        }
    }

    fn has_mem(&self) -> bool {
        match self {
            Self::None => false,
            Self::Memory => true,
            Self::MemoryAndDisk(_) => true,
        }
    }
}

#[derive(Debug)]
pub struct TokenCache {
    persist: TokenPersist,
    store: TokenStore,
}

impl TokenCache {
    pub async fn new(persist: TokenPersist) -> crate::Result<Self> {
        let store = if let Some(path) = persist.try_path() {
            TokenStore::try_read_from_disk(path).await?
        } else {
            None
        };
        let store = store.unwrap_or_default();
        Ok(TokenCache { persist, store })
    }

    pub fn put<T, TT>(&mut self, tok: &T)
    where
        T: TokenResponse<TT>,
        TT: TokenType,
    {
        if !self.persist.has_mem() {
            return;
        }
        log::trace!(
            "put token for scopes {:?}, expires in {:?}",
            tok.scopes(),
            tok.expires_in()
        );
        self.store.insert(tok);
    }

    pub fn check(&self, scopes: &[Scope]) -> CacheResult {
        if !self.persist.has_mem() {
            return CacheResult::None;
        }
        self.store.get(scopes)
    }
}

impl PersistCache for TokenCache {
    async fn persist_cache(&self) -> crate::Result<()> {
        if let Some(path) = self.persist.try_path() {
            self.store.write_to_disk(path).await?;
        }
        Ok(())
    }
}
