//! Cached resolution of the external identity provider's signing keys.

use std::time::Duration;

use dashmap::DashMap;
use jsonwebtoken::{DecodingKey, jwk::JwkSet};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Failures resolving a signing key.
#[derive(Debug, Error)]
pub enum KeyLockerError {
    /// A key was missing and there is no endpoint to fetch it from.
    #[error("no JWKS endpoint configured")]
    NotConfigured,
    #[error("failed to fetch JWKS")]
    Fetch(#[from] reqwest::Error),
    /// The fetched key set does not contain the requested id.
    #[error("signing key `{0}` not found")]
    UnknownKey(String),
    #[error("unusable signing key `{kid}`")]
    InvalidKey {
        kid: String,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

/// Keys by `kid`, refreshed from the JWKS endpoint whenever an unknown id shows up.
pub struct KeyLocker {
    jwks_url: Option<String>,
    client: Client,
    keys: DashMap<String, DecodingKey>,
    refresh: Mutex<()>,
}

impl KeyLocker {
    /// Empty cache. Without a `jwks_url` only inserted keys resolve.
    pub fn new(jwks_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            jwks_url,
            client,
            keys: DashMap::new(),
            refresh: Mutex::new(()),
        }
    }

    /// Install a key directly, bypassing the JWKS endpoint.
    pub fn insert(&self, kid: impl Into<String>, key: DecodingKey) {
        self.keys.insert(kid.into(), key);
    }

    /// Key for `kid`, fetching the key set once on a cache miss.
    pub async fn key(&self, kid: &str) -> Result<DecodingKey, KeyLockerError> {
        if let Some(key) = self.keys.get(kid) {
            return Ok(key.clone());
        }

        let _guard = self.refresh.lock().await;
        // Another request may have refreshed while we waited.
        if let Some(key) = self.keys.get(kid) {
            return Ok(key.clone());
        }

        self.refresh_keys().await?;
        self.keys
            .get(kid)
            .map(|key| key.clone())
            .ok_or_else(|| KeyLockerError::UnknownKey(kid.to_owned()))
    }

    async fn refresh_keys(&self) -> Result<(), KeyLockerError> {
        let url = self.jwks_url.as_deref().ok_or(KeyLockerError::NotConfigured)?;
        debug!(%url, "fetching JWKS");
        let set: JwkSet = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            let key = DecodingKey::from_jwk(jwk).map_err(|source| KeyLockerError::InvalidKey {
                kid: kid.clone(),
                source,
            })?;
            self.keys.insert(kid, key);
        }
        info!(count = set.keys.len(), "refreshed signing keys");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDP_PUBLIC: &[u8] = include_bytes!("../../tests/fixtures/idp_public.pem");

    #[tokio::test]
    async fn installed_keys_are_served_from_cache() {
        let locker = KeyLocker::new(None);
        locker.insert("kid-1", DecodingKey::from_rsa_pem(IDP_PUBLIC).unwrap());
        assert!(locker.key("kid-1").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_key_without_endpoint_fails() {
        let locker = KeyLocker::new(None);
        assert!(matches!(
            locker.key("missing").await,
            Err(KeyLockerError::NotConfigured)
        ));
    }
}
