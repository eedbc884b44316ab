//! Lookup of user profile data held by the external identity provider.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::DirectoryConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Management tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Failures talking to the identity provider's management API.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("identity directory request failed")]
    Http(#[from] reqwest::Error),
    #[error("invalid identity directory url: {0}")]
    Url(String),
}

/// Source of the email address of an externally managed user.
pub trait IdentityDirectory: Send + Sync {
    /// Email of `subject`, or `None` when the directory does not know the user.
    fn email_for(&self, subject: String) -> BoxFuture<'_, Result<Option<String>, DirectoryError>>;
}

/// Directory used when no management credentials are configured.
pub struct NoDirectory;

impl IdentityDirectory for NoDirectory {
    fn email_for(&self, _subject: String) -> BoxFuture<'_, Result<Option<String>, DirectoryError>> {
        Box::pin(async { Ok(None) })
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    audience: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct UserProfile {
    email: Option<String>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Auth0 management API client using the client-credentials grant.
pub struct Auth0Directory {
    client: Client,
    domain: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl Auth0Directory {
    /// Build a client when every credential is configured.
    pub fn from_config(config: &DirectoryConfig) -> Option<Self> {
        let (Some(domain), Some(client_id), Some(client_secret)) = (
            config.domain.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
        ) else {
            return None;
        };
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Some(Self {
            client,
            domain,
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    async fn management_token(&self) -> Result<String, DirectoryError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.refresh_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        debug!(domain = %self.domain, "requesting management token");
        let response: TokenResponse = self
            .client
            .post(format!("https://{}/oauth/token", self.domain))
            .json(&TokenRequest {
                grant_type: "client_credentials",
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                audience: format!("https://{}/api/v2/", self.domain),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    async fn lookup_email(&self, subject: String) -> Result<Option<String>, DirectoryError> {
        let token = self.management_token().await?;
        let mut url = Url::parse(&format!("https://{}/api/v2/users", self.domain))
            .map_err(|err| DirectoryError::Url(err.to_string()))?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(&subject);
        }

        let response = self.client.get(url).bearer_auth(token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let profile: UserProfile = response.error_for_status()?.json().await?;
        Ok(profile.email.filter(|email| !email.is_empty()))
    }
}

impl IdentityDirectory for Auth0Directory {
    fn email_for(&self, subject: String) -> BoxFuture<'_, Result<Option<String>, DirectoryError>> {
        Box::pin(self.lookup_email(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_requires_every_credential() {
        let partial = DirectoryConfig {
            domain: Some("example.auth0.com".into()),
            client_id: Some("id".into()),
            client_secret: None,
        };
        assert!(Auth0Directory::from_config(&partial).is_none());

        let complete = DirectoryConfig {
            client_secret: Some("secret".into()),
            ..partial
        };
        assert!(Auth0Directory::from_config(&complete).is_some());
    }

    #[tokio::test]
    async fn disabled_directory_knows_nobody() {
        assert_eq!(NoDirectory.email_for("auth0|1".into()).await.unwrap(), None);
    }
}
