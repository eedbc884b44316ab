//! Bearer credential validation and user resolution.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    dao::{
        models::{IdentityKind, UserEntity},
        storage::StorageError,
        store::Store,
    },
    error::ServiceError,
    services::key_locker::{KeyLocker, KeyLockerError},
};

/// Reasons a bearer token is refused.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("malformed token")]
    Malformed,
    #[error("token audience is not accepted")]
    Audience,
    #[error("token issuer `{0}` is not accepted")]
    Issuer(String),
    #[error("token is missing a key id")]
    MissingKeyId,
    #[error(transparent)]
    Key(#[from] KeyLockerError),
    #[error("token verification failed")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("guest account has expired")]
    GuestExpired,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<CredentialError> for ServiceError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Storage(source) => ServiceError::Unavailable(source),
            CredentialError::GuestExpired => {
                ServiceError::Unauthenticated("guest account has expired".into())
            }
            other => {
                debug!(error = %other, "rejected credential");
                ServiceError::Unauthenticated("invalid token".into())
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(value) => value == expected,
            Audience::Many(values) => values.iter().any(|value| value == expected),
        }
    }
}

/// Claims read before the signature is checked, only to pick a key.
#[derive(Deserialize)]
struct Unverified {
    iss: Option<String>,
    aud: Option<Audience>,
}

#[derive(Deserialize)]
struct Verified {
    sub: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Validates bearer tokens from the external identity provider and from this service.
pub struct CredentialValidator {
    keys: KeyLocker,
    local_key: DecodingKey,
    audience: String,
    self_issuer: String,
    external_issuer: Option<String>,
    email_claim: String,
}

impl CredentialValidator {
    /// Without an `external_issuer` only tokens signed by this service are accepted.
    pub fn new(
        keys: KeyLocker,
        local_key: DecodingKey,
        audience: impl Into<String>,
        self_issuer: impl Into<String>,
        external_issuer: Option<String>,
        email_claim: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            local_key,
            audience: audience.into(),
            self_issuer: self_issuer.into(),
            external_issuer,
            email_claim: email_claim.into(),
        }
    }

    /// Verify `token` and resolve the user it belongs to, inserting it on first sight.
    pub async fn authenticate(
        &self,
        store: &dyn Store,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<UserEntity, CredentialError> {
        let unverified = peek_claims(token)?;
        if !unverified
            .aud
            .as_ref()
            .is_some_and(|aud| aud.contains(&self.audience))
        {
            return Err(CredentialError::Audience);
        }
        let issuer = unverified.iss.unwrap_or_default();

        let (kind, key) = if issuer == self.self_issuer {
            (IdentityKind::Guest, self.local_key.clone())
        } else if self.external_issuer.as_deref() == Some(issuer.as_str()) {
            let header = decode_header(token).map_err(|_| CredentialError::Malformed)?;
            let kid = header.kid.ok_or(CredentialError::MissingKeyId)?;
            (IdentityKind::External, self.keys.key(&kid).await?)
        } else {
            return Err(CredentialError::Issuer(issuer));
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&issuer]);
        let claims = decode::<Verified>(token, &key, &validation)
            .map_err(CredentialError::Invalid)?
            .claims;

        if kind == IdentityKind::Guest {
            let expires = store.guest_expiry(claims.sub.clone()).await?;
            if !expires.is_some_and(|expires| expires > now) {
                return Err(CredentialError::GuestExpired);
            }
        }

        let mut user = store.ensure_user(kind, claims.sub).await?;

        if kind == IdentityKind::External {
            let email = claims
                .extra
                .get(&self.email_claim)
                .and_then(Value::as_str)
                .filter(|email| !email.is_empty());
            if let Some(email) = email {
                if user.email.as_deref() != Some(email) {
                    match store.set_user_email(user.id, email.to_owned()).await {
                        Ok(()) => user.email = Some(email.to_owned()),
                        Err(err) => {
                            warn!(error = %err, user = user.id, "could not store user email")
                        }
                    }
                }
            }
        }

        Ok(user)
    }
}

fn peek_claims(token: &str) -> Result<Unverified, CredentialError> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CredentialError::Malformed);
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| CredentialError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| CredentialError::Malformed)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;
    use crate::{
        dao::{memory::MemoryStore, store::UserStore},
        services::token_signer::tests::signer,
    };

    const IDP_PRIVATE: &[u8] = include_bytes!("../../tests/fixtures/idp_private.pem");
    const IDP_PUBLIC: &[u8] = include_bytes!("../../tests/fixtures/idp_public.pem");
    const IDP_ISSUER: &str = "https://tenant.auth0.com/";

    fn validator() -> CredentialValidator {
        let keys = KeyLocker::new(None);
        keys.insert("idp-key", DecodingKey::from_rsa_pem(IDP_PUBLIC).unwrap());
        CredentialValidator::new(
            keys,
            signer().decoding_key().clone(),
            "api.sqmgr.com",
            "https://api.sqmgr.com/",
            Some(IDP_ISSUER.into()),
            "https://sqmgr.com/email",
        )
    }

    fn validator_without_external_issuer() -> CredentialValidator {
        let keys = KeyLocker::new(None);
        keys.insert("idp-key", DecodingKey::from_rsa_pem(IDP_PUBLIC).unwrap());
        CredentialValidator::new(
            keys,
            signer().decoding_key().clone(),
            "api.sqmgr.com",
            "https://api.sqmgr.com/",
            None,
            "https://sqmgr.com/email",
        )
    }

    fn external_token(claims: Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("idp-key".into());
        encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_pem(IDP_PRIVATE).unwrap(),
        )
        .unwrap()
    }

    fn far_future() -> i64 {
        (OffsetDateTime::now_utc() + Duration::from_secs(3600)).unix_timestamp()
    }

    #[tokio::test]
    async fn external_tokens_resolve_and_record_email() {
        let store = MemoryStore::new();
        let token = external_token(json!({
            "iss": IDP_ISSUER,
            "aud": ["api.sqmgr.com", "https://tenant.auth0.com/userinfo"],
            "sub": "auth0|42",
            "exp": far_future(),
            "https://sqmgr.com/email": "someone@example.com",
        }));

        let user = validator()
            .authenticate(&store, &token, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(user.kind, IdentityKind::External);
        assert_eq!(user.subject, "auth0|42");
        assert_eq!(user.email.as_deref(), Some("someone@example.com"));

        let stored = store.user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.email.as_deref(), Some("someone@example.com"));
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let store = MemoryStore::new();
        let token = external_token(json!({
            "iss": IDP_ISSUER,
            "aud": "someone-else",
            "sub": "auth0|42",
            "exp": far_future(),
        }));
        assert!(matches!(
            validator()
                .authenticate(&store, &token, OffsetDateTime::now_utc())
                .await,
            Err(CredentialError::Audience)
        ));
    }

    #[tokio::test]
    async fn unknown_issuer_is_rejected() {
        let store = MemoryStore::new();
        let token = external_token(json!({
            "iss": "https://evil.example/",
            "aud": "api.sqmgr.com",
            "sub": "auth0|42",
            "exp": far_future(),
        }));
        assert!(matches!(
            validator()
                .authenticate(&store, &token, OffsetDateTime::now_utc())
                .await,
            Err(CredentialError::Issuer(_))
        ));
    }

    #[tokio::test]
    async fn self_issued_claims_signed_by_another_key_fail() {
        let store = MemoryStore::new();
        let token = external_token(json!({
            "iss": "https://api.sqmgr.com/",
            "aud": "api.sqmgr.com",
            "sub": "guest|forged",
            "exp": far_future(),
        }));
        assert!(matches!(
            validator()
                .authenticate(&store, &token, OffsetDateTime::now_utc())
                .await,
            Err(CredentialError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn guests_are_checked_against_their_expiry() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        let signed = signer()
            .sign_guest("guest|abc", now, Duration::from_secs(3600))
            .unwrap();

        let validator = validator();
        assert!(matches!(
            validator.authenticate(&store, &signed.jwt, now).await,
            Err(CredentialError::GuestExpired)
        ));

        store
            .create_guest("guest|abc".into(), signed.expires_at, None)
            .await
            .unwrap();
        let user = validator.authenticate(&store, &signed.jwt, now).await.unwrap();
        assert_eq!(user.kind, IdentityKind::Guest);

        let later = now + Duration::from_secs(7200);
        assert!(matches!(
            validator.authenticate(&store, &signed.jwt, later).await,
            Err(CredentialError::GuestExpired)
        ));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let store = MemoryStore::new();
        assert!(matches!(
            validator()
                .authenticate(&store, "not-a-jwt", OffsetDateTime::now_utc())
                .await,
            Err(CredentialError::Malformed)
        ));
    }

    #[tokio::test]
    async fn external_tokens_need_a_configured_issuer() {
        let store = MemoryStore::new();
        let token = external_token(json!({
            "iss": IDP_ISSUER,
            "aud": "api.sqmgr.com",
            "sub": "auth0|42",
            "exp": far_future(),
        }));

        let err = validator_without_external_issuer()
            .authenticate(&store, &token, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Issuer(issuer) if issuer == IDP_ISSUER));
        assert!(store.user_by_id(1).await.unwrap().is_none());
    }
}
