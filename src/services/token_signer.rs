//! RS256 signing of the tokens this service issues itself.

use std::{fs, path::Path, time::Duration};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Invite JWTs stay valid for a year unless the check id moves first.
pub const INVITE_TTL: time::Duration = time::Duration::days(365);

/// Key loading and signing failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to read key file `{path}`")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid RSA key material")]
    Key(#[source] jsonwebtoken::errors::Error),
    #[error("failed to sign token")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("invalid token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("token does not match this pool")]
    Mismatch,
}

/// Claims of a guest credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestClaims {
    pub aud: String,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims of a pool invite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteClaims {
    pub aud: String,
    pub iss: String,
    /// Pool token the invite admits to.
    pub sub: String,
    /// Pool check id at issue time.
    pub chid: i32,
    pub iat: i64,
    pub exp: i64,
}

/// Signed guest credential.
#[derive(Debug, Clone)]
pub struct SignedGuest {
    pub jwt: String,
    pub expires_at: OffsetDateTime,
}

/// Holds the service key pair and the audiences it signs for.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    invite_audience: String,
}

impl TokenSigner {
    /// Build a signer from PEM encoded RSA keys.
    pub fn from_pem(
        private_pem: &[u8],
        public_pem: &[u8],
        issuer: impl Into<String>,
        audience: impl Into<String>,
        invite_audience: impl Into<String>,
    ) -> Result<Self, TokenError> {
        Ok(Self {
            encoding: EncodingKey::from_rsa_pem(private_pem).map_err(TokenError::Key)?,
            decoding: DecodingKey::from_rsa_pem(public_pem).map_err(TokenError::Key)?,
            issuer: issuer.into(),
            audience: audience.into(),
            invite_audience: invite_audience.into(),
        })
    }

    /// Read both PEM files from disk.
    pub fn from_files(
        private_path: &Path,
        public_path: &Path,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        invite_audience: impl Into<String>,
    ) -> Result<Self, TokenError> {
        let read = |path: &Path| {
            fs::read(path).map_err(|source| TokenError::Io {
                path: path.display().to_string(),
                source,
            })
        };
        Self::from_pem(
            &read(private_path)?,
            &read(public_path)?,
            issuer,
            audience,
            invite_audience,
        )
    }

    /// `iss` claim of every token this signer issues.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Public half of the key pair, used to verify guest credentials.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Sign a guest credential for `subject` valid for `ttl`.
    pub fn sign_guest(
        &self,
        subject: &str,
        now: OffsetDateTime,
        ttl: Duration,
    ) -> Result<SignedGuest, TokenError> {
        let expires_at = now + ttl;
        let claims = GuestClaims {
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
            sub: subject.to_owned(),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };
        let jwt = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding)
            .map_err(TokenError::Sign)?;
        Ok(SignedGuest { jwt, expires_at })
    }

    /// Sign an invite JWT for `pool_token` bound to `check_id`.
    pub fn sign_invite(
        &self,
        pool_token: &str,
        check_id: i32,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let claims = InviteClaims {
            aud: self.invite_audience.clone(),
            iss: self.issuer.clone(),
            sub: pool_token.to_owned(),
            chid: check_id,
            iat: now.unix_timestamp(),
            exp: (now + INVITE_TTL).unix_timestamp(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding).map_err(TokenError::Sign)
    }

    /// Check an invite JWT against the pool it is presented to.
    pub fn verify_invite(
        &self,
        jwt: &str,
        pool_token: &str,
        check_id: i32,
    ) -> Result<InviteClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.invite_audience]);
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<InviteClaims>(jwt, &self.decoding, &validation)
            .map_err(TokenError::Invalid)?
            .claims;
        if claims.sub != pool_token || claims.chid != check_id {
            return Err(TokenError::Mismatch);
        }
        Ok(claims)
    }
}
