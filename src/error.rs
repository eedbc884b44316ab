use std::{
    collections::BTreeMap,
    error::Error as StdError,
    io::{self, ErrorKind},
};

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{grid::GridRuleError, squares::SquareCommandError},
};

/// Message attached to every request-level validation failure.
pub const VALIDATION_MESSAGE: &str = "There were one or more errors with your request";

/// Field name to messages, as rendered under `validationErrors`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend failed.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Missing, malformed, or expired credentials.
    #[error("{0}")]
    Unauthenticated(String),
    /// Credentials are required and must be supplied with HTTP basic auth.
    #[error("{0}")]
    CredentialsRequired(String),
    /// Caller is authenticated but lacks the required role.
    #[error("{0}")]
    Forbidden(String),
    /// Requested resource was not found.
    #[error("{0}")]
    NotFound(String),
    /// Invalid input provided by the client.
    #[error("{0}")]
    InvalidInput(String),
    /// Field-level validation failures.
    #[error("{message}")]
    Validation {
        /// Top-level message.
        message: String,
        /// Messages keyed by camelCase field name.
        errors: FieldErrors,
    },
    /// Operation is not allowed in the current resource state.
    #[error("{0}")]
    Conflict(String),
    /// Unexpected failure that must not leak to clients.
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Single-field validation failure.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_owned(), vec![message.into()]);
        ServiceError::Validation {
            message: VALIDATION_MESSAGE.to_owned(),
            errors,
        }
    }

    /// Validation failure with a custom top-level message.
    pub fn validation(message: impl Into<String>, errors: &ValidationErrors) -> Self {
        ServiceError::Validation {
            message: message.into(),
            errors: field_errors(errors),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::validation(VALIDATION_MESSAGE, &err)
    }
}

impl From<SquareCommandError> for ServiceError {
    fn from(err: SquareCommandError) -> Self {
        match err {
            SquareCommandError::SquareNotFound(_) => ServiceError::NotFound("square not found".into()),
            SquareCommandError::SameName => ServiceError::field("claimant", err.to_string()),
            SquareCommandError::RenameForbidden | SquareCommandError::Forbidden => {
                ServiceError::Forbidden(err.to_string())
            }
            other => ServiceError::Conflict(other.to_string()),
        }
    }
}

impl From<GridRuleError> for ServiceError {
    fn from(err: GridRuleError) -> Self {
        match err {
            GridRuleError::InvalidNumbers => ServiceError::InvalidInput(err.to_string()),
            other => ServiceError::Conflict(other.to_string()),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// 400 with a plain message.
    #[error("{0}")]
    BadRequest(String),
    /// 400 with per-field messages under `validationErrors`.
    #[error("{message}")]
    Validation {
        /// Top-level message.
        message: String,
        /// Messages keyed by camelCase field name.
        errors: FieldErrors,
    },
    /// 401 for missing or rejected credentials.
    #[error("{0}")]
    Unauthorized(String),
    /// 401 carrying a `WWW-Authenticate: Basic` challenge.
    #[error("{message}")]
    Challenge {
        /// Realm advertised in the challenge.
        realm: &'static str,
        /// Error message.
        message: String,
    },
    /// 403.
    #[error("{0}")]
    Forbidden(String),
    /// 404.
    #[error("{0}")]
    NotFound(String),
    /// Masked in the response body, logged server side.
    #[error("internal error: {0}")]
    Internal(Box<dyn StdError + Send + Sync>),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::Internal(Box::new(source)),
            ServiceError::Unauthenticated(message) => AppError::Unauthorized(message),
            ServiceError::CredentialsRequired(message) => AppError::Challenge {
                realm: "Pool Access",
                message,
            },
            ServiceError::Forbidden(message) => AppError::Forbidden(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::InvalidInput(message) | ServiceError::Conflict(message) => {
                AppError::BadRequest(message)
            }
            ServiceError::Validation { message, errors } => {
                AppError::Validation { message, errors }
            }
            ServiceError::Internal(message) => AppError::Internal(message.into()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::from(err).into()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::Challenge { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Unauthorized(_) | AppError::Challenge { .. } => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// JSON body shared by every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status: &'static str,
    code: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation_errors: Option<FieldErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, validation_errors, challenge) = match self {
            AppError::Internal(source) => {
                if is_client_cancellation(source.as_ref()) {
                    debug!(error = %source, "request cancelled by client");
                } else {
                    error!(error = %source, "request failed");
                }
                let text = status.canonical_reason().unwrap_or("Internal Server Error");
                (text.to_owned(), None, None)
            }
            AppError::Validation { message, errors } => (message, Some(errors), None),
            AppError::Challenge { realm, message } => (message, None, Some(realm)),
            other => (other.to_string(), None, None),
        };

        let body = Json(ErrorBody {
            status: "error",
            code,
            error: message,
            validation_errors,
        });

        let mut response = (status, body).into_response();
        if let Some(realm) = challenge {
            if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

/// Flatten [`ValidationErrors`] into camelCase field keys.
pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    let mut fields = FieldErrors::new();
    for (field, failures) in errors.field_errors() {
        let messages = failures
            .iter()
            .map(|failure| {
                failure
                    .message
                    .as_ref()
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| failure.code.to_string())
            })
            .collect();
        fields.insert(camel_case(&field), messages);
    }
    fields
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Whether the error chain bottoms out in the peer hanging up.
pub fn is_client_cancellation(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(cause) = current {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        current = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};

    async fn body_json(response: Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn conflict_surfaces_as_bad_request_with_message() {
        let response =
            AppError::from(ServiceError::Conflict("the numbers have already been drawn".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({
                "status": "error",
                "code": "BAD_REQUEST",
                "error": "the numbers have already been drawn"
            })
        );
    }

    #[tokio::test]
    async fn internal_errors_are_masked() {
        let response =
            AppError::from(ServiceError::Internal("db password leaked".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal Server Error");
        assert_eq!(body["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn validation_errors_are_keyed_by_field() {
        let response =
            AppError::from(ServiceError::field("claimant", "must be a different name"))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"], VALIDATION_MESSAGE);
        assert_eq!(
            body["validationErrors"],
            json!({ "claimant": ["must be a different name"] })
        );
    }

    #[test]
    fn challenge_carries_basic_realm() {
        let response = AppError::from(ServiceError::CredentialsRequired(
            "authentication required".into(),
        ))
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Pool Access\""
        );
    }

    #[test]
    fn cancellation_is_detected_through_the_source_chain() {
        let reset = io::Error::new(ErrorKind::ConnectionReset, "peer reset");
        let wrapped = StorageError::unavailable("loading squares".into(), reset);
        assert!(is_client_cancellation(&wrapped));

        let refused = io::Error::new(ErrorKind::ConnectionRefused, "refused");
        assert!(!is_client_cancellation(&refused));
    }

    #[test]
    fn snake_case_fields_become_camel_case() {
        assert_eq!(camel_case("home_team_color1"), "homeTeamColor1");
        assert_eq!(camel_case("claimant"), "claimant");
    }
}
