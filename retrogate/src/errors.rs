use crate::api::models::users::Role;
use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Why a sign-in attempt was rejected.
///
/// These carry the precise reason for logging; clients only ever see a generic message so that
/// the response does not reveal whether an account exists.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A required input field was empty or absent
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    /// No account is registered under the submitted email
    #[error("no account for the submitted email")]
    NotFound,

    /// The password did not match (or the account has no password)
    #[error("invalid credential")]
    InvalidCredential,

    /// The account exists but has been deactivated
    #[error("account disabled")]
    AccountDisabled,

    /// The upstream identity provider exchange failed
    #[error("identity provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },
}

impl AuthError {
    pub(crate) fn provider(provider: &str, message: impl Into<String>) -> Self {
        AuthError::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Short machine-readable code used in sign-in page redirects
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingField { .. } => "MissingField",
            AuthError::Provider { .. } => "OAuthCallback",
            AuthError::NotFound | AuthError::InvalidCredential | AuthError::AccountDisabled => "AccessDenied",
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// A sign-in or sign-up attempt failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Authenticated, but the role ranks below what the operation requires
    #[error("Role {actual} is below required role {required}")]
    InsufficientRole { required: Role, actual: Role },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Conflict error, e.g., for unique constraint violations
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Invalid configuration detected at load time
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Auth(AuthError::MissingField { .. }) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientRole { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Config { .. } | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Auth(AuthError::MissingField { field }) => format!("Missing required field: {field}"),
            Error::Auth(_) => "Sign-in failed".to_string(),
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientRole { required, .. } => format!("This action requires the {required} role"),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Conflict { message } => message.clone(),
            Error::Config { .. } | Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, constraint, .. } => match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => "An account with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::Other(_) => "Database error occurred".to_string(),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Config { .. } | Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Auth(_) | Error::Unauthenticated { .. } | Error::InsufficientRole { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::Conflict { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
