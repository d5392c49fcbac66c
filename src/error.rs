use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error;
use std::fmt;

use crate::db::DatabaseError;
use crate::manager::SetupError;
use crate::migration::MigrationError;
use crate::session::{AccessError, SessionError};

/// The primary error type for the HTTP layer.
///
/// Every library error is mapped into one of these variants so that clients
/// always receive the same JSON envelope.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// For when a request conflicts with the current state of the server.
    Conflict(String),
    ServiceUnavailable(String),
    Database(String),
    Unauthorized(String),
    /// The access guard refused the request.
    AccessDenied(AccessError),
    /// A migration failed. The message says whether the database was restored.
    Migration { code: &'static str, message: String, backup_path: Option<String> },
    /// A setup step failed; the message is passed through unchanged.
    Setup(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::AccessDenied(e) => write!(f, "Access denied: {}", e),
            AppError::Migration { message, .. } => write!(f, "Migration failed: {}", message),
            AppError::Setup(msg) => write!(f, "Setup failed: {}", msg),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::AccessDenied(e) => Some(e),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message, details) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
            AppError::Database(msg) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(error_id = %error_id, "Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(json!({ "details": msg, "error_id": error_id.to_string() })),
                )
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::AccessDenied(e) => {
                let (status, code, address) = match &e {
                    AccessError::ExternalAccess(a) => (StatusCode::FORBIDDEN, "EXTERNAL_ACCESS", a.clone()),
                    AccessError::MalformedAddress { address, .. } => {
                        (StatusCode::BAD_REQUEST, "MALFORMED_ADDRESS", address.clone())
                    }
                };
                (status, code, e.to_string(), Some(json!({ "address": address })))
            }
            AppError::Migration { code, message, backup_path } => {
                tracing::error!("Migration error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    message,
                    backup_path.map(|p| json!({ "backup_path": p })),
                )
            }
            AppError::Setup(msg) => {
                tracing::error!("Setup error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "SETUP_FAILED", msg, None)
            }
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        AppError::AccessDenied(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotOpen => AppError::ServiceUnavailable("database is not open".to_string()),
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut) => {
                AppError::ServiceUnavailable("Database connection pool timed out".to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<MigrationError> for AppError {
    fn from(err: MigrationError) -> Self {
        let code = match &err {
            MigrationError::Backup { .. } => "BACKUP_FAILED",
            MigrationError::RolledBack { .. } => "MIGRATION_ROLLED_BACK",
            MigrationError::RestoreFailed { .. } => "RESTORE_FAILED",
            MigrationError::Database(DatabaseError::NotOpen) => {
                return AppError::ServiceUnavailable("database is not open".to_string());
            }
            MigrationError::Database(_) => "DATABASE_ERROR",
        };
        let backup_path = err.backup_path().map(|p| p.display().to_string());
        AppError::Migration { code, message: err.to_string(), backup_path }
    }
}

impl From<SetupError> for AppError {
    fn from(err: SetupError) -> Self {
        match err {
            SetupError::AlreadyConfigured => AppError::Conflict(err.to_string()),
            other => AppError::Setup(other.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AuthDisabled => AppError::BadRequest(err.to_string()),
            SessionError::InvalidCredentials => AppError::Unauthorized(err.to_string()),
        }
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the HTTP layer.
pub type AppResult<T> = Result<T, AppError>;
