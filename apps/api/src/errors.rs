use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::anki_connect::AnkiConnectError;
use crate::commits::git::GitError;
use crate::github::GithubError;
use crate::llm_client::LlmError;
use crate::runs::converter::ConverterError;

/// Longest converter diagnostic returned to the caller; the full text is logged.
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// One schema problem in a request body or imported config.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    /// A request that is well-formed but cannot be served, with a stable code.
    #[error("Bad request ({code}): {message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Expected race: the record already left the state the caller assumed.
    #[error("Conflict ({reason}): {message}")]
    Conflict {
        reason: &'static str,
        message: String,
    },

    /// An external collaborator refused or could not be reached.
    #[error("Upstream error ({code}): {message}")]
    Upstream {
        status: StatusCode,
        code: &'static str,
        message: String,
    },

    #[error("Package build failed: {diagnostic}")]
    BuildFailed { diagnostic: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            issues: Vec::new(),
        }
    }

    pub fn invalid_fields(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        AppError::Validation {
            message: message.into(),
            issues,
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        AppError::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn already_updated(message: impl Into<String>) -> Self {
        AppError::Conflict {
            reason: "already_updated",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut error = serde_json::Map::new();

        let (status, code, message) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Validation { message, issues } => {
                if !issues.is_empty() {
                    error.insert("issues".into(), json!(issues));
                }
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message.clone())
            }
            AppError::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, *code, message.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Conflict { reason, message } => {
                error.insert("reason".into(), json!(reason));
                (StatusCode::CONFLICT, "CONFLICT", message.clone())
            }
            AppError::Upstream {
                status,
                code,
                message,
            } => {
                tracing::warn!("Upstream error {code}: {message}");
                (*status, *code, message.clone())
            }
            AppError::BuildFailed { diagnostic } => {
                tracing::error!("Package build failed: {diagnostic}");
                error.insert(
                    "details".into(),
                    json!(truncate_tail(diagnostic, MAX_DIAGNOSTIC_CHARS)),
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "build_failed",
                    "The package build failed".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        error.insert("code".into(), json!(code));
        error.insert("message".into(), json!(message));

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::NotConfigured => AppError::Upstream {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "llm_not_configured",
                message: "Card rewriting is not configured on this server".to_string(),
            },
            other => AppError::Upstream {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "llm_error",
                message: format!("The rewrite service failed: {other}"),
            },
        }
    }
}

impl From<GithubError> for AppError {
    fn from(e: GithubError) -> Self {
        match e {
            GithubError::TokenMissing => AppError::Upstream {
                status: StatusCode::BAD_REQUEST,
                code: "github_token_missing",
                message: "No GitHub token is stored for this account".to_string(),
            },
            GithubError::NotFound(what) => AppError::NotFound(format!("GitHub: {what}")),
            other => AppError::Upstream {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "github_unavailable",
                message: other.to_string(),
            },
        }
    }
}

impl From<AnkiConnectError> for AppError {
    fn from(e: AnkiConnectError) -> Self {
        match e {
            AnkiConnectError::Unreachable { .. } => AppError::Upstream {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "anki_unreachable",
                message: e.to_string(),
            },
            // The bridge answered but refused the action (duplicate note, bad deck).
            AnkiConnectError::Api(_) | AnkiConnectError::EmptyResult(_) => AppError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                code: "anki_rejected",
                message: e.to_string(),
            },
            AnkiConnectError::Client(_) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl From<ConverterError> for AppError {
    fn from(e: ConverterError) -> Self {
        match e {
            ConverterError::Failed { stderr, .. } => AppError::BuildFailed { diagnostic: stderr },
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<GitError> for AppError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::MissingClone(path) => AppError::NotFound(format!(
                "No local clone at {}",
                path.display()
            )),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Keeps the last `max` characters; converter diagnostics end with the cause.
fn truncate_tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_conflict_carries_reason() {
        let (status, body) = body_json(AppError::already_updated("card already reviewed")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["reason"], "already_updated");
    }

    #[tokio::test]
    async fn test_validation_lists_issues() {
        let err = AppError::invalid_fields(
            "invalid config",
            vec![ValidationIssue::new("llm.temperature", "must be between 0 and 2")],
        );
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["issues"][0]["path"], "llm.temperature");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let (status, body) = body_json(AppError::Internal(anyhow::anyhow!("secret path"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.to_string().contains("secret path"));
    }

    #[tokio::test]
    async fn test_bad_request_uses_its_code() {
        let (status, body) =
            body_json(AppError::bad_request("no_accepted", "No accepted cards")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "no_accepted");
    }

    #[tokio::test]
    async fn test_anki_refusal_is_not_reported_as_unreachable() {
        let refused = AnkiConnectError::Api("cannot create note because it is a duplicate".into());
        let (status, body) = body_json(refused.into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "anki_rejected");
    }

    #[test]
    fn test_truncate_tail_keeps_end() {
        assert_eq!(truncate_tail("abcdef", 3), "def");
        assert_eq!(truncate_tail("abc", 10), "abc");
    }
}
