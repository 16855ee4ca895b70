use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use replication::ReplicationError;
use serde_json::json;
use thiserror::Error;

/// Central error type for the gateway
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Write sent to a secondary; the body carries the leader hint
    #[error("not leader")]
    NotLeader { leader: String },

    /// Replicated entry out of order; only replica endpoints surface this
    #[error("replication sequence gap")]
    SequenceConflict { required: i64, received: i64 },

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            AppError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            AppError::NotLeader { leader } => {
                let body = if leader.is_empty() {
                    json!({ "error": "not leader" })
                } else {
                    json!({ "error": "not leader", "leader": leader })
                };
                (StatusCode::TEMPORARY_REDIRECT, Json(body)).into_response()
            }
            AppError::SequenceConflict { required, received } => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "replication sequence gap",
                    "required": required,
                    "received": received,
                })),
            )
                .into_response(),
            AppError::ServiceUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": message })),
            )
                .into_response(),
            AppError::Internal(error) => {
                tracing::error!(error = %error, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Something went wrong" })),
                )
                    .into_response()
            }
        }
    }
}

/// Mapping used by the replica endpoints: gaps are a 409 the primary can
/// retry after catch-up, payload mismatches are non-retriable 400s, quorum
/// and transport faults are 503s. The client-facing write path does NOT use
/// this mapping; it reports every replication failure as a 503.
impl From<ReplicationError> for AppError {
    fn from(error: ReplicationError) -> Self {
        match error {
            ReplicationError::SequenceGap { expected, received } => AppError::SequenceConflict {
                required: expected,
                received,
            },
            ReplicationError::PrepareMismatch { .. }
            | ReplicationError::CommitBeforePrepare { .. } => {
                AppError::BadRequest(error.to_string())
            }
            ReplicationError::QuorumNotMet { .. } | ReplicationError::Peer(_) => {
                AppError::ServiceUnavailable(error.to_string())
            }
        }
    }
}
