//! Internal replica endpoints and replay plumbing
//!
//! Peers drive this node through `/internal/replica/{prepare,commit}`;
//! reads catch up through `/state` and `/sync`. Sequence gaps answer 409
//! with the expected/received pair so the primary can diagnose; payload
//! mismatches answer 400 and are not retriable for that payload.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};
use types::order::Side;

use replication::{
    ReplicaState, ReplicaSyncResponse, ReplicationEntry, ReplicationRequest, ReplicationResponse,
    WriteKind,
};

use crate::error::AppError;
use crate::middleware::RequestId;
use crate::state::AppState;

pub async fn prepare(
    State(state): State<AppState>,
    request: Result<Json<ReplicationRequest>, JsonRejection>,
) -> Result<Json<ReplicationResponse>, AppError> {
    let Json(request) =
        request.map_err(|_| AppError::BadRequest("invalid request body".to_string()))?;
    if request.entries.is_empty() {
        return Err(AppError::BadRequest("entries are required".to_string()));
    }

    for entry in &request.entries {
        let newly_prepared = state.replication.prepare_remote_entry(entry)?;
        if newly_prepared {
            info!(seq = entry.seq, kind = %entry.kind, "replica prepared entry");
        }
    }

    Ok(Json(ReplicationResponse {
        accepted: true,
        last_seq: state.coordinator.applied_seq(),
    }))
}

pub async fn commit(
    State(state): State<AppState>,
    request: Result<Json<ReplicationRequest>, JsonRejection>,
) -> Result<Json<ReplicationResponse>, AppError> {
    let Json(request) =
        request.map_err(|_| AppError::BadRequest("invalid request body".to_string()))?;
    if request.entries.is_empty() {
        return Err(AppError::BadRequest("entries are required".to_string()));
    }

    // Inbound commits and read-repair replay share the pipeline lock so the
    // engine sees entries in sequence order.
    let _pipeline = state.write_pipeline.lock().await;

    for entry in &request.entries {
        let applied = apply_entry(&state, entry)?;
        if applied {
            info!(seq = entry.seq, kind = %entry.kind, "replica committed entry");
        }
    }

    Ok(Json(ReplicationResponse {
        accepted: true,
        last_seq: state.coordinator.applied_seq(),
    }))
}

pub async fn replica_state(State(state): State<AppState>) -> Json<ReplicaState> {
    Json(state.coordinator.state())
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    #[serde(default)]
    since: i64,
}

pub async fn replica_sync(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Json<ReplicaSyncResponse> {
    Json(ReplicaSyncResponse {
        entries: state.coordinator.entries_since(params.since),
    })
}

/// Commit one entry through the coordinator and side-effect the engine.
///
/// Returns whether the entry was newly applied; duplicates skip the engine
/// entirely. A replicated cancel whose order is already gone is logged and
/// ignored: the committed log is authoritative and must keep advancing.
pub(crate) fn apply_entry(state: &AppState, entry: &ReplicationEntry) -> Result<bool, AppError> {
    if entry.kind == WriteKind::Post && entry.user.is_empty() {
        return Err(AppError::BadRequest(
            "replication entry missing user".to_string(),
        ));
    }

    let applied = state.replication.apply_remote_entry(entry, |entry| {
        let mut engine = state.engine.write().expect("engine lock poisoned");
        match entry.kind {
            WriteKind::Post => {
                engine.post_limit(
                    &entry.user,
                    entry.order_id,
                    entry.price_level,
                    entry.amount,
                    Side::from_is_bid(entry.is_bid),
                );
            }
            WriteKind::Cancel => {
                if let Err(err) = engine.cancel_limit(&entry.order_id) {
                    warn!(
                        order_id = %entry.order_id,
                        error = %err,
                        "replicated cancel had no matching order"
                    );
                }
            }
        }
    })?;

    Ok(applied.is_some())
}

/// Read repair: poll peer states under quorum, then pull and replay any
/// missing suffix before the caller serves its read. Every failure is a
/// retriable 503 to the client; replay holds the write pipeline lock.
pub(crate) async fn ensure_read_freshness(
    state: &AppState,
    request_id: &RequestId,
) -> Result<(), AppError> {
    let entries = state
        .replication
        .read_repair_entries(&request_id.0)
        .await
        .map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;

    if entries.is_empty() {
        return Ok(());
    }

    let _pipeline = state.write_pipeline.lock().await;

    let mut applied = 0;
    for entry in &entries {
        // Replay runs both phases locally: stage, then commit + side effect
        if let Err(err) = state.replication.prepare_remote_entry(entry) {
            return Err(AppError::ServiceUnavailable(err.to_string()));
        }
        match apply_entry(state, entry) {
            Ok(true) => applied += 1,
            Ok(false) => {}
            Err(err) => {
                return Err(AppError::ServiceUnavailable(err.to_string()));
            }
        }
    }

    info!(
        applied,
        local_seq = state.coordinator.applied_seq(),
        "read repair: sync replay complete"
    );
    Ok(())
}
