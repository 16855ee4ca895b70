//! Order write and query handlers
//!
//! Writes run the full pipeline: role gate, validation, pipeline lock,
//! sequence reservation, two-phase replication, local apply. Any
//! replication failure reverts the reservation and answers 503 so the
//! client retries; sequence details never leak to the public surface.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use matching_engine::BookError;
use replication::ReplicationEntry;
use tracing::{error, info};
use types::ids::OrderId;
use types::order::Side;

use crate::error::AppError;
use crate::handlers::replica::ensure_read_freshness;
use crate::middleware::RequestId;
use crate::models::{
    CancelLimitRequest, CancelLimitResponse, OpenOrdersResponse, PostLimitRequest,
    PostLimitResponse,
};
use crate::state::AppState;

pub async fn post_order(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<PostLimitRequest>, JsonRejection>,
) -> Result<Json<PostLimitResponse>, AppError> {
    if !state.coordinator.can_accept_write() {
        return Err(AppError::NotLeader {
            leader: state.coordinator.primary().to_string(),
        });
    }
    let Json(payload) = payload
        .map_err(|_| AppError::BadRequest("invalid request body".to_string()))?;
    if payload.user.is_empty() {
        return Err(AppError::BadRequest("user is required".to_string()));
    }
    if payload.amount <= 0 {
        return Err(AppError::BadRequest(
            "amount must be greater than 0".to_string(),
        ));
    }

    info!(
        user = %payload.user,
        is_bid = payload.is_bid,
        price = payload.price_level,
        amount = payload.amount,
        "post order"
    );

    // Serializes sequence assignment against engine apply, across the peer
    // fan-out: a later write must not commit before this one.
    let _pipeline = state.write_pipeline.lock().await;

    let order_id = OrderId::new();
    let entry = ReplicationEntry::post(
        state.coordinator.next_sequence(),
        payload.user.as_str(),
        order_id,
        payload.price_level,
        payload.amount,
        payload.is_bid,
    );

    if let Err(err) = state.replication.prepare_entry(&request_id.0, &entry).await {
        error!(seq = entry.seq, error = %err, "post replication prepare failed");
        state.coordinator.revert_sequence(entry.seq);
        return Err(AppError::ServiceUnavailable(err.to_string()));
    }
    if let Err(err) = state.replication.commit_entry(&request_id.0, &entry).await {
        error!(seq = entry.seq, error = %err, "post replication commit failed");
        state.coordinator.revert_sequence(entry.seq);
        return Err(AppError::ServiceUnavailable(err.to_string()));
    }

    let result = state
        .replication
        .apply_remote_entry(&entry, |entry| {
            let mut engine = state.engine.write().expect("engine lock poisoned");
            engine.post_limit(
                &entry.user,
                entry.order_id,
                entry.price_level,
                entry.amount,
                Side::from_is_bid(entry.is_bid),
            )
        })
        .map_err(|err| {
            error!(seq = entry.seq, error = %err, "post local commit failed");
            AppError::Internal(err.into())
        })?;

    let response = match result {
        Some(result) => PostLimitResponse {
            order_id: result.order_id.to_string(),
            fills: result.fills,
        },
        // Duplicate replay of an already-committed sequence
        None => PostLimitResponse {
            order_id: entry.order_id.to_string(),
            fills: Vec::new(),
        },
    };

    info!(
        user = %payload.user,
        size_matched = response.fills.iter().map(|fill| fill.size).sum::<i64>(),
        fills = response.fills.len(),
        "post order done"
    );
    Ok(Json(response))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<CancelLimitRequest>, JsonRejection>,
) -> Result<Json<CancelLimitResponse>, AppError> {
    if !state.coordinator.can_accept_write() {
        return Err(AppError::NotLeader {
            leader: state.coordinator.primary().to_string(),
        });
    }
    let Json(payload) = payload
        .map_err(|_| AppError::BadRequest("invalid request body".to_string()))?;
    if payload.order_id.is_empty() {
        return Err(AppError::BadRequest("orderId is required".to_string()));
    }
    let order_id: OrderId = payload
        .order_id
        .parse()
        .map_err(|_| AppError::BadRequest("orderId must be a UUID".to_string()))?;

    {
        let engine = state.engine.read().expect("engine lock poisoned");
        if !engine.has_order(&order_id) {
            return Err(AppError::NotFound("order not found".to_string()));
        }
    }

    info!(order_id = %order_id, "cancel order");

    let _pipeline = state.write_pipeline.lock().await;

    let entry = ReplicationEntry::cancel(state.coordinator.next_sequence(), order_id);

    if let Err(err) = state.replication.prepare_entry(&request_id.0, &entry).await {
        error!(seq = entry.seq, error = %err, "cancel replication prepare failed");
        state.coordinator.revert_sequence(entry.seq);
        return Err(AppError::ServiceUnavailable(err.to_string()));
    }
    if let Err(err) = state.replication.commit_entry(&request_id.0, &entry).await {
        error!(seq = entry.seq, error = %err, "cancel replication commit failed");
        state.coordinator.revert_sequence(entry.seq);
        return Err(AppError::ServiceUnavailable(err.to_string()));
    }

    let result = state
        .replication
        .apply_remote_entry(&entry, |entry| {
            let mut engine = state.engine.write().expect("engine lock poisoned");
            engine.cancel_limit(&entry.order_id)
        })
        .map_err(|err| {
            error!(seq = entry.seq, error = %err, "cancel local commit failed");
            AppError::Internal(err.into())
        })?;

    let response = match result {
        Some(Ok(size_cancelled)) => CancelLimitResponse { size_cancelled },
        // The order vanished between validation and apply
        Some(Err(BookError::OrderNotFound)) => {
            return Err(AppError::NotFound("order not found".to_string()));
        }
        // Duplicate replay of an already-committed sequence
        None => CancelLimitResponse { size_cancelled: 0 },
    };

    info!(
        order_id = %order_id,
        size_cancelled = response.size_cancelled,
        "cancel order done"
    );
    Ok(Json(response))
}

pub async fn open_orders(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<OpenOrdersResponse>, AppError> {
    if user_id.is_empty() {
        return Err(AppError::BadRequest("userId is required".to_string()));
    }

    info!(user = %user_id, "open orders query");
    ensure_read_freshness(&state, &request_id).await?;

    let orders = {
        let engine = state.engine.read().expect("engine lock poisoned");
        engine.open_orders_for_user(&user_id)
    };

    info!(user = %user_id, count = orders.len(), "open orders query done");
    Ok(Json(OpenOrdersResponse { orders }))
}
