//! Fill history queries

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use tracing::info;

use crate::error::AppError;
use crate::handlers::replica::ensure_read_freshness;
use crate::middleware::RequestId;
use crate::models::FillsResponse;
use crate::state::AppState;

pub async fn fills_for_user(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<FillsResponse>, AppError> {
    if user_id.is_empty() {
        return Err(AppError::BadRequest("userId is required".to_string()));
    }

    info!(user = %user_id, "fills query");
    ensure_read_freshness(&state, &request_id).await?;

    let fills = {
        let engine = state.engine.read().expect("engine lock poisoned");
        engine.fills_for_user(&user_id)
    };

    info!(user = %user_id, count = fills.len(), "fills query done");
    Ok(Json(FillsResponse { fills }))
}
