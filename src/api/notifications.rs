use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::extract::Visitor;
use super::ApiError;
use crate::notifications::Toast;
use crate::AppState;

/// Live toasts of this browser. Each toast is delivered once.
pub async fn drain(State(state): State<Arc<AppState>>, visitor: Visitor) -> Json<Vec<Toast>> {
    Json(state.toasts.drain(visitor.id()))
}

pub async fn dismiss(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    if state.toasts.dismiss(visitor.id(), id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Notification not found"))
    }
}
