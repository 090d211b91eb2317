use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use super::extract::{field, CurrentSession, FormInput, Visitor};
use super::submit::submit;
use super::ApiError;
use crate::backend::{tables, Query};
use crate::forms::schemas;
use crate::AppState;

/// Every payout request starts in this state
const REQUESTED: &str = "requested";

pub async fn list(
    State(state): State<Arc<AppState>>,
    current: CurrentSession,
) -> Result<Json<Vec<Value>>, ApiError> {
    let query = Query::new()
        .eq("owner_id", current.user.id.clone())
        .order_by("created_at", false);
    let rows = state
        .backend
        .select(tables::PAYOUTS, &query, Some(&current.session.access_token))
        .await?;
    Ok(Json(rows))
}

pub async fn request(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    current: CurrentSession,
    FormInput(values): FormInput,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let schema = schemas::payout();
    let inserted = submit(&state, &visitor, &schema, &values, async {
        let amount: f64 = field(&values, "amount")
            .parse()
            .map_err(|_| ApiError::validation_field("amount", "Amount must be a number"))?;
        let row = json!({
            "owner_id": current.user.id,
            "amount": amount,
            "status": REQUESTED,
        });
        state
            .backend
            .insert(tables::PAYOUTS, row, Some(&current.session.access_token))
            .await
            .map_err(ApiError::from)
    })
    .await?;

    tracing::info!(user_id = %current.user.id, "Payout requested");
    state.toasts.success(visitor.id(), "Payout requested");
    Ok((StatusCode::CREATED, Json(inserted)))
}
