use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use super::extract::{field, FormInput, Visitor};
use super::submit::submit;
use super::ApiError;
use crate::forms::schemas;
use crate::relay::ContactMessage;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub sent: bool,
}

/// Relay a contact-form message. No session required.
pub async fn send(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    FormInput(values): FormInput,
) -> Result<Json<ContactResponse>, ApiError> {
    let schema = schemas::contact();
    let message = ContactMessage {
        name: field(&values, "name").to_string(),
        email: field(&values, "email").to_string(),
        message: field(&values, "message").to_string(),
    };
    submit(&state, &visitor, &schema, &values, async {
        state.relay.send(&message).await.map_err(ApiError::from)
    })
    .await?;

    state
        .toasts
        .success(visitor.id(), "Thanks for reaching out! We'll get back to you soon.");
    Ok(Json(ContactResponse { sent: true }))
}
