//! The shared path of every form submission.
//!
//! Validate, take the submission permit, run the call, then report. Nothing
//! reaches the backend unless validation passed and no other submission of
//! the same form is pending. Failures raise an error toast carrying the
//! message unmodified and echo the non-secret values back.

use std::future::Future;

use super::extract::Visitor;
use super::ApiError;
use crate::forms::{FormKey, FormSchema, FormValues};
use crate::AppState;

pub async fn submit<T, Fut>(
    state: &AppState,
    visitor: &Visitor,
    schema: &FormSchema,
    values: &FormValues,
    call: Fut,
) -> Result<T, ApiError>
where
    Fut: Future<Output = Result<T, ApiError>>,
{
    if let Err(errors) = schema.validate(values) {
        tracing::debug!(form = schema.name, fields = errors.len(), "Form rejected by validation");
        return Err(ApiError::validation(errors).with_values(schema.preserved(values)));
    }

    let permit = state
        .submissions
        .begin(FormKey::new(visitor.id(), schema.name), schema.busy_label)
        .map_err(|err| {
            tracing::debug!(form = schema.name, "Submission refused: {}", err);
            ApiError::from(err)
        })?;

    match permit.run(call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            tracing::warn!(form = schema.name, error = %err.message(), "Submission failed");
            state.toasts.error(visitor.id(), err.message());
            Err(err.with_values(schema.preserved(values)))
        }
        Err(cancelled) => {
            tracing::debug!(form = schema.name, "Submission discarded: {}", cancelled);
            Err(ApiError::from(cancelled))
        }
    }
}
