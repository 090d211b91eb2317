//! Unified API error handling.
//!
//! Every endpoint answers errors with the same JSON envelope:
//! `{ "error": { "code", "message", "details"?, "values"? } }`. Messages that
//! come from the backend or the contact relay are passed through unmodified.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::backend::BackendError;
use crate::expenses::LedgerError;
use crate::forms::{FieldErrors, SubmitError};
use crate::relay::RelayError;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Client errors (4xx)
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    TooManyRequests,
    ValidationError,

    // Server errors (5xx)
    InternalError,
    ServiceUnavailable,
    ExternalServiceError,
}

impl ErrorCode {
    /// Get the default HTTP status code for this error code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ExternalServiceError => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::UnprocessableEntity => "unprocessable_entity",
            ErrorCode::TooManyRequests => "too_many_requests",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::ExternalServiceError => "external_service_error",
        }
    }

    fn from_backend_status(status: u16) -> Self {
        match status {
            400 => ErrorCode::BadRequest,
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Conflict,
            422 => ErrorCode::UnprocessableEntity,
            429 => ErrorCode::TooManyRequests,
            400..=499 => ErrorCode::BadRequest,
            _ => ErrorCode::ExternalServiceError,
        }
    }
}

/// The inner error object in the response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    /// Submitted form values, so the form can be shown again as typed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, String>>,
}

/// Additional error details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Field-level validation errors
    ValidationErrors(FieldErrors),
}

/// The full error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Unified API error type
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    status: StatusCode,
    message: String,
    details: Option<ErrorDetails>,
    values: Option<BTreeMap<String, String>>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code(),
            code,
            message: message.into(),
            details: None,
            values: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Create an API error with a custom HTTP status code
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Echo the (non-secret) submitted values back with the error
    pub fn with_values(mut self, values: BTreeMap<String, String>) -> Self {
        self.values = Some(values);
        self
    }

    // -------------------------------------------------------------------------
    // Convenience constructors for common error types
    // -------------------------------------------------------------------------

    /// Bad request error (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Unauthorized error (401) - a session is required
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Not found error (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Conflict error (409)
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Validation error (400) with field-level details
    pub fn validation(errors: FieldErrors) -> Self {
        let message = if errors.len() == 1 {
            errors
                .values()
                .next()
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string())
        } else {
            format!("Validation failed for {} fields", errors.len())
        };

        Self::new(ErrorCode::ValidationError, message)
            .with_details(ErrorDetails::ValidationErrors(errors))
    }

    /// Single field validation error
    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::validation(errors)
    }

    /// Internal server error (500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Service unavailable error (503)
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Too many requests error (429)
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let response = ErrorResponse {
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message,
                details: self.details,
                values: self.values,
            },
        };

        (self.status, Json(response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

// -------------------------------------------------------------------------
// Conversion implementations for domain errors
// -------------------------------------------------------------------------

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match &err {
            BackendError::Api { status, message } => {
                let code = ErrorCode::from_backend_status(*status);
                let api = ApiError::new(code, message.clone());
                match StatusCode::from_u16(*status) {
                    Ok(status) if status.is_client_error() => api.with_status(status),
                    _ => api,
                }
            }
            BackendError::Transport(_) => {
                tracing::error!("Backend unreachable: {}", err);
                ApiError::service_unavailable(err.to_string())
            }
            BackendError::Decode(_) => {
                tracing::error!("Backend response not understood: {}", err);
                ApiError::new(ErrorCode::ExternalServiceError, err.to_string())
            }
            BackendError::InvalidRequest(message) => ApiError::bad_request(message.clone()),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        ApiError::conflict(err.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => ApiError::not_found(err.to_string()),
            LedgerError::UnknownCategory(_) => ApiError::validation_field("category", err.to_string()),
            LedgerError::InvalidAmount => ApiError::validation_field("amount", err.to_string()),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotConfigured => ApiError::service_unavailable(err.to_string()),
            RelayError::Rejected(message) => ApiError::new(ErrorCode::ExternalServiceError, message),
            RelayError::Transport(_) => ApiError::new(ErrorCode::ExternalServiceError, err.to_string()),
        }
    }
}

// -------------------------------------------------------------------------
// Builder for validation errors
// -------------------------------------------------------------------------

/// Builder for collecting multiple validation errors
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: FieldErrors,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validation error for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Build the ApiError if there are any errors
    pub fn build(self) -> Option<ApiError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(ApiError::validation(self.errors))
        }
    }

    /// Return Ok(()) if no errors, or Err(ApiError) if there are errors
    pub fn finish(self) -> Result<(), ApiError> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
