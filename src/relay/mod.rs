//! Outbound delivery of contact-form messages through a third-party form relay.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ContactConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Contact form is not configured")]
    NotConfigured,
    /// Message reported by the relay, unmodified
    #[error("{0}")]
    Rejected(String),
    #[error("Could not reach the contact relay: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ContactRelay: Send + Sync {
    async fn send(&self, message: &ContactMessage) -> Result<(), RelayError>;
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

pub struct Web3FormsRelay {
    endpoint: String,
    access_key: Option<String>,
    subject: String,
    client: Client,
}

impl Web3FormsRelay {
    pub fn new(config: &ContactConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            access_key: config.access_key.clone().filter(|k| !k.trim().is_empty()),
            subject: config.subject.clone(),
            client: Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_key.is_some()
    }
}

#[async_trait]
impl ContactRelay for Web3FormsRelay {
    async fn send(&self, message: &ContactMessage) -> Result<(), RelayError> {
        let access_key = self.access_key.as_deref().ok_or(RelayError::NotConfigured)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&json!({
                "access_key": access_key,
                "subject": self.subject,
                "name": message.name,
                "email": message.email,
                "message": message.message,
            }))
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        interpret_reply(status, &body)?;
        tracing::info!("Contact message relayed");
        Ok(())
    }
}

/// The relay's verdict. A reply that is not the relay's JSON is reported by its status.
fn interpret_reply(status: StatusCode, body: &str) -> Result<(), RelayError> {
    match serde_json::from_str::<RelayResponse>(body) {
        Ok(reply) if status.is_success() && reply.success => Ok(()),
        Ok(reply) => Err(RelayError::Rejected(
            reply.message.unwrap_or_else(|| status.to_string()),
        )),
        Err(_) => Err(RelayError::Rejected(status.to_string())),
    }
}

/// Relay that keeps messages in memory
#[derive(Debug, Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<ContactMessage>>,
    failure: Mutex<Option<RelayError>>,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: Option<RelayError>) {
        *self.failure.lock() = error;
    }

    pub fn sent(&self) -> Vec<ContactMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ContactRelay for RecordingRelay {
    async fn send(&self, message: &ContactMessage) -> Result<(), RelayError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> ContactMessage {
        ContactMessage {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            message: "Hello from the contact page".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_relay_refuses() {
        let relay = Web3FormsRelay::new(&ContactConfig::default());
        assert!(!relay.is_configured());
        assert_eq!(relay.send(&message()).await, Err(RelayError::NotConfigured));
    }

    #[test]
    fn test_reply_interpretation() {
        assert_eq!(interpret_reply(StatusCode::OK, r#"{"success":true}"#), Ok(()));
        assert_eq!(
            interpret_reply(StatusCode::BAD_REQUEST, r#"{"success":false,"message":"Invalid access key"}"#),
            Err(RelayError::Rejected("Invalid access key".to_string()))
        );
        assert_eq!(
            interpret_reply(StatusCode::OK, r#"{"success":false}"#),
            Err(RelayError::Rejected("200 OK".to_string()))
        );
        assert_eq!(
            interpret_reply(StatusCode::BAD_GATEWAY, "<html>Bad Gateway</html>"),
            Err(RelayError::Rejected("502 Bad Gateway".to_string()))
        );
    }

    #[tokio::test]
    async fn test_recording_relay() {
        let relay = RecordingRelay::new();
        tokio_test::assert_ok!(relay.send(&message()).await);
        relay.fail_with(Some(RelayError::Rejected("Invalid access key".to_string())));
        let err = tokio_test::assert_err!(relay.send(&message()).await);
        assert_eq!(err.to_string(), "Invalid access key");
        assert_eq!(relay.sent().len(), 1);
    }
}
