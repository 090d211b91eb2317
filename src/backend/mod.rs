//! Client adapter for the hosted authentication and database service.
//!
//! This is the only place that talks to the backend. Every operation returns
//! a `Result`: callers get either the data or a `BackendError`, never both.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::MemoryBackend;
pub use supabase::SupabaseClient;

/// Tables read and written by the application
pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const BRANDS: &str = "brands";
    pub const TIERS: &str = "tiers";
    pub const UPDATES: &str = "updates";
    pub const PAYOUTS: &str = "payouts";
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend answered with an error; `message` is its text, unmodified
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("backend request failed: {0}")]
    Transport(String),
    #[error("unexpected backend response: {0}")]
    Decode(String),
    #[error("{0}")]
    InvalidRequest(String),
}

impl BackendError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP status reported by the backend, if it answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Rejected credentials or token
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Authenticated user as seen by the application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone().unwrap_or_default(),
        }
    }
}

/// Session issued by the backend. Only the backend adapter refreshes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Extra data stored on the auth record at sign-up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    pub first_name: String,
    pub last_name: String,
}

/// Result of a sign-up request.
///
/// `session` is `None` while the backend waits for e-mail confirmation. A
/// user returned without a session is unconfirmed and may not be genuine:
/// Supabase answers a sign-up for a registered address with a made-up user.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

impl SignUpResponse {
    pub fn confirmation_pending() -> Self {
        Self {
            user: None,
            session: None,
        }
    }
}

/// Equality filters and ordering for a table read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, String)>,
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a row satisfies every equality filter
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|(column, expected)| {
            match row.get(column) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *expected,
            }
        })
    }
}

#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Resolve the user owning an access token; `None` when the token is not valid
    async fn get_user(&self, access_token: &str) -> BackendResult<Option<User>>;

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> BackendResult<SignUpResponse>;

    async fn sign_out(&self, access_token: &str) -> BackendResult<()>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> BackendResult<()>;

    /// Provider authorization URL for a PKCE sign-in
    fn oauth_authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> BackendResult<String>;

    async fn exchange_code_for_session(&self, code: &str, verifier: &str) -> BackendResult<Session>;

    async fn select(
        &self,
        table: &str,
        query: &Query,
        access_token: Option<&str>,
    ) -> BackendResult<Vec<Value>>;

    /// Insert one row and return it as stored
    async fn insert(&self, table: &str, row: Value, access_token: Option<&str>) -> BackendResult<Value>;

    /// Current session for a stored one: returned as-is while valid, refreshed once expired
    async fn get_session(&self, session: &Session) -> BackendResult<Session> {
        if session.is_expired() {
            self.refresh_session(&session.refresh_token).await
        } else {
            Ok(session.clone())
        }
    }
}
