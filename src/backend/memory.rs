//! In-process backend used by tests and local development.
//!
//! It keeps auth records and table rows in memory, counts every call per
//! operation, and can be told to fail specific operations.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;

use super::{
    BackendClient, BackendError, BackendResult, Query, Session, SignUpResponse, User, UserMetadata,
};

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    auth_codes: HashMap<String, String>,
    tables: HashMap<String, Vec<Value>>,
    calls: HashMap<&'static str, usize>,
    failing_tables: HashSet<String>,
    outage: Option<String>,
    confirm_email: bool,
    conceal_existing: bool,
    password_resets: Vec<String>,
}

pub struct MemoryBackend {
    state: Mutex<State>,
    token_ttl: Duration,
    latency: Mutex<Option<StdDuration>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            token_ttl: Duration::hours(1),
            latency: Mutex::new(None),
        }
    }

    /// Issue access tokens with a custom lifetime (negative values issue already expired ones)
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Sign-ups wait for e-mail confirmation instead of returning a session
    pub fn require_email_confirmation(&self, enabled: bool) {
        self.state.lock().confirm_email = enabled;
    }

    /// Answer a sign-up for a registered address with a made-up unconfirmed
    /// user instead of an error, the way Supabase hides which addresses exist
    pub fn conceal_existing_accounts(&self, enabled: bool) {
        self.state.lock().conceal_existing = enabled;
    }

    /// Make every insert into `table` fail
    pub fn fail_inserts_into(&self, table: &str) {
        self.state.lock().failing_tables.insert(table.to_string());
    }

    pub fn restore_inserts_into(&self, table: &str) {
        self.state.lock().failing_tables.remove(table);
    }

    /// Fail every call with the given message until cleared
    pub fn set_outage(&self, message: Option<&str>) {
        self.state.lock().outage = message.map(str::to_string);
    }

    /// Delay every async call, to hold submissions in flight
    pub fn set_latency(&self, latency: Option<StdDuration>) {
        *self.latency.lock() = latency;
    }

    /// Number of calls made to one operation
    pub fn calls(&self, operation: &str) -> usize {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Number of calls across all operations
    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    pub fn account_count(&self) -> usize {
        self.state.lock().accounts.len()
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.state.lock().accounts.contains_key(&email.to_lowercase())
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn password_resets(&self) -> Vec<String> {
        self.state.lock().password_resets.clone()
    }

    /// Register a pending OAuth code for an existing account, as the provider redirect would
    pub fn issue_auth_code(&self, email: &str) -> Option<String> {
        let mut state = self.state.lock();
        let user_id = state.accounts.get(&email.to_lowercase())?.user.id.clone();
        let code = uuid::Uuid::new_v4().to_string();
        state.auth_codes.insert(code.clone(), user_id);
        Some(code)
    }

    /// Create a confirmed account directly
    pub fn seed_account(&self, email: &str, password: &str, metadata: &UserMetadata) -> User {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            first_name: Some(metadata.first_name.clone()),
            last_name: Some(metadata.last_name.clone()),
            email_confirmed_at: Some(Utc::now()),
        };
        self.state.lock().accounts.insert(
            email.to_lowercase(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    async fn enter(&self, operation: &'static str) -> BackendResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        *state.calls.entry(operation).or_default() += 1;
        match &state.outage {
            Some(message) => Err(BackendError::Transport(message.clone())),
            None => Ok(()),
        }
    }

    fn issue_session(&self, state: &mut State, user: User) -> Session {
        let access_token = uuid::Uuid::new_v4().to_string();
        let refresh_token = uuid::Uuid::new_v4().to_string();
        state.access_tokens.insert(access_token.clone(), user.id.clone());
        state.refresh_tokens.insert(refresh_token.clone(), user.id.clone());
        Session {
            access_token,
            refresh_token,
            expires_at: Utc::now() + self.token_ttl,
            user,
        }
    }

    fn user_by_id(state: &State, user_id: &str) -> Option<User> {
        state
            .accounts
            .values()
            .find(|account| account.user.id == user_id)
            .map(|account| account.user.clone())
    }
}

#[async_trait]
impl BackendClient for MemoryBackend {
    async fn get_user(&self, access_token: &str) -> BackendResult<Option<User>> {
        self.enter("get_user").await?;
        let state = self.state.lock();
        Ok(state
            .access_tokens
            .get(access_token)
            .and_then(|user_id| Self::user_by_id(&state, user_id)))
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session> {
        self.enter("refresh_session").await?;
        let mut state = self.state.lock();
        let user_id = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| BackendError::api(400, "Invalid Refresh Token: Refresh Token Not Found"))?;
        let user = Self::user_by_id(&state, &user_id)
            .ok_or_else(|| BackendError::api(404, "User not found"))?;
        Ok(self.issue_session(&mut state, user))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        self.enter("sign_in_with_password").await?;
        let mut state = self.state.lock();
        let account = state
            .accounts
            .get(&email.to_lowercase())
            .filter(|account| account.password == password)
            .cloned()
            .ok_or_else(|| BackendError::api(400, "Invalid login credentials"))?;
        if account.user.email_confirmed_at.is_none() {
            return Err(BackendError::api(400, "Email not confirmed"));
        }
        Ok(self.issue_session(&mut state, account.user))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> BackendResult<SignUpResponse> {
        self.enter("sign_up").await?;
        let mut state = self.state.lock();
        let key = email.to_lowercase();
        if state.accounts.contains_key(&key) {
            if state.conceal_existing {
                return Ok(SignUpResponse {
                    user: Some(User {
                        id: uuid::Uuid::new_v4().to_string(),
                        email: Some(email.to_string()),
                        first_name: Some(metadata.first_name.clone()),
                        last_name: Some(metadata.last_name.clone()),
                        email_confirmed_at: None,
                    }),
                    session: None,
                });
            }
            return Err(BackendError::api(422, "User already registered"));
        }
        if password.len() < 6 {
            return Err(BackendError::api(422, "Password should be at least 6 characters."));
        }
        let confirm = state.confirm_email;
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            first_name: Some(metadata.first_name.clone()),
            last_name: Some(metadata.last_name.clone()),
            email_confirmed_at: if confirm { None } else { Some(Utc::now()) },
        };
        state.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        if confirm {
            return Ok(SignUpResponse {
                user: Some(user),
                session: None,
            });
        }
        let session = self.issue_session(&mut state, user.clone());
        Ok(SignUpResponse {
            user: Some(user),
            session: Some(session),
        })
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        self.enter("sign_out").await?;
        let mut state = self.state.lock();
        if let Some(user_id) = state.access_tokens.remove(access_token) {
            state.refresh_tokens.retain(|_, owner| *owner != user_id);
        }
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str, _redirect_to: &str) -> BackendResult<()> {
        self.enter("reset_password_for_email").await?;
        self.state.lock().password_resets.push(email.to_string());
        Ok(())
    }

    fn oauth_authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> BackendResult<String> {
        Ok(format!(
            "memory://authorize?provider={}&redirect_to={}&code_challenge={}",
            provider, redirect_to, code_challenge
        ))
    }

    async fn exchange_code_for_session(&self, code: &str, verifier: &str) -> BackendResult<Session> {
        self.enter("exchange_code_for_session").await?;
        if verifier.is_empty() {
            return Err(BackendError::api(400, "code verifier is required"));
        }
        let mut state = self.state.lock();
        let user_id = state
            .auth_codes
            .remove(code)
            .ok_or_else(|| BackendError::api(404, "invalid flow state, no valid flow state found"))?;
        let user = Self::user_by_id(&state, &user_id)
            .ok_or_else(|| BackendError::api(404, "User not found"))?;
        Ok(self.issue_session(&mut state, user))
    }

    async fn select(
        &self,
        table: &str,
        query: &Query,
        _access_token: Option<&str>,
    ) -> BackendResult<Vec<Value>> {
        self.enter("select").await?;
        let state = self.state.lock();
        let mut rows: Vec<Value> = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();
        if let Some((column, ascending)) = &query.order {
            rows.sort_by(|a, b| {
                let a = a.get(column).map(Value::to_string).unwrap_or_default();
                let b = b.get(column).map(Value::to_string).unwrap_or_default();
                if *ascending {
                    a.cmp(&b)
                } else {
                    b.cmp(&a)
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value, _access_token: Option<&str>) -> BackendResult<Value> {
        self.enter("insert").await?;
        let mut state = self.state.lock();
        if state.failing_tables.contains(table) {
            return Err(BackendError::api(
                403,
                format!("new row violates row-level security policy for table \"{}\"", table),
            ));
        }
        let mut object = match row {
            Value::Object(object) => object,
            _ => return Err(BackendError::InvalidRequest("row must be a JSON object".to_string())),
        };
        ensure_defaults(&mut object);
        let stored = Value::Object(object);

        let rows = state.tables.entry(table.to_string()).or_default();
        if let Some(id) = stored.get("id") {
            if rows.iter().any(|existing| existing.get("id") == Some(id)) {
                return Err(BackendError::api(
                    409,
                    format!("duplicate key value violates unique constraint \"{}_pkey\"", table),
                ));
            }
        }
        rows.push(stored.clone());
        Ok(stored)
    }
}

fn ensure_defaults(object: &mut Map<String, Value>) {
    object
        .entry("id")
        .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
    object
        .entry("created_at")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
}
