//! Supabase implementation of the backend adapter.
//!
//! Auth calls go to GoTrue under `/auth/v1`, table reads and writes to
//! PostgREST under `/rest/v1`. Every request carries the anon key in the
//! `apikey` header; user-scoped calls carry the user's access token as the
//! bearer, anonymous ones the anon key.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    BackendClient, BackendError, BackendResult, Query, Session, SignUpResponse, User, UserMetadata,
};
use crate::config::BackendConfig;

pub struct SupabaseClient {
    base_url: Url,
    anon_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user_metadata: WireMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: WireUser,
}

impl From<WireUser> for User {
    fn from(wire: WireUser) -> Self {
        Self {
            id: wire.id,
            email: wire.email,
            first_name: wire.user_metadata.first_name,
            last_name: wire.user_metadata.last_name,
            email_confirmed_at: wire.email_confirmed_at,
        }
    }
}

impl From<WireSession> for Session {
    fn from(wire: WireSession) -> Self {
        let expires_at = wire
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(|| Utc::now() + Duration::seconds(wire.expires_in.unwrap_or(3600)));
        Self {
            access_token: wire.access_token,
            refresh_token: wire.refresh_token,
            expires_at,
            user: wire.user.into(),
        }
    }
}

/// Pull the human-readable message out of a GoTrue or PostgREST error body
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Auto-confirmed projects answer a sign-up with a session. Otherwise only
/// the unconfirmed user comes back, either bare or under `user`.
fn sign_up_response(body: Value) -> BackendResult<SignUpResponse> {
    if body.get("access_token").is_some() {
        let wire: WireSession =
            serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))?;
        let session: Session = wire.into();
        return Ok(SignUpResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }
    let user = body.get("user").cloned().unwrap_or(body);
    if user.get("id").is_none() {
        return Ok(SignUpResponse::confirmation_pending());
    }
    let wire: WireUser =
        serde_json::from_value(user).map_err(|e| BackendError::Decode(e.to_string()))?;
    Ok(SignUpResponse {
        user: Some(wire.into()),
        session: None,
    })
}

/// Render a query as PostgREST parameters
fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    for (column, value) in &query.filters {
        params.push((column.clone(), format!("eq.{}", value)));
    }
    if let Some((column, ascending)) = &query.order {
        let direction = if *ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

impl SupabaseClient {
    /// Build the client. Fails when either credential is empty or the URL is unusable.
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        if config.url.trim().is_empty() || config.anon_key.trim().is_empty() {
            return Err(BackendError::InvalidRequest(
                "backend URL and anon key are required".to_string(),
            ));
        }
        let mut base_url = Url::parse(config.url.trim())
            .map_err(|e| BackendError::InvalidRequest(format!("invalid backend URL: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(concat!("fundforfound/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url,
            anon_key: config.anon_key.trim().to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::InvalidRequest(format!("invalid endpoint {}: {}", path, e)))
    }

    fn authed(&self, builder: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token.unwrap_or(&self.anon_key))
    }

    /// Turn a non-success response into `BackendError::Api` with the backend's own text
    async fn check(response: Response) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body).unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body
            }
        });
        Err(BackendError::api(status.as_u16(), message))
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> BackendResult<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        debug!(grant_type, "Requesting backend token");

        let response = self
            .authed(self.client.post(url), None)
            .json(&body)
            .send()
            .await?;
        let wire: WireSession = Self::check(response).await?.json().await?;
        Ok(wire.into())
    }

    /// Ping the auth health endpoint; used by the startup checks
    pub async fn health(&self) -> BackendResult<()> {
        let url = self.endpoint("auth/v1/health")?;
        let response = self.authed(self.client.get(url), None).send().await?;
        Self::check(response).await.map(|_| ())
    }
}

#[async_trait]
impl BackendClient for SupabaseClient {
    async fn get_user(&self, access_token: &str) -> BackendResult<Option<User>> {
        let url = self.endpoint("auth/v1/user")?;
        let response = self
            .authed(self.client.get(url), Some(access_token))
            .send()
            .await?;
        match Self::check(response).await {
            Ok(response) => {
                let wire: WireUser = response.json().await?;
                Ok(Some(wire.into()))
            }
            Err(err) if err.is_unauthorized() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        self.token_grant("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> BackendResult<SignUpResponse> {
        let url = self.endpoint("auth/v1/signup")?;
        debug!("Requesting backend sign-up");
        let response = self
            .authed(self.client.post(url), None)
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await?;
        let body: Value = Self::check(response).await?.json().await?;
        sign_up_response(body)
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let url = self.endpoint("auth/v1/logout")?;
        let response = self
            .authed(self.client.post(url), Some(access_token))
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> BackendResult<()> {
        let mut url = self.endpoint("auth/v1/recover")?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);
        let response = self
            .authed(self.client.post(url), None)
            .json(&json!({ "email": email }))
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    fn oauth_authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> BackendResult<String> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url.to_string())
    }

    async fn exchange_code_for_session(&self, code: &str, verifier: &str) -> BackendResult<Session> {
        self.token_grant("pkce", json!({ "auth_code": code, "code_verifier": verifier }))
            .await
    }

    async fn select(
        &self,
        table: &str,
        query: &Query,
        access_token: Option<&str>,
    ) -> BackendResult<Vec<Value>> {
        let mut url = self.endpoint(&format!("rest/v1/{}", table))?;
        url.query_pairs_mut().extend_pairs(query_params(query));
        debug!(table, filters = query.filters.len(), "Selecting backend rows");

        let response = self
            .authed(self.client.get(url), access_token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn insert(&self, table: &str, row: Value, access_token: Option<&str>) -> BackendResult<Value> {
        let url = self.endpoint(&format!("rest/v1/{}", table))?;
        debug!(table, "Inserting backend row");

        let response = self
            .authed(self.client.post(url), access_token)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let rows: Vec<Value> = Self::check(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("insert into {} returned no row", table)))
    }
}
