//! Request extractors and cookie helpers shared by the handlers.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequest, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::ApiError;
use crate::backend::{Session, User};
use crate::config::Config;
use crate::forms::FormValues;
use crate::session::SESSION_COOKIE;
use crate::AppState;

/// Cookie identifying the browser for toasts and in-flight submissions
pub const VISITOR_COOKIE: &str = "fff_vid";
/// Short-lived cookie holding the PKCE verifier during an OAuth sign-in
pub const PKCE_COOKIE: &str = "fff_pkce";

const VISITOR_MAX_AGE_DAYS: i64 = 365;
const PKCE_MAX_AGE_MINUTES: i64 = 10;

// =============================================================================
// VISITOR
// =============================================================================

/// Anonymous browser identity, present on every `/api` and `/auth` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visitor(pub String);

impl Visitor {
    pub fn id(&self) -> &str {
        &self.0
    }
}

fn is_visitor_id(value: &str) -> bool {
    !value.is_empty() && value.len() <= 64 && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Reuse the visitor cookie, or issue one on the response
pub async fn visitor_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(id) = jar.get(VISITOR_COOKIE).map(|c| c.value()).filter(|v| is_visitor_id(v)) {
        request.extensions_mut().insert(Visitor(id.to_string()));
        return next.run(request).await;
    }

    let id = uuid::Uuid::new_v4().simple().to_string();
    request.extensions_mut().insert(Visitor(id.clone()));
    let response = next.run(request).await;
    let cookie = Cookie::build((VISITOR_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.server.secure_cookies)
        .max_age(time::Duration::days(VISITOR_MAX_AGE_DAYS));
    (jar.add(cookie), response).into_response()
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Visitor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Visitor>()
            .cloned()
            .ok_or_else(|| ApiError::internal("Visitor layer is not installed"))
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Signed-in user of the request. Rejects with 401 when there is none.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub sid: String,
    pub session: Session,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Already resolved by the route guard
        if let Some(current) = parts.extensions.get::<CurrentSession>() {
            return Ok(current.clone());
        }

        let jar = CookieJar::from_headers(&parts.headers);
        let sid = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or_else(|| ApiError::unauthorized("You need to sign in first"))?;
        let (session, user) = state
            .accounts
            .current_user(&sid)
            .await
            .ok_or_else(|| ApiError::unauthorized("Your session has expired, please sign in again"))?;
        Ok(Self { sid, session, user })
    }
}

pub fn session_cookie(sid: String, config: &Config) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, sid))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.server.secure_cookies)
        .max_age(time::Duration::days(config.auth.session_days))
        .build()
}

pub fn pkce_cookie(verifier: String, config: &Config) -> Cookie<'static> {
    Cookie::build((PKCE_COOKIE, verifier))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.server.secure_cookies)
        .max_age(time::Duration::minutes(PKCE_MAX_AGE_MINUTES))
        .build()
}

/// Matches the attributes `name` was set with, for `CookieJar::remove`
pub fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

// =============================================================================
// FORM INPUT
// =============================================================================

/// JSON object of form fields. Scalars are read as the text the user typed.
#[derive(Debug, Clone, Default)]
pub struct FormInput(pub FormValues);

#[async_trait]
impl<S: Send + Sync> FromRequest<S> for FormInput {
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(raw) = Json::<HashMap<String, Value>>::from_request(request, state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        let values = raw
            .into_iter()
            .map(|(name, value)| (name, as_text(value)))
            .collect();
        Ok(Self(values))
    }
}

fn as_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Trimmed value of a field, empty when absent
pub fn field<'a>(values: &'a FormValues, name: &str) -> &'a str {
    values.get(name).map(|v| v.trim()).unwrap_or_default()
}

/// Untrimmed value of a field, for secrets
pub fn raw<'a>(values: &'a FormValues, name: &str) -> &'a str {
    values.get(name).map(String::as_str).unwrap_or_default()
}
