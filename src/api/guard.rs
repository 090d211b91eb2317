//! Route guard for the dashboard.
//!
//! Runs in front of every request. Paths under the protected prefix need a
//! signed-in user; an authenticated request for the bare prefix is sent to
//! the landing section. Redirects use a relative `Location` and 303.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use super::extract::CurrentSession;
use crate::config::AuthConfig;
use crate::session::SESSION_COOKIE;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub protected_prefix: String,
    pub login_path: String,
    pub landing_path: String,
}

impl From<&AuthConfig> for GuardConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            protected_prefix: config.protected_prefix.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            landing_path: config.landing_path.clone(),
        }
    }
}

impl GuardConfig {
    pub fn protects(&self, path: &str) -> bool {
        match path.strip_prefix(self.protected_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn is_root(&self, path: &str) -> bool {
        path.strip_prefix(self.protected_prefix.as_str())
            .map_or(false, |rest| rest.is_empty() || rest == "/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    RedirectToLogin,
    RedirectToLanding,
}

pub fn decide(path: &str, has_user: bool, config: &GuardConfig) -> GuardDecision {
    if !config.protects(path) {
        return GuardDecision::Allow;
    }
    if !has_user {
        return GuardDecision::RedirectToLogin;
    }
    if config.is_root(path) {
        GuardDecision::RedirectToLanding
    } else {
        GuardDecision::Allow
    }
}

pub async fn guard_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let config = GuardConfig::from(&state.config.auth);
    let path = request.uri().path().to_string();
    if !config.protects(&path) {
        return next.run(request).await;
    }

    let current = match jar.get(SESSION_COOKIE) {
        Some(cookie) => {
            let sid = cookie.value().to_string();
            state
                .accounts
                .current_user(&sid)
                .await
                .map(|(session, user)| CurrentSession { sid, session, user })
        }
        None => None,
    };

    match decide(&path, current.is_some(), &config) {
        GuardDecision::Allow => {
            if let Some(current) = current {
                request.extensions_mut().insert(current);
            }
            next.run(request).await
        }
        GuardDecision::RedirectToLogin => {
            tracing::debug!(path = %path, "No session, redirecting to login");
            Redirect::to(&config.login_path).into_response()
        }
        GuardDecision::RedirectToLanding => Redirect::to(&config.landing_path).into_response(),
    }
}
