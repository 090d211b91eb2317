//! Account endpoints: sign-in, sign-up, sign-out, password reset and OAuth.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::extract::{field, pkce_cookie, raw, removal, session_cookie, CurrentSession, FormInput, Visitor, PKCE_COOKIE};
use super::submit::submit;
use super::ApiError;
use crate::accounts::{SignUpOutcome, SignUpRequest};
use crate::backend::User;
use crate::forms::{schemas, FormStatus};
use crate::session::SESSION_COOKIE;
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: String,
    pub email_confirmed: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            display_name: user.display_name(),
            email_confirmed: user.email_confirmed_at.is_some(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserView,
    /// The client navigates here after `redirect_after_ms`
    pub redirect_to: String,
    pub redirect_after_ms: u64,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    jar: CookieJar,
    FormInput(values): FormInput,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let schema = schemas::login();
    let outcome = submit(&state, &visitor, &schema, &values, async {
        state
            .accounts
            .sign_in(field(&values, "email"), raw(&values, "password"))
            .await
            .map_err(ApiError::from)
    })
    .await?;

    if let Some(Err(err)) = &outcome.reconciled {
        state.toasts.error(visitor.id(), err.to_string());
    }
    state.toasts.success(visitor.id(), "Signed in successfully");

    // A browser holds one session at a time
    if let Some(previous) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(previous.value());
    }
    let jar = jar.add(session_cookie(outcome.sid, &state.config));
    Ok((
        jar,
        Json(LoginResponse {
            user: UserView::from(&outcome.user),
            redirect_to: state.config.forms.after_login_path.clone(),
            redirect_after_ms: state.config.forms.login_redirect_delay_ms,
        }),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignUpStatus {
    Complete,
    ConfirmationPending,
    ProfilePending,
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub status: SignUpStatus,
    pub user: Option<UserView>,
    pub message: String,
}

pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    jar: CookieJar,
    FormInput(values): FormInput,
) -> Result<(StatusCode, CookieJar, Json<SignUpResponse>), ApiError> {
    let schema = schemas::sign_up();
    let request = SignUpRequest {
        first_name: field(&values, "first_name").to_string(),
        last_name: field(&values, "last_name").to_string(),
        email: field(&values, "email").to_string(),
        password: raw(&values, "password").to_string(),
    };
    let outcome = submit(&state, &visitor, &schema, &values, async {
        state.accounts.sign_up(request).await.map_err(ApiError::from)
    })
    .await?;

    let (status, user, sid, message) = match outcome {
        SignUpOutcome::Complete { sid, user } => {
            let message = "Account created successfully".to_string();
            state.toasts.success(visitor.id(), message.clone());
            (SignUpStatus::Complete, Some(user), Some(sid), message)
        }
        SignUpOutcome::ConfirmationPending { .. } => {
            let message = "Check your email to confirm your account".to_string();
            state.toasts.info(visitor.id(), message.clone());
            (SignUpStatus::ConfirmationPending, None, None, message)
        }
        SignUpOutcome::ProfilePending { sid, user, error } => {
            let message = error.to_string();
            state.toasts.error(visitor.id(), message.clone());
            (SignUpStatus::ProfilePending, Some(user), sid, message)
        }
    };

    let jar = match sid {
        Some(sid) => jar.add(session_cookie(sid, &state.config)),
        None => jar,
    };
    Ok((
        StatusCode::CREATED,
        jar,
        Json(SignUpResponse {
            status,
            user: user.as_ref().map(UserView::from),
            message,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub signed_out: bool,
    /// Pending submissions whose results will be discarded
    pub cancelled_submissions: usize,
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    let cancelled = state.submissions.cancel_owner(visitor.id());
    let mut signed_out = false;

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let sid = cookie.value().to_string();
        match state.accounts.sign_out(&sid).await {
            Ok(user) => {
                signed_out = user.is_some();
                state.toasts.success(visitor.id(), "Signed out");
            }
            Err(err) => {
                // The local session is already gone
                signed_out = true;
                tracing::warn!(error = %err, "Backend sign-out failed");
                state.toasts.error(visitor.id(), err.to_string());
            }
        }
    }

    (
        jar.remove(removal(SESSION_COOKIE)),
        Json(LogoutResponse {
            signed_out,
            cancelled_submissions: cancelled,
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub sent: bool,
}

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    FormInput(values): FormInput,
) -> Result<Json<ResetResponse>, ApiError> {
    let schema = schemas::forgot_password();
    let redirect_to = state.config.server.url_for(&state.config.auth.reset_redirect_path);
    submit(&state, &visitor, &schema, &values, async {
        state
            .accounts
            .request_password_reset(field(&values, "email"), &redirect_to)
            .await
            .map_err(ApiError::from)
    })
    .await?;

    state
        .toasts
        .success(visitor.id(), "Password reset email sent. Check your inbox.");
    Ok(Json(ResetResponse { sent: true }))
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub user: UserView,
    /// Sign-up succeeded but the profile row is still missing
    pub profile_pending: bool,
}

pub async fn session(
    State(state): State<Arc<AppState>>,
    current: Option<CurrentSession>,
) -> Json<Option<SessionView>> {
    Json(current.map(|current| {
        let profile_pending = state.accounts.reconciler().get(&current.user.id).is_some();
        SessionView {
            user: UserView::from(&current.user),
            profile_pending,
        }
    }))
}

pub async fn form_status(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    Path(form): Path<String>,
) -> Result<Json<FormStatus>, ApiError> {
    let schema = schemas::by_name(&form).ok_or_else(|| ApiError::not_found("Unknown form"))?;
    Ok(Json(state.submissions.status(visitor.id(), schema.name)))
}

pub async fn oauth_start(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(provider): Path<String>,
) -> Result<(CookieJar, Redirect), ApiError> {
    if !state.config.auth.oauth_providers.iter().any(|p| p == &provider) {
        return Err(ApiError::not_found(format!("Unknown sign-in provider: {}", provider)));
    }
    let redirect_to = state.config.server.url_for(&state.config.auth.oauth_callback_path);
    let start = state.accounts.start_oauth(&provider, &redirect_to)?;
    tracing::debug!(provider = %provider, "Starting OAuth sign-in");
    Ok((
        jar.add(pkce_cookie(start.verifier, &state.config)),
        Redirect::to(&start.url),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    jar: CookieJar,
    Query(params): Query<CallbackQuery>,
) -> (CookieJar, Redirect) {
    let login = Redirect::to(&state.config.auth.login_path);
    let verifier = jar.get(PKCE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(removal(PKCE_COOKIE));

    if let Some(description) = params.error_description.or(params.error) {
        tracing::warn!(error = %description, "OAuth provider returned an error");
        state.toasts.error(visitor.id(), description);
        return (jar, login);
    }
    let (Some(code), Some(verifier)) = (params.code, verifier) else {
        state
            .toasts
            .error(visitor.id(), "The sign-in link is invalid or has expired");
        return (jar, login);
    };

    match state.accounts.complete_oauth(&code, &verifier).await {
        Ok(outcome) => {
            state.toasts.success(visitor.id(), "Signed in successfully");
            (
                jar.add(session_cookie(outcome.sid, &state.config)),
                Redirect::to(&state.config.forms.after_login_path),
            )
        }
        Err(err) => {
            tracing::warn!(error = %err, "OAuth code exchange failed");
            state.toasts.error(visitor.id(), err.to_string());
            (jar, login)
        }
    }
}
