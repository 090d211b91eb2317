//! Account flows: sign-up, sign-in, sign-out, password reset and OAuth.
//!
//! Sign-up writes twice: the auth record first, then the `profiles` row. The
//! backend offers no transaction spanning both, so a failed profile insert
//! leaves an auth account without a profile. That state is recorded as a
//! `PendingProfile` under the backend user id and retried the next time
//! that user signs in.

mod pkce;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::backend::{tables, BackendClient, BackendError, BackendResult, Query, Session, User, UserMetadata};
use crate::session::SessionStore;

pub use pkce::PkcePair;

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug)]
pub enum SignUpOutcome {
    /// Account and profile exist; the browser is signed in
    Complete { sid: String, user: User },
    /// The backend is waiting for the user to confirm their address
    ConfirmationPending { email: String },
    /// The auth account exists but its profile row could not be written
    ProfilePending {
        sid: Option<String>,
        user: User,
        error: BackendError,
    },
}

#[derive(Debug)]
pub struct SignInOutcome {
    pub sid: String,
    pub user: User,
    /// Result of retrying a deferred profile insert, when one was pending
    pub reconciled: Option<BackendResult<()>>,
}

/// Maximum age of a deferred profile; confirmation links are long expired by then
const PENDING_PROFILE_TTL_DAYS: i64 = 7;
/// Failed retries after which a deferred profile is given up
const MAX_RECONCILE_ATTEMPTS: u32 = 3;

/// An auth account whose `profiles` row still has to be written.
///
/// Only the backend user id is kept. The row itself is built from the
/// signed-in user at reconcile time, never from what the sign-up form sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingProfile {
    pub user_id: String,
    pub since: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl PendingProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            since: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }
}

/// Deferred profile inserts, keyed by backend user id
#[derive(Debug, Default)]
pub struct ProfileReconciler {
    pending: DashMap<String, PendingProfile>,
}

impl ProfileReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&self, profile: PendingProfile) {
        self.prune(Utc::now());
        self.pending.insert(profile.user_id.clone(), profile);
    }

    pub fn get(&self, user_id: &str) -> Option<PendingProfile> {
        self.pending.get(user_id).map(|p| p.clone())
    }

    /// Drop entries deferred longer ago than the pending TTL; returns how many
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(PENDING_PROFILE_TTL_DAYS);
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.since > cutoff);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write the pending profile for a signed-in user, if there is one
    pub async fn reconcile(
        &self,
        backend: &dyn BackendClient,
        session: &Session,
    ) -> Option<BackendResult<()>> {
        let user = &session.user;
        if !self.pending.contains_key(&user.id) {
            return None;
        }
        let row = profile_row(
            &user.id,
            user.first_name.as_deref().unwrap_or_default(),
            user.last_name.as_deref().unwrap_or_default(),
            user.email.as_deref().unwrap_or_default(),
        );

        let result = backend
            .insert(tables::PROFILES, row, Some(&session.access_token))
            .await
            .map(|_| ());
        match &result {
            Ok(()) => {
                self.pending.remove(&user.id);
                tracing::info!(user_id = %user.id, "Deferred profile created");
            }
            Err(err) => {
                let attempts = self.pending.get_mut(&user.id).map(|mut entry| {
                    entry.attempts += 1;
                    entry.last_error = Some(err.to_string());
                    entry.attempts
                });
                if attempts.map_or(false, |n| n >= MAX_RECONCILE_ATTEMPTS) {
                    self.pending.remove(&user.id);
                    tracing::warn!(user_id = %user.id, error = %err, "Giving up on deferred profile");
                } else {
                    tracing::warn!(user_id = %user.id, error = %err, "Deferred profile insert failed again");
                }
            }
        }
        Some(result)
    }
}

fn profile_row(user_id: &str, first_name: &str, last_name: &str, email: &str) -> Value {
    json!({
        "id": user_id,
        "first_name": first_name,
        "last_name": last_name,
        "email": email,
    })
}

#[derive(Debug, Clone)]
pub struct OAuthStart {
    pub url: String,
    pub verifier: String,
}

pub struct AccountService {
    backend: Arc<dyn BackendClient>,
    sessions: Arc<SessionStore>,
    reconciler: ProfileReconciler,
}

impl AccountService {
    pub fn new(backend: Arc<dyn BackendClient>, sessions: Arc<SessionStore>) -> Self {
        Self {
            backend,
            sessions,
            reconciler: ProfileReconciler::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn BackendClient> {
        &self.backend
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn reconciler(&self) -> &ProfileReconciler {
        &self.reconciler
    }

    pub async fn sign_up(&self, request: SignUpRequest) -> BackendResult<SignUpOutcome> {
        let metadata = UserMetadata {
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
        };
        let email = request.email.trim().to_string();
        let response = self
            .backend
            .sign_up(&email, &request.password, &metadata)
            .await?;

        let (user, session) = match (response.user, response.session) {
            (Some(user), Some(session)) => (user, session),
            (user, _) => {
                // Written on the first sign-in after confirmation, from that
                // user's own metadata
                if let Some(user) = user {
                    self.reconciler.defer(PendingProfile::new(user.id));
                }
                tracing::info!("Sign-up awaiting e-mail confirmation");
                return Ok(SignUpOutcome::ConfirmationPending { email });
            }
        };

        let row = profile_row(&user.id, &metadata.first_name, &metadata.last_name, &email);
        let insert = self
            .backend
            .insert(tables::PROFILES, row, Some(&session.access_token))
            .await;
        let sid = self.sessions.create(session);

        match insert {
            Ok(_) => {
                tracing::info!(user_id = %user.id, "Account created");
                Ok(SignUpOutcome::Complete { sid, user })
            }
            Err(error) => {
                tracing::warn!(user_id = %user.id, error = %error, "Profile insert failed after sign-up");
                let mut pending = PendingProfile::new(user.id.clone());
                pending.last_error = Some(error.to_string());
                self.reconciler.defer(pending);
                Ok(SignUpOutcome::ProfilePending {
                    sid: Some(sid),
                    user,
                    error,
                })
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> BackendResult<SignInOutcome> {
        let session = self
            .backend
            .sign_in_with_password(email.trim(), password)
            .await?;
        Ok(self.establish(session).await)
    }

    async fn establish(&self, session: Session) -> SignInOutcome {
        let reconciled = self.reconciler.reconcile(self.backend.as_ref(), &session).await;
        let user = session.user.clone();
        let sid = self.sessions.create(session);
        tracing::info!(user_id = %user.id, "Signed in");
        SignInOutcome {
            sid,
            user,
            reconciled,
        }
    }

    /// Destroy the browser session. The local session is gone even when the
    /// backend revocation fails; that error is still returned.
    pub async fn sign_out(&self, sid: &str) -> BackendResult<Option<User>> {
        let Some(session) = self.sessions.remove(sid) else {
            return Ok(None);
        };
        self.backend.sign_out(&session.access_token).await?;
        tracing::info!(user_id = %session.user.id, "Signed out");
        Ok(Some(session.user))
    }

    pub async fn request_password_reset(&self, email: &str, redirect_to: &str) -> BackendResult<()> {
        self.backend
            .reset_password_for_email(email.trim(), redirect_to)
            .await
    }

    pub fn start_oauth(&self, provider: &str, redirect_to: &str) -> BackendResult<OAuthStart> {
        let pair = PkcePair::generate();
        let url = self
            .backend
            .oauth_authorize_url(provider, redirect_to, &pair.challenge)?;
        Ok(OAuthStart {
            url,
            verifier: pair.verifier,
        })
    }

    pub async fn complete_oauth(&self, code: &str, verifier: &str) -> BackendResult<SignInOutcome> {
        let session = self.backend.exchange_code_for_session(code, verifier).await?;
        Ok(self.establish(session).await)
    }

    /// Session for a browser id, refreshed through the backend when expired.
    /// A failed refresh ends the browser session.
    pub async fn current_session(&self, sid: &str) -> Option<Session> {
        let stored = self.sessions.get(sid)?;
        match self.backend.get_session(&stored).await {
            Ok(session) => {
                if session.access_token != stored.access_token {
                    self.sessions.replace_tokens(sid, session.clone());
                }
                Some(session)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Session refresh failed");
                if err.status().is_some() {
                    self.sessions.remove(sid);
                }
                None
            }
        }
    }

    /// User behind a browser id, checked with the backend. Any failure counts as signed out.
    pub async fn current_user(&self, sid: &str) -> Option<(Session, User)> {
        let session = self.current_session(sid).await?;
        match self.backend.get_user(&session.access_token).await {
            Ok(Some(user)) => {
                self.sessions.update_user(sid, user.clone());
                Some((session, user))
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "User lookup failed");
                None
            }
        }
    }

    /// Profile row of a user, if it exists
    pub async fn profile(&self, session: &Session) -> BackendResult<Option<Value>> {
        let rows = self
            .backend
            .select(
                tables::PROFILES,
                &Query::new().eq("id", session.user.id.clone()).limit(1),
                Some(&session.access_token),
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}
