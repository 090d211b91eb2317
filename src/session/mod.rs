//! Server-side session store.
//!
//! The browser only holds an opaque session id (`fff_sid` cookie). Tokens
//! issued by the backend live here, and this store is the single writer of
//! that state. Readers learn about changes through `subscribe()`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::backend::{Session, User};

/// Cookie carrying the browser session id
pub const SESSION_COOKIE: &str = "fff_sid";

const EVENT_CAPACITY: usize = 256;

/// Change notification published by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { sid: String, user_id: String },
    SignedOut { sid: String, user_id: String },
    TokenRefreshed { sid: String, user_id: String },
    UserUpdated { sid: String, user_id: String },
}

impl AuthEvent {
    pub fn sid(&self) -> &str {
        match self {
            AuthEvent::SignedIn { sid, .. }
            | AuthEvent::SignedOut { sid, .. }
            | AuthEvent::TokenRefreshed { sid, .. }
            | AuthEvent::UserUpdated { sid, .. } => sid,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionRecord {
    session: Session,
    /// End of the browser session, independent of access token expiry
    expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    records: DashMap<String, SessionRecord>,
    events: broadcast::Sender<AuthEvent>,
    lifetime: Duration,
}

/// Receiving end of the store's notifications. Dropping it unsubscribes.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    /// Wait for the next event. Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Auth subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

fn generate_sid() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl SessionStore {
    pub fn new(lifetime: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: DashMap::new(),
            events,
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn subscribe(&self) -> AuthSubscription {
        AuthSubscription {
            rx: self.events.subscribe(),
        }
    }

    /// Live subscription handles
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn publish(&self, event: AuthEvent) {
        // No receivers is not an error
        let _ = self.events.send(event);
    }

    /// Store a fresh session and return the new browser session id
    pub fn create(&self, session: Session) -> String {
        let sid = generate_sid();
        let user_id = session.user.id.clone();
        self.records.insert(
            sid.clone(),
            SessionRecord {
                session,
                expires_at: Utc::now() + self.lifetime,
            },
        );
        tracing::debug!(user_id = %user_id, "Session created");
        self.publish(AuthEvent::SignedIn { sid: sid.clone(), user_id });
        sid
    }

    /// Session for a browser id; expired browser sessions are dropped on read
    pub fn get(&self, sid: &str) -> Option<Session> {
        {
            let record = self.records.get(sid)?;
            if record.expires_at > Utc::now() {
                return Some(record.session.clone());
            }
        }
        self.remove(sid);
        None
    }

    /// Swap in tokens refreshed by the backend adapter
    pub fn replace_tokens(&self, sid: &str, session: Session) -> bool {
        let Some(mut record) = self.records.get_mut(sid) else {
            return false;
        };
        let user_id = session.user.id.clone();
        record.session = session;
        drop(record);
        self.publish(AuthEvent::TokenRefreshed {
            sid: sid.to_string(),
            user_id,
        });
        true
    }

    pub fn update_user(&self, sid: &str, user: User) -> bool {
        let Some(mut record) = self.records.get_mut(sid) else {
            return false;
        };
        if record.session.user == user {
            return true;
        }
        let user_id = user.id.clone();
        record.session.user = user;
        drop(record);
        self.publish(AuthEvent::UserUpdated {
            sid: sid.to_string(),
            user_id,
        });
        true
    }

    pub fn remove(&self, sid: &str) -> Option<Session> {
        let (_, record) = self.records.remove(sid)?;
        self.publish(AuthEvent::SignedOut {
            sid: sid.to_string(),
            user_id: record.session.user.id.clone(),
        });
        Some(record.session)
    }

    /// Drop browser sessions past their lifetime
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for sid in &expired {
            self.remove(sid);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Periodically prune expired browser sessions
pub fn spawn_prune_task(store: Arc<SessionStore>, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            let pruned = store.prune_expired();
            if pruned > 0 {
                tracing::debug!(pruned, remaining = store.len(), "Pruned expired sessions");
            }
        }
    });
}
