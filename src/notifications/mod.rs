//! Transient notifications ("toasts").
//!
//! Each browser has a queue of short-lived messages. A toast is visible for a
//! fixed interval after it is raised and is then dismissed automatically.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub id: u64,
    pub level: ToastLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Milliseconds left before the toast is dismissed
    pub dismiss_in_ms: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    level: ToastLevel,
    message: String,
    created_at: DateTime<Utc>,
    raised: Instant,
}

#[derive(Debug)]
pub struct ToastCenter {
    queues: DashMap<String, Vec<Entry>>,
    ttl: Duration,
    next_id: AtomicU64,
}

impl ToastCenter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            queues: DashMap::new(),
            ttl,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn push(&self, owner: &str, level: ToastLevel, message: impl Into<String>) -> Toast {
        let entry = Entry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            level,
            message: message.into(),
            created_at: Utc::now(),
            raised: Instant::now(),
        };
        let toast = self.view(&entry);
        self.queues.entry(owner.to_string()).or_default().push(entry);
        toast
    }

    pub fn success(&self, owner: &str, message: impl Into<String>) -> Toast {
        self.push(owner, ToastLevel::Success, message)
    }

    pub fn error(&self, owner: &str, message: impl Into<String>) -> Toast {
        self.push(owner, ToastLevel::Error, message)
    }

    pub fn info(&self, owner: &str, message: impl Into<String>) -> Toast {
        self.push(owner, ToastLevel::Info, message)
    }

    fn view(&self, entry: &Entry) -> Toast {
        Toast {
            id: entry.id,
            level: entry.level,
            message: entry.message.clone(),
            created_at: entry.created_at,
            dismiss_in_ms: self.ttl.saturating_sub(entry.raised.elapsed()).as_millis() as u64,
        }
    }

    fn alive(&self, entry: &Entry) -> bool {
        entry.raised.elapsed() < self.ttl
    }

    /// Toasts still visible for a browser, oldest first
    pub fn active(&self, owner: &str) -> Vec<Toast> {
        self.queues
            .get(owner)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|e| self.alive(e))
                    .map(|e| self.view(e))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hand the visible toasts to the client and clear the queue
    pub fn drain(&self, owner: &str) -> Vec<Toast> {
        match self.queues.remove(owner) {
            Some((_, queue)) => queue
                .iter()
                .filter(|e| self.alive(e))
                .map(|e| self.view(e))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn dismiss(&self, owner: &str, id: u64) -> bool {
        match self.queues.get_mut(owner) {
            Some(mut queue) => {
                let before = queue.len();
                queue.retain(|e| e.id != id);
                queue.len() != before
            }
            None => false,
        }
    }

    /// Remove expired toasts and empty queues
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        for mut queue in self.queues.iter_mut() {
            let before = queue.len();
            queue.retain(|e| e.raised.elapsed() < self.ttl);
            removed += before - queue.len();
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        removed
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }
}

pub fn spawn_prune_task(center: Arc<ToastCenter>, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            let removed = center.prune();
            tracing::debug!(removed, queues = center.queue_count(), "Toast cleanup complete");
        }
    });
}
