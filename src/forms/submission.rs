//! In-flight submission tracking.
//!
//! A form instance (one browser, one form) may have at most one pending
//! submission. `SubmitGuard::begin` hands out a `SubmitPermit`; while it is
//! alive further attempts are refused before any backend call is made.
//! Every permit carries a cancellation token so a sign-out or navigation can
//! discard responses that arrive late.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormKey {
    /// Browser the form lives in
    pub owner: String,
    pub form: &'static str,
}

impl FormKey {
    pub fn new(owner: impl Into<String>, form: &'static str) -> Self {
        Self {
            owner: owner.into(),
            form,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("A submission of this form is already in progress")]
    AlreadySubmitting,
    #[error("The submission was cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct Pending {
    id: u64,
    token: CancellationToken,
    busy_label: &'static str,
    started_at: Instant,
}

/// What the submit control should show
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormStatus {
    pub form: &'static str,
    pub submitting: bool,
    /// Busy label while a submission is pending; the control is disabled meanwhile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_label: Option<&'static str>,
}

#[derive(Debug, Default)]
pub struct SubmitGuard {
    pending: Arc<DashMap<FormKey, Pending>>,
    next_id: AtomicU64,
}

impl SubmitGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the form instance for one submission
    pub fn begin(&self, key: FormKey, busy_label: &'static str) -> Result<SubmitPermit, SubmitError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(form = key.form, "Submission refused, one already pending");
                Err(SubmitError::AlreadySubmitting)
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    id,
                    token: token.clone(),
                    busy_label,
                    started_at: Instant::now(),
                });
                Ok(SubmitPermit {
                    key,
                    id,
                    token,
                    pending: self.pending.clone(),
                })
            }
        }
    }

    pub fn status(&self, owner: &str, form: &'static str) -> FormStatus {
        let key = FormKey::new(owner, form);
        match self.pending.get(&key) {
            Some(pending) => FormStatus {
                form,
                submitting: true,
                submit_label: Some(pending.busy_label),
            },
            None => FormStatus {
                form,
                submitting: false,
                submit_label: None,
            },
        }
    }

    /// Cancel every pending submission of one browser; returns how many were cancelled
    pub fn cancel_owner(&self, owner: &str) -> usize {
        let mut cancelled = 0;
        for entry in self.pending.iter().filter(|entry| entry.key().owner == owner) {
            tracing::debug!(
                form = entry.key().form,
                pending_ms = entry.started_at.elapsed().as_millis() as u64,
                "Cancelling pending submission"
            );
            entry.token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// Exclusive right to submit one form instance. Dropping it re-enables the form.
#[derive(Debug)]
pub struct SubmitPermit {
    key: FormKey,
    id: u64,
    token: CancellationToken,
    pending: Arc<DashMap<FormKey, Pending>>,
}

impl SubmitPermit {
    pub fn key(&self) -> &FormKey {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drive a backend call, discarding its result if the permit is cancelled first
    pub async fn run<F, T>(&self, call: F) -> Result<T, SubmitError>
    where
        F: Future<Output = T>,
    {
        let output = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(SubmitError::Cancelled),
            output = call => output,
        };
        if self.token.is_cancelled() {
            return Err(SubmitError::Cancelled);
        }
        Ok(output)
    }
}

impl Drop for SubmitPermit {
    fn drop(&mut self) {
        let id = self.id;
        self.pending.remove_if(&self.key, |_, pending| pending.id == id);
    }
}
