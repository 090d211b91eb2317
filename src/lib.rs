pub mod accounts;
pub mod api;
pub mod backend;
pub mod brands;
pub mod config;
pub mod expenses;
pub mod forms;
pub mod notifications;
pub mod preferences;
pub mod relay;
pub mod sections;
pub mod session;
pub mod startup;

use chrono::Duration;
use config::Config;
use std::sync::Arc;

use crate::accounts::AccountService;
use crate::api::rate_limit::RateLimiter;
use crate::backend::BackendClient;
use crate::brands::PageCache;
use crate::expenses::LedgerBook;
use crate::forms::SubmitGuard;
use crate::notifications::ToastCenter;
use crate::relay::ContactRelay;
use crate::session::SessionStore;

pub struct AppState {
    pub config: Config,
    pub backend: Arc<dyn BackendClient>,
    pub sessions: Arc<SessionStore>,
    pub accounts: AccountService,
    pub submissions: SubmitGuard,
    pub toasts: Arc<ToastCenter>,
    pub ledgers: Arc<LedgerBook>,
    pub pages: Arc<PageCache>,
    pub relay: Arc<dyn ContactRelay>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: Config,
        backend: Arc<dyn BackendClient>,
        relay: Arc<dyn ContactRelay>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(Duration::days(config.auth.session_days)));
        let accounts = AccountService::new(backend.clone(), sessions.clone());
        let toasts = Arc::new(ToastCenter::new(std::time::Duration::from_millis(
            config.notifications.ttl_ms,
        )));
        let pages = Arc::new(PageCache::new(std::time::Duration::from_secs(
            config.pages.cache_ttl_secs,
        )));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            backend,
            sessions,
            accounts,
            submissions: SubmitGuard::new(),
            toasts,
            ledgers: Arc::new(LedgerBook::new()),
            pages,
            relay,
            rate_limiter,
        }
    }
}
