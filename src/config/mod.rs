use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Environment variables holding the backend URL, in lookup order.
const URL_VARS: [&str; 2] = ["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"];
/// Environment variables holding the backend anon key, in lookup order.
const ANON_KEY_VARS: [&str; 2] = ["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"];
const RELAY_KEY_VAR: &str = "CONTACT_RELAY_ACCESS_KEY";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing backend credential: {0} (set it in the environment or the [backend] section)")]
    MissingCredential(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub forms: FormsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub contact: ContactConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public origin of the site, used to build e-mail and OAuth redirect targets
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Set the Secure attribute on cookies (disable for plain-HTTP development)
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            secure_cookies: true,
        }
    }
}

impl ServerConfig {
    /// Absolute URL of a site path
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.public_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_true() -> bool {
    true
}

/// Credentials of the hosted backend. Both are public (anon) values.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
    /// Request timeout for backend calls in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

fn default_backend_timeout() -> u64 {
    10
}

impl BackendConfig {
    /// Fails when either credential is absent.
    pub fn ensure_present(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingCredential("SUPABASE_URL"));
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("SUPABASE_ANON_KEY"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Every path under this prefix requires a session
    #[serde(default = "default_protected_prefix")]
    pub protected_prefix: String,
    /// Where an authenticated request for the bare prefix is sent
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
    /// Login entry point for unauthenticated requests
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Lifetime of the browser session cookie in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
    /// Page the password reset e-mail links to (relative to public_url)
    #[serde(default = "default_reset_redirect")]
    pub reset_redirect_path: String,
    /// OAuth callback path (relative to public_url)
    #[serde(default = "default_oauth_callback")]
    pub oauth_callback_path: String,
    /// Providers accepted for OAuth sign-in
    #[serde(default = "default_oauth_providers")]
    pub oauth_providers: Vec<String>,
    /// Seconds between sweeps of expired browser sessions
    #[serde(default = "default_session_prune_interval")]
    pub session_prune_interval: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            protected_prefix: default_protected_prefix(),
            landing_path: default_landing_path(),
            login_path: default_login_path(),
            session_days: default_session_days(),
            reset_redirect_path: default_reset_redirect(),
            oauth_callback_path: default_oauth_callback(),
            oauth_providers: default_oauth_providers(),
            session_prune_interval: default_session_prune_interval(),
        }
    }
}

fn default_protected_prefix() -> String {
    "/dashboard".to_string()
}

fn default_landing_path() -> String {
    "/dashboard/overview".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_session_days() -> i64 {
    7
}

fn default_reset_redirect() -> String {
    "/reset-password".to_string()
}

fn default_oauth_callback() -> String {
    "/auth/callback".to_string()
}

fn default_oauth_providers() -> Vec<String> {
    vec!["google".to_string(), "github".to_string()]
}

fn default_session_prune_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormsConfig {
    /// Delay the client waits before navigating after a successful login
    #[serde(default = "default_redirect_delay")]
    pub login_redirect_delay_ms: u64,
    /// Where the client navigates after a successful login
    #[serde(default = "default_after_login")]
    pub after_login_path: String,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            login_redirect_delay_ms: default_redirect_delay(),
            after_login_path: default_after_login(),
        }
    }
}

fn default_redirect_delay() -> u64 {
    1500
}

fn default_after_login() -> String {
    "/dashboard".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Toasts disappear after this many milliseconds
    #[serde(default = "default_toast_ttl")]
    pub ttl_ms: u64,
    /// Interval of the background pruning task in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_toast_ttl(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_toast_ttl() -> u64 {
    3000
}

fn default_cleanup_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactConfig {
    #[serde(default = "default_relay_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default = "default_contact_subject")]
    pub subject: String,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            endpoint: default_relay_endpoint(),
            access_key: None,
            subject: default_contact_subject(),
        }
    }
}

fn default_relay_endpoint() -> String {
    "https://api.web3forms.com/submit".to_string()
}

fn default_contact_subject() -> String {
    "New contact message from Fund For Found".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window for sign-in, sign-up, password reset and OAuth
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    /// Requests per window for the other form submissions
    #[serde(default = "default_form_requests")]
    pub form_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_rate_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`. Only
    /// enable behind a proxy that overwrites those headers.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_requests_per_window: default_auth_requests(),
            form_requests_per_window: default_form_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_rate_cleanup_interval(),
            trust_proxy_headers: false,
        }
    }
}

fn default_auth_requests() -> u32 {
    20
}

fn default_form_requests() -> u32 {
    60
}

fn default_window_seconds() -> u64 {
    60
}

fn default_rate_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagesConfig {
    /// Seconds a public brand page stays cached; tab switches within it are served from memory
    #[serde(default = "default_page_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_page_cache_ttl(),
        }
    }
}

fn default_page_cache_ttl() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
            forms: FormsConfig::default(),
            notifications: NotificationsConfig::default(),
            contact: ContactConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pages: PagesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the optional config file, then overlay credentials from the environment.
    ///
    /// Missing backend credentials are fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.backend.ensure_present()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Overlay environment values. The lookup is injected so tests stay hermetic.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        };
        if let Some(url) = first(&URL_VARS) {
            self.backend.url = url;
        }
        if let Some(key) = first(&ANON_KEY_VARS) {
            self.backend.anon_key = key;
        }
        if let Some(key) = first(&[RELAY_KEY_VAR]) {
            self.contact.access_key = Some(key);
        }
    }
}
