//! Startup self-checks
//!
//! Runs before the server starts accepting requests:
//! - Backend credentials are present and the URL is usable
//! - Guard paths cannot redirect in a loop
//! - The backend answers its health endpoint
//! - The contact relay has an access key

use reqwest::Url;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::guard::{decide, GuardConfig, GuardDecision};
use crate::backend::SupabaseClient;
use crate::config::Config;

/// Result of a single startup check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Whether failure should abort startup
    pub critical: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            critical: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            passed: false,
            critical,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Aggregated startup check results
#[derive(Debug, Clone, Serialize)]
pub struct StartupCheckReport {
    pub checks: Vec<CheckResult>,
    pub all_critical_passed: bool,
    pub all_passed: bool,
    pub summary: String,
}

impl StartupCheckReport {
    pub fn new(checks: Vec<CheckResult>) -> Self {
        let all_critical_passed = checks.iter().filter(|c| c.critical).all(|c| c.passed);
        let all_passed = checks.iter().all(|c| c.passed);

        let failed_critical = checks.iter().filter(|c| c.critical && !c.passed).count();
        let failed_non_critical = checks.iter().filter(|c| !c.critical && !c.passed).count();
        let total = checks.len();
        let passed = checks.iter().filter(|c| c.passed).count();

        let summary = if all_passed {
            format!("All {} startup checks passed", total)
        } else if all_critical_passed {
            format!(
                "{}/{} checks passed ({} non-critical warnings)",
                passed, total, failed_non_critical
            )
        } else {
            format!(
                "{}/{} checks passed ({} critical failures)",
                passed, total, failed_critical
            )
        };

        Self {
            checks,
            all_critical_passed,
            all_passed,
            summary,
        }
    }
}

/// Run all startup self-checks. `backend` is `None` when the client could not be built.
pub async fn run_startup_checks(config: &Config, backend: Option<&SupabaseClient>) -> StartupCheckReport {
    info!("Running startup self-checks...");

    let checks = vec![
        check_backend_credentials(config),
        check_backend_url(config),
        check_guard_paths(config),
        check_backend_health(backend).await,
        check_contact_relay(config),
    ];

    let report = StartupCheckReport::new(checks);

    for check in &report.checks {
        if check.passed {
            info!(check = %check.name, message = %check.message, "Startup check PASSED");
        } else if check.critical {
            error!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (CRITICAL)"
            );
        } else {
            warn!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (non-critical)"
            );
        }
    }

    info!(
        summary = %report.summary,
        all_passed = report.all_passed,
        all_critical_passed = report.all_critical_passed,
        "Startup checks completed"
    );

    report
}

fn check_backend_credentials(config: &Config) -> CheckResult {
    match config.backend.ensure_present() {
        Ok(()) => CheckResult::pass("backend_credentials", "Backend URL and anon key are set"),
        Err(e) => CheckResult::fail("backend_credentials", "Backend credentials are missing", true)
            .with_details(e.to_string()),
    }
}

fn check_backend_url(config: &Config) -> CheckResult {
    match Url::parse(config.backend.url.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            CheckResult::pass("backend_url", format!("Backend at {}", url))
        }
        Ok(url) => CheckResult::fail("backend_url", "Backend URL must use http or https", true)
            .with_details(format!("scheme: {}", url.scheme())),
        Err(e) => CheckResult::fail("backend_url", "Backend URL is not a valid URL", true)
            .with_details(e.to_string()),
    }
}

/// The login page must be public and the landing page must be served
/// without a further redirect.
fn check_guard_paths(config: &Config) -> CheckResult {
    let guard = GuardConfig::from(&config.auth);
    if decide(&guard.login_path, false, &guard) != GuardDecision::Allow {
        return CheckResult::fail("guard_paths", "Login path is behind the route guard", true)
            .with_details(format!("{} is under {}", guard.login_path, guard.protected_prefix));
    }
    if decide(&guard.landing_path, true, &guard) != GuardDecision::Allow {
        return CheckResult::fail("guard_paths", "Landing path redirects again", true)
            .with_details(guard.landing_path);
    }
    CheckResult::pass(
        "guard_paths",
        format!("{} requires a session", guard.protected_prefix),
    )
}

async fn check_backend_health(backend: Option<&SupabaseClient>) -> CheckResult {
    let Some(backend) = backend else {
        return CheckResult::fail("backend_health", "Backend client not available", false);
    };
    match backend.health().await {
        Ok(()) => CheckResult::pass("backend_health", "Backend auth service is reachable"),
        Err(e) => CheckResult::fail("backend_health", "Backend auth service did not answer", false)
            .with_details(e.to_string()),
    }
}

fn check_contact_relay(config: &Config) -> CheckResult {
    let configured = config
        .contact
        .access_key
        .as_deref()
        .map_or(false, |key| !key.trim().is_empty());
    if configured {
        CheckResult::pass("contact_relay", "Contact relay access key is set")
    } else {
        CheckResult::fail("contact_relay", "Contact form is disabled", false)
            .with_details("set CONTACT_RELAY_ACCESS_KEY or [contact] access_key")
    }
}
