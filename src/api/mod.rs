pub mod auth;
mod brands;
mod contact;
mod dashboard;
pub mod error;
pub mod extract;
pub mod guard;
mod expenses;
mod notifications;
mod payouts;
mod preferences;
pub mod rate_limit;
mod submit;

pub use error::{ApiError, ErrorCode};

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Account endpoints, throttled on the auth tier
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/signup", post(auth::sign_up))
        .route("/forgot-password", post(auth::forgot_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ))
        .route("/logout", post(auth::logout))
        .route("/session", get(auth::session));

    let oauth_routes = Router::new()
        .route("/auth/oauth/:provider", get(auth::oauth_start))
        .route(&state.config.auth.oauth_callback_path, get(auth::oauth_callback))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    let form_routes = Router::new()
        .route("/contact", post(contact::send))
        // Expenses
        .route("/expenses", get(expenses::list).post(expenses::create))
        .route("/expenses/summary", get(expenses::summary))
        .route(
            "/expenses/:id",
            patch(expenses::update_amount).delete(expenses::remove),
        )
        // Brands
        .route("/brands", get(brands::list).post(brands::create))
        .route(
            "/brands/:brand/tiers",
            get(brands::list_tiers).post(brands::create_tier),
        )
        .route(
            "/brands/:brand/updates",
            get(brands::list_updates).post(brands::create_update),
        )
        // Payouts
        .route("/payouts", get(payouts::list).post(payouts::request))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_forms,
        ));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .merge(form_routes)
        .route("/forms/:form", get(auth::form_status))
        .route("/pages/:slug", get(brands::page))
        .route("/profile", get(dashboard::profile))
        .route("/notifications", get(notifications::drain))
        .route("/notifications/:id", delete(notifications::dismiss))
        .route(
            "/preferences",
            get(preferences::get).put(preferences::update),
        );

    // Everything a browser talks to directly carries a visitor id
    let visitor_routes = Router::new()
        .nest("/api", api_routes)
        .merge(oauth_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            extract::visitor_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/dashboard/:section", get(dashboard::section))
        .merge(visitor_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard::guard_middleware,
        ))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);
    match config
        .server
        .public_url
        .trim_end_matches('/')
        .parse::<HeaderValue>()
    {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            tracing::warn!("public_url is not a valid origin, cross-origin requests are refused");
            layer
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{tables, BackendClient, MemoryBackend, UserMetadata};
    use crate::relay::RecordingRelay;
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    const VISITOR: &str = "fff_vid=testvisitor1";

    struct Harness {
        app: Router,
        state: Arc<AppState>,
        backend: Arc<MemoryBackend>,
        relay: Arc<RecordingRelay>,
    }

    fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
        let mut config = Config::default();
        config.backend.url = "http://backend.test".to_string();
        config.backend.anon_key = "anon".to_string();
        config.server.secure_cookies = false;
        config.rate_limit.enabled = false;
        configure(&mut config);

        let backend = Arc::new(MemoryBackend::new());
        let relay = Arc::new(RecordingRelay::new());
        let state = Arc::new(AppState::new(config, backend.clone(), relay.clone()));
        crate::expenses::spawn_discard_task(state.ledgers.clone(), state.sessions.subscribe());
        Harness {
            app: create_router(state.clone()),
            state,
            backend,
            relay,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn get(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("cookie", cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn send_json(method: &str, uri: &str, cookie: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("cookie", cookie)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn forgot_password_from(forwarded_for: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/auth/forgot-password")
            .header("cookie", VISITOR)
            .header("content-type", "application/json")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::from(json!({ "email": "bad" }).to_string()))
            .unwrap()
    }

    /// Wait for background tasks to catch up
    async fn settle(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    async fn toasts(h: &Harness) -> Value {
        body_json(
            h.app
                .clone()
                .oneshot(get("/api/notifications", VISITOR))
                .await
                .unwrap(),
        )
        .await
    }

    async fn user_id(h: &Harness, cookie: &str) -> String {
        let current = body_json(
            h.app
                .clone()
                .oneshot(get("/api/auth/session", cookie))
                .await
                .unwrap(),
        )
        .await;
        current["user"]["id"].as_str().unwrap().to_string()
    }

    fn sid_of(cookie: &str) -> String {
        cookie
            .split("; ")
            .find_map(|c| c.strip_prefix("fff_sid="))
            .unwrap()
            .to_string()
    }

    fn location(response: &Response<Body>) -> &str {
        response.headers()["location"].to_str().unwrap()
    }

    /// `name=value` pairs of every Set-Cookie header
    fn set_cookies(response: &Response<Body>) -> Vec<String> {
        response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::to_string)
            .collect()
    }

    fn credentials() -> Value {
        json!({ "email": "ada@example.com", "password": "secret1" })
    }

    /// Sign in and return the cookie header for further requests
    async fn signed_in(h: &Harness) -> String {
        h.backend.seed_account(
            "ada@example.com",
            "secret1",
            &UserMetadata {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
            },
        );
        let response = h
            .app
            .clone()
            .oneshot(send_json("POST", "/api/auth/login", VISITOR, credentials()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let sid = set_cookies(&response)
            .into_iter()
            .find(|c| c.starts_with("fff_sid="))
            .unwrap();
        format!("{}; {}", VISITOR, sid)
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let response = h.app.oneshot(get("/health", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_path_without_session_redirects_to_login() {
        let h = harness();
        for uri in ["/dashboard", "/dashboard/overview", "/dashboard/expenses"] {
            let response = h.app.clone().oneshot(get(uri, "")).await.unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{}", uri);
            assert_eq!(location(&response), "/login");
            assert!(set_cookies(&response).is_empty());
        }

        // An unknown session id is the same as none
        let response = h
            .app
            .clone()
            .oneshot(get("/dashboard/overview", "fff_sid=deadbeef"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(h.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_dashboard_root_redirects_to_landing_without_loop() {
        let h = harness();
        let cookie = signed_in(&h).await;

        let response = h.app.clone().oneshot(get("/dashboard", &cookie)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard/overview");
        assert!(set_cookies(&response).is_empty());

        let response = h
            .app
            .clone()
            .oneshot(get("/dashboard/overview", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["active"], "overview");
        assert_eq!(body["user"]["display_name"], "Ada Lovelace");
        let active: Vec<_> = body["sections"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|s| s["active"] == true)
            .collect();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_section_is_not_found() {
        let h = harness();
        let cookie = signed_in(&h).await;
        let response = h
            .app
            .clone()
            .oneshot(get("/dashboard/nope", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_login_sets_session_and_redirect_hint() {
        let h = harness();
        h.backend
            .seed_account("ada@example.com", "secret1", &UserMetadata::default());
        let response = h
            .app
            .clone()
            .oneshot(send_json("POST", "/api/auth/login", VISITOR, credentials()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response).iter().any(|c| c.starts_with("fff_sid=")));

        let body = body_json(response).await;
        assert_eq!(body["redirect_to"], "/dashboard");
        assert_eq!(body["redirect_after_ms"], 1500);
        assert_eq!(h.state.sessions.len(), 1);

        let toasts = body_json(
            h.app
                .clone()
                .oneshot(get("/api/notifications", VISITOR))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(toasts[0]["level"], "success");
        assert_eq!(toasts[0]["message"], "Signed in successfully");
    }

    #[tokio::test]
    async fn test_invalid_email_never_reaches_backend() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/auth/login",
                VISITOR,
                json!({ "email": "not-an-email", "password": "secret1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["details"]["email"].is_array());
        assert_eq!(body["error"]["values"]["email"], "not-an-email");
        assert!(body["error"]["values"].get("password").is_none());
        assert_eq!(h.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_backend_error_is_shown_verbatim() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send_json("POST", "/api/auth/login", VISITOR, credentials()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Invalid login credentials");
        assert_eq!(body["error"]["values"]["email"], "ada@example.com");

        let toasts = body_json(
            h.app
                .clone()
                .oneshot(get("/api/notifications", VISITOR))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(toasts[0]["level"], "error");
        assert_eq!(toasts[0]["message"], "Invalid login credentials");
    }

    #[tokio::test]
    async fn test_concurrent_submit_is_rejected() {
        let h = harness();
        h.backend
            .seed_account("ada@example.com", "secret1", &UserMetadata::default());
        h.backend.set_latency(Some(Duration::from_millis(50)));

        let (first, second) = tokio::join!(
            h.app
                .clone()
                .oneshot(send_json("POST", "/api/auth/login", VISITOR, credentials())),
            h.app
                .clone()
                .oneshot(send_json("POST", "/api/auth/login", VISITOR, credentials())),
        );
        let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
        assert_eq!(h.backend.calls("sign_in_with_password"), 1);
        assert_eq!(h.state.submissions.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sign_up_with_failed_profile_keeps_account() {
        let h = harness();
        h.backend.fail_inserts_into(tables::PROFILES);
        let response = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/auth/signup",
                VISITOR,
                json!({
                    "first_name": "Ada",
                    "last_name": "Lovelace",
                    "email": "ada@example.com",
                    "password": "secret1",
                    "confirm_password": "secret1",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "profile_pending");
        assert_eq!(h.backend.account_count(), 1);
        assert!(h.backend.rows(tables::PROFILES).is_empty());

        let toasts = body_json(
            h.app
                .clone()
                .oneshot(get("/api/notifications", VISITOR))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(toasts[0]["level"], "error");
        assert!(toasts[0]["message"]
            .as_str()
            .unwrap()
            .contains("row-level security"));
    }

    #[tokio::test]
    async fn test_sign_up_password_mismatch() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/auth/signup",
                VISITOR,
                json!({
                    "first_name": "Ada",
                    "last_name": "Lovelace",
                    "email": "ada@example.com",
                    "password": "secret1",
                    "confirm_password": "secret2",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["details"]["confirm_password"].is_array());
        assert_eq!(h.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_expense_sign_follows_category() {
        let h = harness();
        let cookie = signed_in(&h).await;

        let income = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/expenses",
                &cookie,
                json!({ "date": "2024-05-01", "description": "Freelance", "category": "Income", "amount": 100 }),
            ))
            .await
            .unwrap();
        assert_eq!(income.status(), StatusCode::CREATED);
        assert_eq!(body_json(income).await["amount"].as_f64(), Some(100.0));

        let food = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/expenses",
                &cookie,
                json!({ "date": "2024-05-02", "description": "Lunch", "category": "Food", "amount": "50" }),
            ))
            .await
            .unwrap();
        assert_eq!(food.status(), StatusCode::CREATED);
        let food = body_json(food).await;
        assert_eq!(food["amount"].as_f64(), Some(-50.0));

        // Edited amounts are stored as typed
        let id = food["id"].as_u64().unwrap();
        let edited = h
            .app
            .clone()
            .oneshot(send_json(
                "PATCH",
                &format!("/api/expenses/{}", id),
                &cookie,
                json!({ "amount": 20 }),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(edited).await["amount"].as_f64(), Some(20.0));

        let listed = body_json(
            h.app
                .clone()
                .oneshot(get("/api/expenses?category=Food", &cookie))
                .await
                .unwrap(),
        )
        .await;
        assert!(listed
            .as_array()
            .unwrap()
            .iter()
            .all(|e| e["category"] == "Food"));
    }

    #[tokio::test]
    async fn test_expenses_require_session() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(get("/api/expenses", VISITOR))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let h = harness();
        let cookie = signed_in(&h).await;
        let response = h
            .app
            .clone()
            .oneshot(send_json("POST", "/api/auth/logout", &cookie, json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response).iter().any(|c| c == "fff_sid="));
        assert!(h.state.sessions.is_empty());

        let response = h
            .app
            .clone()
            .oneshot(get("/dashboard/overview", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn test_session_endpoint() {
        let h = harness();
        let anonymous = body_json(
            h.app
                .clone()
                .oneshot(get("/api/auth/session", VISITOR))
                .await
                .unwrap(),
        )
        .await;
        assert!(anonymous.is_null());

        let cookie = signed_in(&h).await;
        let current = body_json(
            h.app
                .clone()
                .oneshot(get("/api/auth/session", &cookie))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(current["user"]["email"], "ada@example.com");
        assert_eq!(current["profile_pending"], false);
    }

    #[tokio::test]
    async fn test_contact_relayed() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/contact",
                VISITOR,
                json!({ "name": "Ada", "email": "ada@example.com", "message": "I would love to support you" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.relay.sent().len(), 1);
        assert_eq!(h.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_new_visitor_gets_cookie() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(get("/api/notifications", ""))
            .await
            .unwrap();
        assert!(set_cookies(&response).iter().any(|c| c.starts_with("fff_vid=")));

        let response = h
            .app
            .clone()
            .oneshot(get("/api/notifications", VISITOR))
            .await
            .unwrap();
        assert!(set_cookies(&response).is_empty());
    }

    #[tokio::test]
    async fn test_preferences_round_trip() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send_json("PUT", "/api/preferences", "", json!({ "theme": "dark" })))
            .await
            .unwrap();
        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c == "fff_theme=dark"));
        let body = body_json(response).await;
        assert_eq!(body["theme"], "dark");
        assert_eq!(body["language"], "en");
    }

    #[tokio::test]
    async fn test_oauth_start_redirects_with_pkce_cookie() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(get("/auth/oauth/github", VISITOR))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).contains("provider=github"));
        assert!(set_cookies(&response).iter().any(|c| c.starts_with("fff_pkce=")));

        let response = h
            .app
            .clone()
            .oneshot(get("/auth/oauth/myspace", VISITOR))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_auth_rate_limit() {
        let h = harness_with(|config| {
            config.rate_limit.enabled = true;
            config.rate_limit.auth_requests_per_window = 2;
        });
        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = h
                .app
                .clone()
                .oneshot(send_json(
                    "POST",
                    "/api/auth/forgot-password",
                    VISITOR,
                    json!({ "email": "bad" }),
                ))
                .await
                .unwrap();
            statuses.push(response.status());
        }
        assert_eq!(
            statuses,
            vec![
                StatusCode::BAD_REQUEST,
                StatusCode::BAD_REQUEST,
                StatusCode::TOO_MANY_REQUESTS
            ]
        );
    }

    #[tokio::test]
    async fn test_dashboard_navigation_checks_user_once_per_request() {
        let h = harness();
        let cookie = signed_in(&h).await;
        let before = h.backend.total_calls();
        let users_before = h.backend.calls("get_user");
        let selects_before = h.backend.calls("select");

        for uri in ["/dashboard/overview", "/dashboard/expenses", "/dashboard/payouts"] {
            let response = h.app.clone().oneshot(get(uri, &cookie)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
        assert_eq!(h.backend.total_calls() - before, 3);
        assert_eq!(h.backend.calls("get_user") - users_before, 3);
        assert_eq!(h.backend.calls("select"), selects_before);
    }

    async fn seed_brand_page(h: &Harness) {
        h.backend
            .insert(tables::BRANDS, json!({ "id": "b1", "slug": "acme", "name": "Acme" }), None)
            .await
            .unwrap();
        h.backend
            .insert(tables::TIERS, json!({ "brand_id": "b1", "name": "Bronze", "amount": 5 }), None)
            .await
            .unwrap();
        for day in 1..=4 {
            h.backend
                .insert(
                    tables::UPDATES,
                    json!({
                        "brand_id": "b1",
                        "title": format!("Update {}", day),
                        "published_at": format!("2024-01-0{}", day),
                    }),
                    None,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_brand_page_tabs_are_served_from_one_load() {
        let h = harness();
        seed_brand_page(&h).await;

        let response = h.app.clone().oneshot(get("/api/pages/acme", VISITOR)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let overview = body_json(response).await;
        assert_eq!(overview["active"], "overview");
        assert_eq!(overview["brand"]["name"], "Acme");
        assert_eq!(overview["tiers"].as_array().unwrap().len(), 1);
        assert_eq!(overview["updates"].as_array().unwrap().len(), 3);
        assert_eq!(overview["updates"][0]["title"], "Update 4");
        let loaded = h.backend.total_calls();

        let tiers = body_json(
            h.app.clone().oneshot(get("/api/pages/acme?tab=tiers", VISITOR)).await.unwrap(),
        )
        .await;
        assert_eq!(tiers["active"], "tiers");
        assert_eq!(tiers["tiers"][0]["name"], "Bronze");
        assert!(tiers.get("updates").is_none());

        let updates = body_json(
            h.app.clone().oneshot(get("/api/pages/acme?tab=updates", VISITOR)).await.unwrap(),
        )
        .await;
        assert_eq!(updates["updates"].as_array().unwrap().len(), 4);
        assert!(updates.get("tiers").is_none());

        let supporters = body_json(
            h.app.clone().oneshot(get("/api/pages/acme?tab=supporters", VISITOR)).await.unwrap(),
        )
        .await;
        assert_eq!(supporters["active"], "supporters");
        assert!(supporters.get("tiers").is_none());

        h.app.clone().oneshot(get("/api/pages/acme?tab=overview", VISITOR)).await.unwrap();
        assert_eq!(h.backend.total_calls(), loaded);

        let response = h.app.clone().oneshot(get("/api/pages/acme?tab=nope", VISITOR)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = h.app.clone().oneshot(get("/api/pages/globex", VISITOR)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_new_tier_reloads_brand_page() {
        let h = harness();
        seed_brand_page(&h).await;
        let cookie = signed_in(&h).await;
        h.app.clone().oneshot(get("/api/pages/acme", VISITOR)).await.unwrap();

        let response = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/brands/b1/tiers",
                &cookie,
                json!({ "name": "Gold", "amount": 50 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let tiers = body_json(
            h.app.clone().oneshot(get("/api/pages/acme?tab=tiers", VISITOR)).await.unwrap(),
        )
        .await;
        assert_eq!(tiers["tiers"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_brand_create_and_owner_scoped_list() {
        let h = harness();
        let cookie = signed_in(&h).await;
        let owner = user_id(&h, &cookie).await;
        h.backend
            .insert(tables::BRANDS, json!({ "owner_id": "someone-else", "slug": "globex" }), None)
            .await
            .unwrap();

        let response = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/brands",
                &cookie,
                json!({ "name": "Acme", "slug": "acme", "description": "Handmade tools" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["owner_id"], owner.as_str());
        assert_eq!(created["slug"], "acme");

        let response = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/brands",
                &cookie,
                json!({ "name": "", "slug": "Not a handle!" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["details"]["name"].is_array());
        assert!(body["error"]["details"]["slug"].is_array());

        let listed = body_json(h.app.clone().oneshot(get("/api/brands", &cookie)).await.unwrap()).await;
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["owner_id"], owner.as_str());
    }

    #[tokio::test]
    async fn test_tiers_and_updates_of_a_brand() {
        let h = harness();
        let cookie = signed_in(&h).await;

        let tier = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/brands/b1/tiers",
                &cookie,
                json!({ "name": "Bronze", "amount": "5", "description": "A thank-you note" }),
            ))
            .await
            .unwrap();
        assert_eq!(tier.status(), StatusCode::CREATED);
        let tier = body_json(tier).await;
        assert_eq!(tier["brand_id"], "b1");
        assert_eq!(tier["amount"].as_f64(), Some(5.0));

        let rejected = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/brands/b1/tiers",
                &cookie,
                json!({ "name": "Free", "amount": -1 }),
            ))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let update = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/brands/b1/updates",
                &cookie,
                json!({ "title": "First batch", "body": "The first batch of tools has shipped." }),
            ))
            .await
            .unwrap();
        assert_eq!(update.status(), StatusCode::CREATED);
        assert!(body_json(update).await["published_at"].is_string());

        let short = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/brands/b1/updates",
                &cookie,
                json!({ "title": "Hi", "body": "Too short" }),
            ))
            .await
            .unwrap();
        assert_eq!(short.status(), StatusCode::BAD_REQUEST);

        let tiers = body_json(h.app.clone().oneshot(get("/api/brands/b1/tiers", &cookie)).await.unwrap()).await;
        assert_eq!(tiers.as_array().unwrap().len(), 1);
        let updates = body_json(h.app.clone().oneshot(get("/api/brands/b1/updates", &cookie)).await.unwrap()).await;
        assert_eq!(updates.as_array().unwrap().len(), 1);
        let other = body_json(h.app.clone().oneshot(get("/api/brands/b2/tiers", &cookie)).await.unwrap()).await;
        assert!(other.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payout_request_starts_requested() {
        let h = harness();
        let cookie = signed_in(&h).await;
        let owner = user_id(&h, &cookie).await;
        h.backend
            .insert(tables::PAYOUTS, json!({ "owner_id": "someone-else", "amount": 10 }), None)
            .await
            .unwrap();

        let response = h
            .app
            .clone()
            .oneshot(send_json("POST", "/api/payouts", &cookie, json!({ "amount": 25 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let payout = body_json(response).await;
        assert_eq!(payout["status"], "requested");
        assert_eq!(payout["owner_id"], owner.as_str());

        let response = h
            .app
            .clone()
            .oneshot(send_json("POST", "/api/payouts", &cookie, json!({ "amount": -5 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let listed = body_json(h.app.clone().oneshot(get("/api/payouts", &cookie)).await.unwrap()).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_profile_view() {
        let h = harness();
        let cookie = signed_in(&h).await;
        let id = user_id(&h, &cookie).await;

        let missing = body_json(h.app.clone().oneshot(get("/api/profile", &cookie)).await.unwrap()).await;
        assert_eq!(missing["active"], "about");
        assert!(missing["profile"].is_null());

        h.backend
            .insert(tables::PROFILES, json!({ "id": id, "first_name": "Ada" }), None)
            .await
            .unwrap();
        let response = h
            .app
            .clone()
            .oneshot(get("/api/profile?tab=contributions", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["active"], "contributions");
        assert_eq!(body["user"]["display_name"], "Ada Lovelace");
        assert_eq!(body["profile"]["first_name"], "Ada");

        let response = h
            .app
            .clone()
            .oneshot(get("/api/profile?tab=nope", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = h.app.clone().oneshot(get("/api/profile", VISITOR)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forgot_password_sends_reset() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/auth/forgot-password",
                VISITOR,
                json!({ "email": "ada@example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["sent"], true);
        assert_eq!(h.backend.password_resets(), vec!["ada@example.com".to_string()]);

        let toasts = toasts(&h).await;
        assert_eq!(toasts[0]["level"], "success");
        assert_eq!(toasts[0]["message"], "Password reset email sent. Check your inbox.");
    }

    #[tokio::test]
    async fn test_oauth_callback_with_provider_error() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(get(
                "/auth/callback?error=access_denied&error_description=Access%20was%20denied",
                VISITOR,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
        assert!(h.state.sessions.is_empty());
        assert_eq!(h.backend.total_calls(), 0);

        let toasts = toasts(&h).await;
        assert_eq!(toasts[0]["level"], "error");
        assert_eq!(toasts[0]["message"], "Access was denied");
    }

    #[tokio::test]
    async fn test_oauth_callback_without_verifier() {
        let h = harness();
        h.backend
            .seed_account("ada@example.com", "secret1", &UserMetadata::default());
        let code = h.backend.issue_auth_code("ada@example.com").unwrap();
        let response = h
            .app
            .clone()
            .oneshot(get(&format!("/auth/callback?code={}", code), VISITOR))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
        assert_eq!(h.backend.calls("exchange_code_for_session"), 0);

        let toasts = toasts(&h).await;
        assert_eq!(toasts[0]["message"], "The sign-in link is invalid or has expired");
    }

    #[tokio::test]
    async fn test_oauth_callback_signs_in() {
        let h = harness();
        h.backend
            .seed_account("ada@example.com", "secret1", &UserMetadata::default());
        let code = h.backend.issue_auth_code("ada@example.com").unwrap();
        let cookie = format!("{}; fff_pkce=verifier-from-start", VISITOR);
        let response = h
            .app
            .clone()
            .oneshot(get(&format!("/auth/callback?code={}", code), &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");
        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with("fff_sid=") && c.len() > "fff_sid=".len()));
        assert!(cookies.iter().any(|c| c == "fff_pkce="));
        assert_eq!(h.state.sessions.len(), 1);

        // Codes are single use
        let response = h
            .app
            .clone()
            .oneshot(get(&format!("/auth/callback?code={}", code), &cookie))
            .await
            .unwrap();
        assert_eq!(location(&response), "/login");
        assert_eq!(h.state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_form_status_shows_busy_label_while_pending() {
        let h = harness();
        h.backend
            .seed_account("ada@example.com", "secret1", &UserMetadata::default());
        h.backend.set_latency(Some(Duration::from_millis(100)));

        let status = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            body_json(
                h.app
                    .clone()
                    .oneshot(get("/api/forms/login", VISITOR))
                    .await
                    .unwrap(),
            )
            .await
        };
        let (login, status) = tokio::join!(
            h.app
                .clone()
                .oneshot(send_json("POST", "/api/auth/login", VISITOR, credentials())),
            status,
        );
        assert_eq!(status["form"], "login");
        assert_eq!(status["submitting"], true);
        assert_eq!(status["submit_label"], "Signing in...");
        assert_eq!(login.unwrap().status(), StatusCode::OK);

        let idle = body_json(
            h.app
                .clone()
                .oneshot(get("/api/forms/login", VISITOR))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(idle["submitting"], false);
        assert!(idle.get("submit_label").is_none());

        let response = h.app.clone().oneshot(get("/api/forms/nope", VISITOR)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_logout_cancels_pending_submission() {
        let h = harness();
        h.backend
            .seed_account("ada@example.com", "secret1", &UserMetadata::default());
        h.backend.set_latency(Some(Duration::from_millis(100)));

        let logout = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            body_json(
                h.app
                    .clone()
                    .oneshot(send_json("POST", "/api/auth/logout", VISITOR, json!({})))
                    .await
                    .unwrap(),
            )
            .await
        };
        let (login, logout) = tokio::join!(
            h.app
                .clone()
                .oneshot(send_json("POST", "/api/auth/login", VISITOR, credentials())),
            logout,
        );
        assert_eq!(logout["cancelled_submissions"], 1);
        assert_eq!(logout["signed_out"], false);
        assert_eq!(login.unwrap().status(), StatusCode::CONFLICT);
        assert!(h.state.sessions.is_empty());
        assert_eq!(h.state.submissions.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_relogin_discards_previous_ledger() {
        let h = harness();
        let first = signed_in(&h).await;
        let response = h.app.clone().oneshot(get("/api/expenses", &first)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first_sid = sid_of(&first);
        assert!(h.state.ledgers.contains(&first_sid));

        // Same browser signs in again while still holding the old cookie
        let response = h
            .app
            .clone()
            .oneshot(send_json("POST", "/api/auth/login", &first, credentials()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let second_sid = set_cookies(&response)
            .into_iter()
            .find_map(|c| c.strip_prefix("fff_sid=").map(str::to_string))
            .unwrap();
        let second = format!("{}; fff_sid={}", VISITOR, second_sid);
        h.app.clone().oneshot(get("/api/expenses", &second)).await.unwrap();

        let ledgers = h.state.ledgers.clone();
        let (old, new) = (first_sid.clone(), second_sid.clone());
        assert!(settle(move || !ledgers.contains(&old) && ledgers.contains(&new)).await);
        assert_eq!(h.state.ledgers.len(), 1);
        assert_eq!(h.state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_logout_discards_ledger() {
        let h = harness();
        let cookie = signed_in(&h).await;
        h.app.clone().oneshot(get("/api/expenses", &cookie)).await.unwrap();
        assert_eq!(h.state.ledgers.len(), 1);

        h.app
            .clone()
            .oneshot(send_json("POST", "/api/auth/logout", &cookie, json!({})))
            .await
            .unwrap();
        let ledgers = h.state.ledgers.clone();
        assert!(settle(move || ledgers.is_empty()).await);
    }

    #[tokio::test]
    async fn test_expense_category_filter_ignores_case() {
        let h = harness();
        let cookie = signed_in(&h).await;
        let listed = body_json(
            h.app
                .clone()
                .oneshot(get("/api/expenses?category=food", &cookie))
                .await
                .unwrap(),
        )
        .await;
        let listed = listed.as_array().unwrap();
        assert!(!listed.is_empty());
        assert!(listed.iter().all(|e| e["category"] == "Food"));

        let response = h
            .app
            .clone()
            .oneshot(get("/api/expenses?category=", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarded_for_does_not_escape_rate_limit() {
        let h = harness_with(|config| {
            config.rate_limit.enabled = true;
            config.rate_limit.auth_requests_per_window = 2;
        });
        let mut statuses = Vec::new();
        for n in 0..3 {
            let response = h
                .app
                .clone()
                .oneshot(forgot_password_from(&format!("203.0.113.{}", n)))
                .await
                .unwrap();
            statuses.push(response.status());
        }
        assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_forwarded_for_used_behind_trusted_proxy() {
        let h = harness_with(|config| {
            config.rate_limit.enabled = true;
            config.rate_limit.auth_requests_per_window = 2;
            config.rate_limit.trust_proxy_headers = true;
        });
        for n in 0..3 {
            let response = h
                .app
                .clone()
                .oneshot(forgot_password_from(&format!("203.0.113.{}", n)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }
}
