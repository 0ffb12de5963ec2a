//! Campus Portal
//!
//! HTTP front-end for the school portal.
//! Handles:
//! - Browser client identification and per-client session resolution
//! - Credential, demo and session endpoints
//! - Route guarding for every page
//! - Rate limiting and observability (logging, metrics)

mod handlers;
mod middleware;
mod registry;

use anyhow::Context;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use campus_common::{
    auth::ClientTokenManager,
    backend::{Backend, BackendFactory, HostedBackend},
    config::{AppConfig, ObservabilityConfig},
    guard::RouteGuard,
    metrics,
    routes::RouteTable,
    storage::{LocalStore, StoreFactory},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use middleware::rate_limit::{create_rate_limiter, rate_limit_middleware, CredentialLimiter};
use registry::ClientRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ClientRegistry>,
    pub tokens: Arc<ClientTokenManager>,
    pub guard: RouteGuard,
    pub routes: Arc<RouteTable>,
}

impl AppState {
    fn new(config: Arc<AppConfig>, backends: BackendFactory, stores: StoreFactory) -> Self {
        let secret = config.auth.client_token_secret.clone().unwrap_or_else(|| {
            warn!("No client token secret configured; client cookies will not survive a restart");
            Uuid::new_v4().to_string()
        });

        Self {
            registry: Arc::new(ClientRegistry::new(config.clone(), backends, stores)),
            tokens: Arc::new(ClientTokenManager::new(&secret, config.auth.client_token_expiration_secs)),
            guard: RouteGuard::from_config(&config.auth),
            routes: Arc::new(RouteTable::default_table()),
            config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::load().context("failed to load configuration")?);

    init_tracing(&config.observability);
    info!("Starting Campus portal v{}", campus_common::VERSION);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    // Client-side persisted state
    let stores = StoreFactory::from_config(&config.storage).await?;
    info!(kind = %config.storage.kind, "Client store ready");

    // One backend client per browser client, sharing a connection pool
    let http = reqwest::Client::builder()
        .timeout(config.backend_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let backend_config = config.backend.clone();
    let retry = config.retry.policy();
    let backends: BackendFactory = Arc::new(move |store: Arc<dyn LocalStore>| {
        Arc::new(HostedBackend::with_client(http.clone(), &backend_config, retry.clone()).with_session_store(store))
            as Arc<dyn Backend>
    });

    let state = AppState::new(config.clone(), backends, stores);
    spawn_sweeper(
        state.registry.clone(),
        Duration::from_secs(config.registry.sweep_interval_secs),
        Duration::from_secs(config.registry.idle_timeout_secs),
    );

    let limiter = if config.rate_limit.enabled {
        Some(create_rate_limiter(&config.rate_limit)?)
    } else {
        None
    };

    // Build the router
    let app = create_router(state, limiter);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Periodically drop idle clients
fn spawn_sweeper(registry: Arc<ClientRegistry>, every: Duration, idle: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            registry.evict_idle(idle).await;
        }
    });
}

/// Create the main application router
fn create_router(state: AppState, limiter: Option<Arc<CredentialLimiter>>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Credential endpoints (rate limited)
    let mut credentials = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/signup", post(handlers::auth::signup));
    if let Some(limiter) = limiter {
        credentials = credentials.route_layer(from_fn_with_state(limiter, rate_limit_middleware));
    }

    // Everything that needs the client's resolver, pages included
    let client_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/demo", post(handlers::auth::demo))
        .route("/api/session", get(handlers::session::get_session))
        .route("/api/session/refresh", post(handlers::session::refresh))
        .route(
            "/api/settings",
            get(handlers::settings::get_settings).put(handlers::settings::put_settings),
        )
        .route("/api/school/teachers", get(handlers::directory::teachers))
        .route("/api/school/students", get(handlers::directory::students))
        .merge(credentials)
        .fallback(handlers::pages::render)
        .layer(from_fn_with_state(state.clone(), middleware::client::client_middleware));

    // Compose the app
    Router::new()
        // Health endpoints (no client)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .merge(client_routes)
        .layer(from_fn(middleware::request_metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use campus_common::{
        backend::{rpc, MockBackend},
        config::RateLimitConfig,
        models::{Profile, User, UserMetadata},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state(backend: Arc<MockBackend>) -> AppState {
        let mut config = AppConfig::default();
        config.auth.client_token_secret = Some("test-secret".to_string());
        config.demo.seed_data = false;
        config.retry.delay_ms = 1;

        let backends: BackendFactory = Arc::new(move |_: Arc<dyn LocalStore>| backend.clone() as Arc<dyn Backend>);
        AppState::new(Arc::new(config), backends, StoreFactory::memory())
    }

    fn app_with(backend: Arc<MockBackend>, limiter: Option<Arc<CredentialLimiter>>) -> Router {
        create_router(test_state(backend), limiter)
    }

    fn app(backend: Arc<MockBackend>) -> Router {
        app_with(backend, None)
    }

    fn teacher_backend() -> Arc<MockBackend> {
        let user = User {
            id: "t1".to_string(),
            email: Some("t@school.test".to_string()),
            user_metadata: UserMetadata::default(),
        };
        let profile = Profile {
            id: "t1".to_string(),
            user_type: Some("teacher".to_string()),
            school_id: Some("s-1".to_string()),
            ..Profile::default()
        };
        Arc::new(
            MockBackend::new()
                .with_account("t@school.test", "secret1", user)
                .with_profile(profile),
        )
    }

    fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn client_cookie(response: &Response) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("client cookie issued")
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(teacher_backend())
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_ready_reports_checks() {
        let response = app(teacher_backend())
            .oneshot(request("GET", "/ready", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["checks"]["backend"]["status"], "up");
        assert_eq!(body["checks"]["storage"]["status"], "up");
    }

    #[tokio::test]
    async fn test_protected_page_redirects_to_login() {
        let response = app(teacher_backend())
            .oneshot(request("GET", "/teacher/dashboard", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
        assert!(response.headers().get(header::SET_COOKIE).is_some());
    }

    #[tokio::test]
    async fn test_public_and_unknown_pages() {
        let app = app(teacher_backend());

        let response = app.clone().oneshot(request("GET", "/pricing", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["route"], "pricing");

        let response = app.oneshot(request("GET", "/nowhere", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_anonymous_public_pages_register_no_client() {
        let state = test_state(teacher_backend());
        let app = create_router(state.clone(), None);

        let response = app.clone().oneshot(request("GET", "/about", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        let response = app.clone().oneshot(request("GET", "/wp-login.php", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(state.registry.len().await, 0);

        let response = app.oneshot(request("GET", "/teacher/dashboard", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(response.headers().get(header::SET_COOKIE).is_some());
        assert_eq!(state.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_demo_login_guards_pages() {
        let app = app(teacher_backend());

        let response = app
            .clone()
            .oneshot(request("POST", "/api/auth/demo", None, Some(json!({ "role": "teacher" }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = client_cookie(&response);
        let body = json_body(response).await;
        assert_eq!(body["identity"]["role"], "teacher");
        assert_eq!(body["identity"]["school_id"], "test-school-0");
        assert_eq!(body["landing_route"], "/teacher/dashboard");

        let response = app
            .clone()
            .oneshot(request("GET", "/teacher/dashboard", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["route"], "teacher_dashboard");

        let response = app
            .oneshot(request("GET", "/student/dashboard", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/teacher/dashboard");
    }

    #[tokio::test]
    async fn test_demo_admin_rejected() {
        let response = app(teacher_backend())
            .oneshot(request("POST", "/api/auth/demo", None, Some(json!({ "role": "admin" }))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_session_logout() {
        let app = app(teacher_backend());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "email": "t@school.test", "password": "secret1" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = client_cookie(&response);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/session", Some(&cookie), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["identity"]["role"], "teacher");
        assert_eq!(body["identity"]["school_id"], "s-1");

        let response = app
            .clone()
            .oneshot(request("POST", "/api/auth/logout", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["redirect"], "/");

        let response = app
            .oneshot(request("GET", "/api/session", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["authenticated"], false);
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let response = app(teacher_backend())
            .oneshot(request(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "email": "t@school.test", "password": "wrong" })),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_rate_limited() {
        let limiter = create_rate_limiter(&RateLimitConfig {
            requests_per_second: 1,
            burst: 1,
            enabled: true,
        })
        .unwrap();
        let app = app_with(teacher_backend(), Some(limiter));
        let login = || {
            request(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "email": "t@school.test", "password": "secret1" })),
            )
        };

        assert_eq!(app.clone().oneshot(login()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(app.oneshot(login()).await.unwrap().status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_directory_scoped_by_role() {
        let backend = Arc::new(MockBackend::new().with_rpc(
            rpc::GET_SCHOOL_TEACHERS,
            json!([{ "id": "t1", "teacherName": "Ada" }]),
        ));
        let app = app(backend.clone());

        let response = app
            .clone()
            .oneshot(request("POST", "/api/auth/demo", None, Some(json!({ "role": "school" }))))
            .await
            .unwrap();
        let school = client_cookie(&response);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/school/teachers", Some(&school), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await[0]["name"], "Ada");
        assert_eq!(backend.rpc_calls()[0].1["p_school_id"], "test-school-0");

        let response = app
            .clone()
            .oneshot(request("POST", "/api/auth/demo", None, Some(json!({ "role": "student" }))))
            .await
            .unwrap();
        let student = client_cookie(&response);

        let response = app
            .oneshot(request("GET", "/api/school/teachers", Some(&student), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_demo_settings_stay_local() {
        let app = app(teacher_backend());

        let response = app
            .clone()
            .oneshot(request("GET", "/api/settings", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(request("POST", "/api/auth/demo", None, Some(json!({ "role": "student", "index": 2 }))))
            .await
            .unwrap();
        let cookie = client_cookie(&response);

        let response = app
            .clone()
            .oneshot(request("PUT", "/api/settings", Some(&cookie), Some(json!({ "theme": "dark" }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/api/settings", Some(&cookie), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["theme"], "dark");
        assert_eq!(body["language"], "en");
    }
}
