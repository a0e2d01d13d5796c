//! # retrogate: accounts, sessions and role-gated routing for an indie game reviews site
//!
//! `retrogate` sits in front of the review site's pages and API. It signs players in, issues
//! session tokens, and decides for every request whether the caller may see the page.
//!
//! ## Request Flow
//!
//! Every request first meets the authorization gate ([`auth::middleware`]). Paths outside the
//! configured protected prefixes pass straight through. For a protected path the gate reads the
//! session token from the cookie (or an `Authorization: Bearer` header), compares the role in the
//! token against the rule for the longest matching prefix, and either forwards the request or
//! redirects: to the sign-in page when there is no valid session, to the home page when the role
//! ranks too low. Paths under `/api/` get 401 and 403 instead of redirects.
//!
//! The gate never touches the user store. Roles are read from the token, so a role change takes
//! effect when the user next signs in.
//!
//! ## Signing In
//!
//! - **Credentials** (`POST /api/auth/signin`): email and password checked against the store, or
//!   any non-empty pair in `demo` mode.
//! - **Providers** (`GET /api/auth/signin/{provider}`): OAuth2 authorization-code sign-in with
//!   Google, GitHub, or a generic provider. First sign-in creates a `user`-role account.
//!
//! Both paths end in [`auth::session::create_session_token`] and an HTTP-only cookie.
//!
//! ## Storage
//!
//! Users live behind the [`db::handlers::UserRepository`] trait: PostgreSQL via sqlx for
//! deployments, or an in-memory store for development and tests. `database.type` picks one.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use retrogate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = retrogate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     retrogate::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)
//!         .await?
//!         .serve(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    http::{self, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};

pub use config::Config;
pub use types::UserId;

use crate::{
    api::models::users::Role,
    auth::{
        middleware::{AccessRules, authorization_gate_middleware},
        password::{self, Argon2Params},
        providers::ProviderRegistry,
    },
    config::{CorsOrigin, DatabaseConfig},
    db::{
        handlers::{InMemoryUsers, UserRepository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
};

/// Shared state handed to every handler and to the gate.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .users(Arc::new(InMemoryUsers::new()))
///     .providers(Arc::new(ProviderRegistry::default()))
///     .access_rules(Arc::new(rules))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn UserRepository>,
    pub providers: Arc<ProviderRegistry>,
    pub access_rules: Arc<AccessRules>,
}

/// Get the retrogate database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: an existing account keeps its role and profile, and only has its password
/// replaced when one is given.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(
    email: &str,
    password: Option<&str>,
    params: Argon2Params,
    users: &dyn UserRepository,
) -> anyhow::Result<UserId> {
    let password_hash = match password {
        Some(pwd) => Some(password::hash_password_blocking(pwd.to_string(), params).await?),
        None => None,
    };

    if let Some(existing) = users.get_user_by_email(email).await? {
        if password_hash.is_some() {
            let update = UserUpdateDBRequest {
                password_hash,
                ..Default::default()
            };
            users.update(existing.id, &update).await?;
            info!("Updated password for initial admin {}", types::abbrev_uuid(&existing.id));
        }
        return Ok(existing.id);
    }

    let created = users
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            display_name: "Administrator".to_string(),
            avatar_url: None,
            password_hash,
            role: Role::Admin,
            is_active: true,
            auth_source: "system".to_string(),
            linked_account: None,
        })
        .await?;

    info!("Created initial admin user {}", types::abbrev_uuid(&created.id));
    Ok(created.id)
}

/// Open the configured user store, running migrations for PostgreSQL
async fn setup_database(config: &Config) -> anyhow::Result<(Arc<dyn UserRepository>, Option<PgPool>)> {
    match &config.database {
        DatabaseConfig::Memory => {
            info!("Using in-memory user store; accounts are lost on restart");
            Ok((Arc::new(InMemoryUsers::new()), None))
        }
        DatabaseConfig::External { url, pool } => {
            info!("Using external database");
            let db = PgPoolOptions::new()
                .max_connections(pool.max_connections)
                .min_connections(pool.min_connections)
                .acquire_timeout(std::time::Duration::from_secs(pool.acquire_timeout_secs))
                .idle_timeout(std::time::Duration::from_secs(pool.idle_timeout_secs))
                .max_lifetime(std::time::Duration::from_secs(pool.max_lifetime_secs))
                .connect(url)
                .await?;
            migrator().run(&db).await?;

            Ok((Arc::new(Users::new(db.clone())), Some(db)))
        }
    }
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PUT, http::Method::PATCH])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// The gate wraps every route, including the static page fallback, so protected pages are
/// checked before they are served.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth as auth_handlers, profile, users};

    let auth_routes = Router::new()
        .route("/providers", get(auth_handlers::get_providers))
        .route("/signin", post(auth_handlers::sign_in))
        .route("/signup", post(auth_handlers::sign_up))
        .route("/signout", post(auth_handlers::sign_out))
        .route("/session", get(auth_handlers::get_session))
        .route("/signin/{provider}", get(auth_handlers::provider_sign_in))
        .route("/callback/{provider}", get(auth_handlers::provider_callback));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .route("/profile", get(profile::get_profile).put(profile::update_profile))
        .route("/admin/users/{id}", get(users::get_user).patch(users::update_user));

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes);

    if let Some(static_dir) = &state.config.static_dir {
        info!("Serving static pages from {}", static_dir.display());
        router = router.fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true));
    }

    let router = router
        .layer(from_fn_with_state(state.clone(), authorization_gate_middleware))
        .with_state(state.clone())
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// The assembled service: store, providers, gate, and router.
///
/// 1. **Create**: [`Application::new`] opens the store, runs migrations, and seeds the admin
/// 2. **Serve**: [`Application::serve`] binds and handles requests until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting retrogate with configuration: {:#?}", config);
        let (users, pool) = setup_database(&config).await?;
        let mut app = Self::new_with_store(config, users).await?;
        app.pool = pool;
        Ok(app)
    }

    /// Build around an existing user store
    pub async fn new_with_store(config: Config, users: Arc<dyn UserRepository>) -> anyhow::Result<Self> {
        if let Some(email) = &config.admin_email {
            create_initial_admin_user(
                email,
                config.admin_password.as_deref(),
                Argon2Params::from(&config.auth.credentials.password),
                users.as_ref(),
            )
            .await?;
        }

        let providers = ProviderRegistry::from_config(&config.auth)?;
        let access_rules = AccessRules::new(&config.access.rules)?;
        info!(
            "Loaded {} access rules and {} sign-in providers",
            config.access.rules.len(),
            providers.ids().len()
        );

        let state = AppState::builder()
            .config(config.clone())
            .users(users)
            .providers(Arc::new(providers))
            .access_rules(Arc::new(access_rules))
            .build();

        let router = build_router(state)?;
        Ok(Self { router, config, pool: None })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("retrogate listening on http://{}, public URL {}", bind_addr, self.config.site_url);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        api::models::auth::AuthResponse,
        test_utils::{create_test_config, create_test_user},
    };
    use axum::http::StatusCode;
    use serde_json::json;

    async fn test_app(config: Config) -> (axum_test::TestServer, Arc<InMemoryUsers>) {
        let store = Arc::new(InMemoryUsers::new());
        let app = Application::new_with_store(config, store.clone()).await.unwrap();
        (app.into_test_server(), store)
    }

    fn session_cookie_pair(response: &axum_test::TestResponse) -> String {
        let cookie = response.headers()["set-cookie"].to_str().unwrap();
        cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_initial_admin_is_seeded_once() {
        let store = InMemoryUsers::new();
        let params = Argon2Params::from(&create_test_config().auth.credentials.password);

        let first = create_initial_admin_user("root@example.com", Some("first-pass"), params, &store)
            .await
            .unwrap();
        let second = create_initial_admin_user("root@example.com", Some("second-pass"), params, &store)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);

        let admin = store.get_by_id(first).await.unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(password::verify_password("second-pass", admin.password_hash.as_deref().unwrap()).unwrap());
    }

    #[tokio::test]
    async fn test_seeding_keeps_existing_role() {
        let store = InMemoryUsers::new();
        let existing = create_test_user(&store, "root@example.com", None, Role::Editor, true).await;
        let params = Argon2Params::from(&create_test_config().auth.credentials.password);

        let id = create_initial_admin_user("root@example.com", None, params, &store).await.unwrap();

        assert_eq!(id, existing.id);
        assert_eq!(store.get_by_id(id).await.unwrap().unwrap().role, Role::Editor);
    }

    #[tokio::test]
    async fn test_healthz() {
        let (server, _) = test_app(create_test_config()).await;
        server.get("/healthz").await.assert_text("OK");
    }

    #[test_log::test(tokio::test)]
    async fn test_sign_in_then_gated_routes() {
        let mut config = create_test_config();
        config.admin_email = Some("root@example.com".to_string());
        config.admin_password = Some("root-password".to_string());
        let (server, store) = test_app(config).await;
        create_test_user(&*store, "critic@example.com", Some("hunter22"), Role::Reviewer, true).await;

        // Anonymous API call to a protected path
        server.get("/api/profile").await.assert_status(StatusCode::UNAUTHORIZED);

        let response = server
            .post("/api/auth/signin")
            .json(&json!({"email": "critic@example.com", "password": "hunter22"}))
            .await;
        response.assert_status_ok();
        let critic = session_cookie_pair(&response);

        let response = server.get("/api/profile").add_header("cookie", critic.clone()).await;
        response.assert_status_ok();

        // Reviewer on an admin API path
        let response = server
            .get(&format!("/api/admin/users/{}", uuid::Uuid::new_v4()))
            .add_header("cookie", critic)
            .await;
        response.assert_status(StatusCode::FORBIDDEN);

        let response = server
            .post("/api/auth/signin")
            .json(&json!({"email": "root@example.com", "password": "root-password"}))
            .await;
        let body: AuthResponse = response.json();
        assert_eq!(body.user.role, Role::Admin);
        let admin = session_cookie_pair(&response);

        let critic_record = store.get_user_by_email("critic@example.com").await.unwrap().unwrap();
        server
            .patch(&format!("/api/admin/users/{}", critic_record.id))
            .add_header("cookie", admin)
            .json(&json!({"role": "editor"}))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_static_pages_are_gated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("admin")).unwrap();
        std::fs::write(dir.path().join("admin/index.html"), "admin page").unwrap();
        std::fs::write(dir.path().join("index.html"), "home page").unwrap();

        let mut config = create_test_config();
        config.static_dir = Some(dir.path().to_path_buf());
        let (server, _) = test_app(config).await;

        server.get("/").await.assert_text("home page");

        let response = server.get("/admin/").await;
        response.assert_status(StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()["location"], "/auth/signin?callbackUrl=%2Fadmin%2F");

        // Spellings the file server resolves to the same file
        std::fs::write(dir.path().join("admin/secret.html"), "admin secret").unwrap();
        for path in ["/admin/secret.html", "/%61dmin/secret.html", "//admin/secret.html", "/admin%2Fsecret.html"] {
            let response = server.get(path).await;
            response.assert_status(StatusCode::TEMPORARY_REDIRECT);
        }
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let mut config = create_test_config();
        config.auth.security.cors.allowed_origins = vec![CorsOrigin::Url("https://reviews.example".parse().unwrap())];
        config.auth.security.cors.allow_credentials = true;
        let (server, _) = test_app(config).await;

        let response = server
            .method(http::Method::OPTIONS, "/api/auth/session")
            .add_header("origin", "https://reviews.example")
            .add_header("access-control-request-method", "GET")
            .await;

        assert_eq!(response.headers()["access-control-allow-origin"], "https://reviews.example");
    }
}
