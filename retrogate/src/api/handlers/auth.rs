use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use tracing::{info, warn};
use url::form_urlencoded;

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, AuthSuccessResponse, CallbackQuery, ProviderInfo, ProviderSignInQuery, ProvidersInfo, SessionResponse,
            SignInRequest, SignInResponse, SignOutResponse, SignUpRequest, WithCookie,
        },
        users::{CurrentUser, Role, UserResponse},
    },
    auth::{
        credentials,
        current_user::cookie_values,
        password::{self, Argon2Params},
        providers::{self, STATE_COOKIE_MAX_AGE_SECS, STATE_COOKIE_NAME},
        session,
    },
    config::Config,
    db::models::users::UserCreateDBRequest,
    errors::{AuthError, Error},
};

const CALLBACK_PATH: &str = "/api/auth/callback";

/// Issue a session for `user` and wrap it with the matching cookie
fn respond_with_session(status: StatusCode, user: UserResponse, message: &str, config: &Config) -> Result<SignInResponse, Error> {
    let token = session::create_session_token(&CurrentUser::from(&user), config)?;
    Ok(WithCookie {
        status,
        body: AuthResponse {
            user,
            message: message.to_string(),
        },
        cookie: session::session_cookie(&token, config),
    })
}

/// Only same-site paths are followed after sign-in
fn local_redirect(target: Option<&str>, home: &str) -> String {
    match target {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                // Browsers strip tabs and newlines, which would turn `/\t/host` into `//host`
                && !path.chars().any(|c| c.is_control() || c.is_whitespace()) =>
        {
            path.to_string()
        }
        _ => home.to_string(),
    }
}

fn state_cookie(value: &str, config: &Config) -> String {
    format!(
        "{STATE_COOKIE_NAME}={value}; Path={CALLBACK_PATH}; HttpOnly{}; SameSite=Lax; Max-Age={STATE_COOKIE_MAX_AGE_SECS}",
        if config.auth.session.cookie_secure { "; Secure" } else { "" },
    )
}

fn clear_state_cookie(config: &Config) -> String {
    format!(
        "{STATE_COOKIE_NAME}=; Path={CALLBACK_PATH}; HttpOnly{}; SameSite=Lax; Max-Age=0",
        if config.auth.session.cookie_secure { "; Secure" } else { "" },
    )
}

/// The state cookie holds `<state>|<urlencoded callback path>`
fn encode_state(state: &str, callback: &str) -> String {
    let callback: String = form_urlencoded::byte_serialize(callback.as_bytes()).collect();
    format!("{state}|{callback}")
}

fn decode_state(value: &str) -> Option<(String, String)> {
    let (state, callback) = value.split_once('|')?;
    let callback: String = form_urlencoded::parse(format!("c={callback}").as_bytes())
        .find(|(key, _)| key == "c")
        .map(|(_, value)| value.into_owned())?;
    Some((state.to_string(), callback))
}

/// Send the browser back to the sign-in page with a generic error code
fn sign_in_error_redirect(config: &Config, err: &Error) -> Response {
    let code = match err {
        Error::Auth(auth) => auth.code(),
        _ => "Callback",
    };
    let query = form_urlencoded::Serializer::new(String::new()).append_pair("error", code).finish();
    let target = format!("{}?{query}", config.auth.pages.sign_in);

    (AppendHeaders([(header::SET_COOKIE, clear_state_cookie(config))]), Redirect::temporary(&target)).into_response()
}

/// Sign-in options for the sign-in page
#[tracing::instrument(skip_all)]
pub async fn get_providers(State(state): State<AppState>) -> Json<ProvidersInfo> {
    let credentials = &state.config.auth.credentials;
    let providers = state
        .providers
        .ids()
        .into_iter()
        .map(|id| ProviderInfo {
            signin_url: format!("/api/auth/signin/{id}"),
            id,
        })
        .collect();

    Json(ProvidersInfo {
        credentials: credentials.enabled,
        registration: credentials.enabled && credentials.allow_registration,
        providers,
    })
}

/// Sign in with email and password
#[tracing::instrument(skip_all)]
pub async fn sign_in(State(state): State<AppState>, Json(request): Json<SignInRequest>) -> Result<SignInResponse, Error> {
    let config = &state.config.auth.credentials;
    if !config.enabled {
        return Err(Error::BadRequest {
            message: "Email and password sign-in is disabled".to_string(),
        });
    }

    // The precise rejection reason is logged when the error is rendered
    let user = credentials::verify_credentials(state.users.as_ref(), config, &request.email, &request.password).await?;

    respond_with_session(StatusCode::OK, user, "Signed in", &state.config)
}

/// Create an account with email and password, then sign in
#[tracing::instrument(skip_all)]
pub async fn sign_up(State(state): State<AppState>, Json(request): Json<SignUpRequest>) -> Result<SignInResponse, Error> {
    let config = &state.config.auth.credentials;
    if !config.enabled || !config.allow_registration {
        return Err(Error::BadRequest {
            message: "Registration is disabled".to_string(),
        });
    }

    let email = request.email.trim();
    let name = request.name.trim();
    if email.is_empty() {
        return Err(AuthError::MissingField { field: "email" }.into());
    }
    if request.password.is_empty() {
        return Err(AuthError::MissingField { field: "password" }.into());
    }
    if name.is_empty() {
        return Err(AuthError::MissingField { field: "name" }.into());
    }

    password::validate_password(&request.password, &config.password)?;

    if state.users.get_user_by_email(email).await?.is_some() {
        return Err(Error::Conflict {
            message: "An account with this email address already exists".to_string(),
        });
    }

    let password_hash = password::hash_password_blocking(request.password, Argon2Params::from(&config.password)).await?;

    let create = UserCreateDBRequest {
        email: email.to_string(),
        display_name: name.to_string(),
        avatar_url: None,
        password_hash: Some(password_hash),
        role: Role::User,
        is_active: true,
        auth_source: "credentials".to_string(),
        linked_account: None,
    };

    // A concurrent sign-up can still win between the check and the insert
    let user = state.users.create(&create).await?;
    info!("Registered user {}", user.id);

    respond_with_session(StatusCode::CREATED, UserResponse::from(user), "Account created", &state.config)
}

/// Clear the session cookie
#[tracing::instrument(skip_all)]
pub async fn sign_out(State(state): State<AppState>) -> SignOutResponse {
    WithCookie {
        status: StatusCode::OK,
        body: AuthSuccessResponse {
            message: "Signed out".to_string(),
        },
        cookie: session::clear_session_cookie(&state.config),
    }
}

/// The identity carried by the caller's session
#[tracing::instrument(skip_all)]
pub async fn get_session(user: CurrentUser) -> Json<SessionResponse> {
    Json(SessionResponse { user })
}

/// Start a provider sign-in by redirecting to its authorize URL
#[tracing::instrument(skip(state, query))]
pub async fn provider_sign_in(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(query): Query<ProviderSignInQuery>,
) -> Result<Response, Error> {
    let provider = state.providers.get(&provider_id).ok_or_else(|| Error::NotFound {
        resource: "Provider".to_string(),
        id: provider_id.clone(),
    })?;

    let csrf_state = providers::generate_state();
    let callback = local_redirect(query.callback_url.as_deref(), &state.config.auth.pages.home);
    let redirect_uri = state.config.oauth_redirect_uri(&provider_id);

    let cookie = state_cookie(&encode_state(&csrf_state, &callback), &state.config);
    let target = provider.authorize_url(&csrf_state, &redirect_uri);

    Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::temporary(&target)).into_response())
}

/// Finish a provider sign-in.
///
/// Every failure lands back on the sign-in page with `?error=<code>`; the detailed reason is only
/// logged.
#[tracing::instrument(skip(state, headers, query))]
pub async fn provider_callback(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    headers: axum::http::HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    match complete_provider_sign_in(&state, &provider_id, &headers, query).await {
        Ok(response) => response,
        Err(e) => {
            warn!(provider = %provider_id, error = %e, "Provider sign-in failed");
            sign_in_error_redirect(&state.config, &e)
        }
    }
}

async fn complete_provider_sign_in(
    state: &AppState,
    provider_id: &str,
    headers: &axum::http::HeaderMap,
    query: CallbackQuery,
) -> Result<Response, Error> {
    let provider = state
        .providers
        .get(provider_id)
        .ok_or_else(|| AuthError::provider(provider_id, "unknown provider"))?;

    if let Some(error) = query.error {
        return Err(AuthError::provider(provider_id, format!("provider returned error '{error}'")).into());
    }

    let (expected_state, callback) = cookie_values(headers, STATE_COOKIE_NAME)
        .iter()
        .find_map(|value| decode_state(value))
        .ok_or_else(|| AuthError::provider(provider_id, "missing state cookie"))?;

    if query.state.as_deref() != Some(expected_state.as_str()) {
        return Err(AuthError::provider(provider_id, "state mismatch").into());
    }

    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AuthError::provider(provider_id, "missing authorization code"))?;

    let redirect_uri = state.config.oauth_redirect_uri(provider_id);
    let user = providers::sign_in_with_provider(
        provider.as_ref(),
        state.users.as_ref(),
        &code,
        &redirect_uri,
        state.config.auth.provider_timeout,
    )
    .await?;
    info!("User {} signed in with {}", user.id, provider_id);

    let token = session::create_session_token(&CurrentUser::from(&user), &state.config)?;
    let target = local_redirect(Some(&callback), &state.config.auth.pages.home);

    Ok((
        AppendHeaders([
            (header::SET_COOKIE, session::session_cookie(&token, &state.config)),
            (header::SET_COOKIE, clear_state_cookie(&state.config)),
        ]),
        Redirect::temporary(&target),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        auth::providers::{IdentityProvider, ProviderProfile, ProviderRegistry},
        config::CredentialStrategy,
        db::handlers::{InMemoryUsers, UserRepository},
        test_utils::{create_test_config, create_test_state_with, create_test_user},
    };
    use axum::{
        Router,
        routing::{get, post},
    };
    use axum_test::TestServer;
    use serde_json::json;
    use std::sync::Arc;

    /// Accepts the code "good-code" and nothing else
    struct StubProvider {
        email: String,
    }

    #[async_trait::async_trait]
    impl IdentityProvider for StubProvider {
        fn id(&self) -> &str {
            "stub"
        }

        fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
            format!("https://stub.example/authorize?state={state}&redirect_uri={redirect_uri}")
        }

        async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<ProviderProfile, AuthError> {
            if code != "good-code" {
                return Err(AuthError::provider("stub", "bad code"));
            }
            Ok(ProviderProfile {
                provider: "stub".to_string(),
                provider_account_id: "stub-7".to_string(),
                email: self.email.clone(),
                name: Some("Pixel Knight".to_string()),
                avatar_url: None,
            })
        }
    }

    fn router() -> Router<AppState> {
        Router::new()
            .route("/api/auth/providers", get(get_providers))
            .route("/api/auth/signin", post(sign_in))
            .route("/api/auth/signup", post(sign_up))
            .route("/api/auth/signout", post(sign_out))
            .route("/api/auth/session", get(get_session))
            .route("/api/auth/signin/{provider}", get(provider_sign_in))
            .route("/api/auth/callback/{provider}", get(provider_callback))
    }

    fn server_with(config: Config, store: Arc<InMemoryUsers>) -> TestServer {
        let registry = ProviderRegistry::default().with_provider(Arc::new(StubProvider {
            email: "knight@example.com".to_string(),
        }));
        let state = create_test_state_with(config, store, registry);
        TestServer::new(router().with_state(state)).unwrap()
    }

    fn server(store: Arc<InMemoryUsers>) -> TestServer {
        server_with(create_test_config(), store)
    }

    fn set_cookies(response: &axum_test::TestResponse) -> Vec<String> {
        response
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    fn session_token(response: &axum_test::TestResponse, config: &Config) -> String {
        let prefix = format!("{}=", config.auth.session.cookie_name);
        set_cookies(response)
            .into_iter()
            .find_map(|c| c.strip_prefix(&prefix).map(|rest| rest.split(';').next().unwrap().to_string()))
            .expect("session cookie set")
    }

    #[tokio::test]
    async fn test_sign_in_sets_cookie_with_stored_role() {
        let store = Arc::new(InMemoryUsers::new());
        create_test_user(&*store, "editor@example.com", Some("hunter22"), Role::Editor, true).await;
        let config = create_test_config();
        let server = server(store);

        let response = server
            .post("/api/auth/signin")
            .json(&json!({"email": "editor@example.com", "password": "hunter22"}))
            .await;

        response.assert_status_ok();
        let body: AuthResponse = response.json();
        assert_eq!(body.user.role, Role::Editor);

        let token = session_token(&response, &config);
        let claims = session::verify_session_token(&token, &config).unwrap();
        assert_eq!(claims.role, Role::Editor);
        assert_eq!(claims.id, body.user.id);
    }

    #[tokio::test]
    async fn test_sign_in_failures_are_indistinguishable() {
        let store = Arc::new(InMemoryUsers::new());
        create_test_user(&*store, "real@example.com", Some("hunter22"), Role::User, true).await;
        create_test_user(&*store, "off@example.com", Some("hunter22"), Role::User, false).await;
        let server = server(store);

        for (email, password) in [
            ("ghost@example.com", "hunter22"),
            ("real@example.com", "wrong-one"),
            ("off@example.com", "hunter22"),
        ] {
            let response = server
                .post("/api/auth/signin")
                .json(&json!({"email": email, "password": password}))
                .await;
            response.assert_status(StatusCode::UNAUTHORIZED);
            response.assert_text("Sign-in failed");
            assert!(set_cookies(&response).is_empty());
        }
    }

    #[tokio::test]
    async fn test_sign_in_missing_field() {
        let server = server(Arc::new(InMemoryUsers::new()));

        let response = server.post("/api/auth/signin").json(&json!({"email": "a@example.com"})).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_text("Missing required field: password");
    }

    #[tokio::test]
    async fn test_demo_sign_in() {
        let store = Arc::new(InMemoryUsers::new());
        let mut config = create_test_config();
        config.auth.credentials.strategy = CredentialStrategy::Demo;
        config.auth.credentials.demo_role = Role::Reviewer;
        let server = server_with(config, store.clone());

        let response = server
            .post("/api/auth/signin")
            .json(&json!({"email": "demo@example.com", "password": "anything"}))
            .await;

        response.assert_status_ok();
        let body: AuthResponse = response.json();
        assert_eq!(body.user.role, Role::Reviewer);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_creates_user_role_account() {
        let store = Arc::new(InMemoryUsers::new());
        let server = server(store.clone());

        let response = server
            .post("/api/auth/signup")
            .json(&json!({"email": "new@example.com", "password": "longenough", "name": "New Player"}))
            .await;

        response.assert_status(StatusCode::CREATED);
        let body: AuthResponse = response.json();
        assert_eq!(body.user.role, Role::User);
        assert_eq!(body.user.display_name, "New Player");
        assert!(body.user.has_password);
        assert!(!set_cookies(&response).is_empty());

        let stored = store.get_user_by_email("new@example.com").await.unwrap().unwrap();
        assert!(stored.password_hash.unwrap().starts_with("$argon2"));

        // The new account can sign in straight away
        server
            .post("/api/auth/signin")
            .json(&json!({"email": "new@example.com", "password": "longenough"}))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_sign_up_validation() {
        let store = Arc::new(InMemoryUsers::new());
        create_test_user(&*store, "taken@example.com", Some("hunter22"), Role::User, true).await;
        let server = server(store);

        let response = server
            .post("/api/auth/signup")
            .json(&json!({"email": "x@example.com", "password": "longenough"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_text("Missing required field: name");

        let response = server
            .post("/api/auth/signup")
            .json(&json!({"email": "x@example.com", "password": "short", "name": "X"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = server
            .post("/api/auth/signup")
            .json(&json!({"email": "taken@example.com", "password": "longenough", "name": "Dup"}))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_sign_up_disabled() {
        let mut config = create_test_config();
        config.auth.credentials.allow_registration = false;
        let server = server_with(config, Arc::new(InMemoryUsers::new()));

        let response = server
            .post("/api/auth/signup")
            .json(&json!({"email": "x@example.com", "password": "longenough", "name": "X"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_and_sign_out() {
        let store = Arc::new(InMemoryUsers::new());
        create_test_user(&*store, "me@example.com", Some("hunter22"), Role::Reviewer, true).await;
        let config = create_test_config();
        let server = server(store);

        server.get("/api/auth/session").await.assert_status(StatusCode::UNAUTHORIZED);

        let response = server
            .post("/api/auth/signin")
            .json(&json!({"email": "me@example.com", "password": "hunter22"}))
            .await;
        let token = session_token(&response, &config);

        let response = server
            .get("/api/auth/session")
            .add_header("cookie", format!("{}={token}", config.auth.session.cookie_name))
            .await;
        response.assert_status_ok();
        let body: SessionResponse = response.json();
        assert_eq!(body.user.email, "me@example.com");
        assert_eq!(body.user.role, Role::Reviewer);

        let response = server.post("/api/auth/signout").await;
        response.assert_status_ok();
        assert!(set_cookies(&response)[0].contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_providers_listing() {
        let server = server(Arc::new(InMemoryUsers::new()));

        let body: ProvidersInfo = server.get("/api/auth/providers").await.json();
        assert!(body.credentials);
        assert!(body.registration);
        assert_eq!(body.providers.len(), 1);
        assert_eq!(body.providers[0].id, "stub");
        assert_eq!(body.providers[0].signin_url, "/api/auth/signin/stub");
    }

    #[tokio::test]
    async fn test_provider_round_trip() {
        let store = Arc::new(InMemoryUsers::new());
        let config = create_test_config();
        let server = server(store.clone());

        let response = server
            .get("/api/auth/signin/stub")
            .add_query_param("callbackUrl", "/reviews/new?game=7")
            .await;
        response.assert_status(StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()["location"].to_str().unwrap().to_string();
        assert!(location.starts_with("https://stub.example/authorize"));

        let state_cookie = set_cookies(&response)
            .into_iter()
            .find(|c| c.starts_with(STATE_COOKIE_NAME))
            .unwrap();
        let cookie_pair = state_cookie.split(';').next().unwrap().to_string();
        let csrf_state = cookie_pair
            .trim_start_matches(&format!("{STATE_COOKIE_NAME}="))
            .split('|')
            .next()
            .unwrap()
            .to_string();
        assert!(location.contains(&format!("state={csrf_state}")));

        for _ in 0..2 {
            let response = server
                .get("/api/auth/callback/stub")
                .add_query_param("code", "good-code")
                .add_query_param("state", &csrf_state)
                .add_header("cookie", cookie_pair.clone())
                .await;

            response.assert_status(StatusCode::TEMPORARY_REDIRECT);
            assert_eq!(response.headers()["location"], "/reviews/new?game=7");

            let token = session_token(&response, &config);
            let user = session::verify_session_token(&token, &config).unwrap();
            assert_eq!(user.email, "knight@example.com");
            assert_eq!(user.role, Role::User);
        }

        // Two sign-ins, one record
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_callback_state_mismatch_redirects_with_error() {
        let store = Arc::new(InMemoryUsers::new());
        let server = server(store.clone());

        let response = server
            .get("/api/auth/callback/stub")
            .add_query_param("code", "good-code")
            .add_query_param("state", "forged")
            .add_header("cookie", format!("{STATE_COOKIE_NAME}={}", encode_state("real", "/")))
            .await;

        response.assert_status(StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()["location"], "/auth/signin?error=OAuthCallback");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_callback_without_state_cookie() {
        let server = server(Arc::new(InMemoryUsers::new()));

        let response = server
            .get("/api/auth/callback/stub")
            .add_query_param("code", "good-code")
            .add_query_param("state", "anything")
            .await;

        assert_eq!(response.headers()["location"], "/auth/signin?error=OAuthCallback");
    }

    #[tokio::test]
    async fn test_callback_disabled_account() {
        let store = Arc::new(InMemoryUsers::new());
        create_test_user(&*store, "knight@example.com", None, Role::User, false).await;
        let server = server(store);

        let response = server
            .get("/api/auth/callback/stub")
            .add_query_param("code", "good-code")
            .add_query_param("state", "s1")
            .add_header("cookie", format!("{STATE_COOKIE_NAME}={}", encode_state("s1", "/")))
            .await;

        assert_eq!(response.headers()["location"], "/auth/signin?error=AccessDenied");
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let server = server(Arc::new(InMemoryUsers::new()));
        server.get("/api/auth/signin/nope").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_local_redirect() {
        assert_eq!(local_redirect(Some("/profile?tab=1"), "/"), "/profile?tab=1");
        assert_eq!(local_redirect(Some("//evil.example"), "/"), "/");
        assert_eq!(local_redirect(Some("https://evil.example"), "/"), "/");
        assert_eq!(local_redirect(Some("/\\evil.example"), "/"), "/");
        assert_eq!(local_redirect(Some("/\t/evil.example"), "/"), "/");
        assert_eq!(local_redirect(Some("/\n/evil.example"), "/"), "/");
        assert_eq!(local_redirect(Some("/ /evil.example"), "/"), "/");
        assert_eq!(local_redirect(Some("/reviews/new?q=a%20b"), "/"), "/reviews/new?q=a%20b");
        assert_eq!(local_redirect(None, "/home"), "/home");
    }

    #[test]
    fn test_state_encoding() {
        let encoded = encode_state("abc", "/reviews/new?game=7&x=1");
        assert_eq!(
            decode_state(&encoded),
            Some(("abc".to_string(), "/reviews/new?game=7&x=1".to_string()))
        );
        assert_eq!(decode_state("no-separator"), None);
    }
}
