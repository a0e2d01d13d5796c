use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{debug, instrument, trace};

/// Values of every cookie called `name` across all `Cookie` headers
pub(crate) fn cookie_values(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .filter(|(cookie_name, _)| *cookie_name == name)
        .map(|(_, value)| value.to_string())
        .collect()
}

/// Extract user from the JWT session cookie if present and valid
/// Returns:
/// - None: No session cookie present
/// - Some(Ok(user)): Valid JWT found and verified
/// - Some(Err(error)): Session cookie present but invalid, expired, or malformed
fn try_session_cookie_auth(headers: &HeaderMap, config: &Config) -> Option<Result<CurrentUser>> {
    let mut last_error = None;

    // A stale cookie may sit next to a fresh one; keep looking
    for token in cookie_values(headers, &config.auth.session.cookie_name) {
        match session::verify_session_token(&token, config) {
            Ok(user) => return Some(Ok(user)),
            Err(e) => last_error = Some(e),
        }
    }

    last_error.map(Err)
}

/// Extract user from an `Authorization: Bearer <jwt>` header
/// Returns:
/// - None: No Authorization header or not a Bearer token
/// - Some(Ok(user)): Valid JWT found and verified
/// - Some(Err(error)): Bearer token present but invalid
fn try_bearer_auth(headers: &HeaderMap, config: &Config) -> Option<Result<CurrentUser>> {
    let auth_header = headers.get(header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    let token = auth_str.strip_prefix("Bearer ")?;
    Some(session::verify_session_token(token.trim(), config))
}

/// Resolve the requester from the session cookie, then the bearer header.
///
/// Returns `None` when no credential was presented at all. When credentials were presented but
/// none verified, the last verification error is returned.
#[instrument(skip_all)]
pub fn authenticate(headers: &HeaderMap, config: &Config) -> Option<Result<CurrentUser>> {
    let mut failure = None;

    for (method, attempt) in [
        ("session cookie", try_session_cookie_auth(headers, config)),
        ("bearer token", try_bearer_auth(headers, config)),
    ] {
        match attempt {
            Some(Ok(user)) => {
                debug!("Authenticated user {} via {method}", user.id);
                return Some(Ok(user));
            }
            Some(Err(e)) => {
                trace!("{method} authentication failed: {e:?}");
                failure = Some(Err(e));
            }
            None => trace!("No {method} presented"),
        }
    }

    failure
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // The authorization gate has already verified protected routes
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        match authenticate(&parts.headers, &state.config) {
            Some(Ok(user)) => Ok(user),
            Some(Err(Error::Internal { operation })) => Err(Error::Internal { operation }),
            Some(Err(_)) => Err(Error::Unauthenticated {
                message: Some("Session is invalid or has expired".to_string()),
            }),
            None => Err(Error::Unauthenticated { message: None }),
        }
    }
}
