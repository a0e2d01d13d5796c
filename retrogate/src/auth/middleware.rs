//! Authorization gate.
//!
//! Every request passes through [`authorization_gate_middleware`]. The path is matched against
//! the configured [`AccessRules`]; unprotected paths go straight through. On a protected path the
//! session token decides the outcome:
//!
//! | token                       | outcome                                        |
//! |-----------------------------|------------------------------------------------|
//! | absent, invalid, or expired | redirect to the sign-in page (401 for `/api/`) |
//! | role ranks below the rule   | redirect to the home page (403 for `/api/`)    |
//! | role ranks at or above      | forwarded, with [`CurrentUser`] in extensions  |
//!
//! The gate is stateless and never touches the user store.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::collections::HashSet;
use tracing::{debug, trace};
use url::form_urlencoded;

use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    auth::current_user::authenticate,
    config::AccessRule,
    errors::{Error, Result},
};

/// Outcome of gating one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    RedirectToSignIn,
    RedirectToHome,
}

/// Validated access rules, ordered longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    rules: Vec<AccessRule>,
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
}

/// `/admin` covers `/admin` and `/admin/...` but not `/administrator`
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl AccessRules {
    pub fn new(rules: &[AccessRule]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(rules.len());

        for rule in rules {
            if !rule.prefix.trim().starts_with('/') {
                return Err(Error::Config {
                    message: format!("access rule prefix '{}' must start with '/'", rule.prefix),
                });
            }
            let prefix = normalize_prefix(&rule.prefix);
            if !seen.insert(prefix.clone()) {
                return Err(Error::Config {
                    message: format!("duplicate access rule prefix '{prefix}'"),
                });
            }
            normalized.push(AccessRule::new(prefix, rule.role));
        }

        // Longest prefix first so the most specific rule wins
        normalized.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { rules: normalized })
    }

    /// The role required by the most specific rule covering `path`, if any
    pub fn required_role(&self, path: &str) -> Option<Role> {
        self.rules
            .iter()
            .find(|rule| prefix_matches(&rule.prefix, path))
            .map(|rule| rule.role)
    }
}

/// Decide what happens to a request for `path` made by `user`
pub fn decide(rules: &AccessRules, path: &str, user: Option<&CurrentUser>) -> GateDecision {
    let Some(required) = rules.required_role(path) else {
        return GateDecision::Allow;
    };

    match user {
        None => GateDecision::RedirectToSignIn,
        Some(user) if user.role.satisfies(required) => GateDecision::Allow,
        Some(_) => GateDecision::RedirectToHome,
    }
}

/// The path a file server resolves `raw` to: percent-decoded, with empty and `.` segments dropped
/// and `..` applied. `None` when the decoded path is not UTF-8.
pub fn canonical_path(raw: &str) -> Option<String> {
    let decoded = urlencoding::decode(raw).ok()?;
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    Some(format!("/{}", segments.join("/")))
}

fn is_api_path(path: &str) -> bool {
    prefix_matches("/api", path)
}

/// `/auth/signin?callbackUrl=<path and query>`
pub fn sign_in_redirect_target(sign_in_page: &str, callback: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("callbackUrl", callback)
        .finish();
    format!("{sign_in_page}?{query}")
}

/// Middleware enforcing [`AccessRules`] on every request
pub async fn authorization_gate_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    // Rules apply to the resolved path, not the raw one, so `/%61dmin` and `//admin` are `/admin`
    let Some(path) = canonical_path(request.uri().path()) else {
        return Error::BadRequest {
            message: "Invalid request path".to_string(),
        }
        .into_response();
    };
    if state.access_rules.required_role(&path).is_none() {
        trace!("No access rule for {path}");
        return next.run(request).await;
    }

    let user = match authenticate(request.headers(), &state.config) {
        Some(Ok(user)) => Some(user),
        Some(Err(err @ Error::Internal { .. })) => return err.into_response(),
        Some(Err(_)) | None => None,
    };

    let decision = decide(&state.access_rules, &path, user.as_ref());
    debug!(?decision, path = %path, role = ?user.as_ref().map(|u| u.role), "Gate decision");

    match decision {
        GateDecision::Allow => {
            if let Some(user) = user {
                request.extensions_mut().insert(user);
            }
            next.run(request).await
        }
        GateDecision::RedirectToSignIn if is_api_path(&path) => Error::Unauthenticated { message: None }.into_response(),
        GateDecision::RedirectToSignIn => {
            let callback = request.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or(&path);
            Redirect::temporary(&sign_in_redirect_target(&state.config.auth.pages.sign_in, callback)).into_response()
        }
        GateDecision::RedirectToHome if is_api_path(&path) => {
            let required = state.access_rules.required_role(&path).unwrap_or(Role::Admin);
            let actual = user.map(|u| u.role).unwrap_or(Role::User);
            Error::InsufficientRole { required, actual }.into_response()
        }
        GateDecision::RedirectToHome => Redirect::temporary(&state.config.auth.pages.home).into_response(),
    }
}
