//! External OAuth2 sign-in.
//!
//! Each configured provider implements [`IdentityProvider`]: it builds the authorize redirect and
//! turns an authorization code into a normalized [`ProviderProfile`]. [`sign_in_with_provider`]
//! runs the exchange under the configured timeout and maps the profile onto a local user with
//! [`resolve_identity`].
//!
//! ```text
//! GET /api/auth/signin/{id}    → state cookie + 307 to provider authorize URL
//! GET /api/auth/callback/{id}  → check state → exchange_code → resolve_identity → session cookie
//! ```

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{
    api::models::users::{Role, UserResponse},
    config::{AuthConfig, ProviderConfig, ProviderKind},
    db::{
        errors::DbError,
        handlers::UserRepository,
        models::users::{LinkedAccount, UserCreateDBRequest},
    },
    errors::{AuthError, Error, Result},
};

/// Cookie carrying the CSRF state between the authorize redirect and the callback
pub const STATE_COOKIE_NAME: &str = "retrogate_oauth_state";

/// How long a started provider sign-in may take before the state cookie expires
pub const STATE_COOKIE_MAX_AGE_SECS: u64 = 600;

/// Identity asserted by an external provider after a successful code exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProviderProfile {
    pub fn linked_account(&self) -> LinkedAccount {
        LinkedAccount {
            provider: self.provider.clone(),
            provider_account_id: self.provider_account_id.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Id used in URLs and stored on linked accounts
    fn id(&self) -> &str;

    /// Where to send the browser to start sign-in
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String;

    /// Trade an authorization code for the provider's view of the user
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> std::result::Result<ProviderProfile, AuthError>;
}

#[derive(Debug, Clone)]
struct Endpoints {
    authorize: Url,
    token: Url,
    userinfo: Url,
    emails: Option<Url>,
}

fn parse_default(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::Config {
        message: format!("invalid provider URL '{url}': {e}"),
    })
}

impl Endpoints {
    fn resolve(id: &str, kind: ProviderKind, config: &ProviderConfig) -> Result<Self> {
        let (authorize, token, userinfo, emails) = match kind {
            ProviderKind::Google => (
                Some("https://accounts.google.com/o/oauth2/v2/auth"),
                Some("https://oauth2.googleapis.com/token"),
                Some("https://www.googleapis.com/oauth2/v3/userinfo"),
                None,
            ),
            ProviderKind::Github => (
                Some("https://github.com/login/oauth/authorize"),
                Some("https://github.com/login/oauth/access_token"),
                Some("https://api.github.com/user"),
                Some("https://api.github.com/user/emails"),
            ),
            ProviderKind::Generic => (None, None, None, None),
        };

        let pick = |configured: &Option<Url>, default: Option<&str>, name: &str| -> Result<Url> {
            match (configured, default) {
                (Some(url), _) => Ok(url.clone()),
                (None, Some(default)) => parse_default(default),
                (None, None) => Err(Error::Config {
                    message: format!("provider '{id}' needs {name}"),
                }),
            }
        };

        Ok(Self {
            authorize: pick(&config.authorize_url, authorize, "authorize_url")?,
            token: pick(&config.token_url, token, "token_url")?,
            userinfo: pick(&config.userinfo_url, userinfo, "userinfo_url")?,
            emails: match (&config.emails_url, emails) {
                (Some(url), _) => Some(url.clone()),
                (None, Some(default)) => Some(parse_default(default)?),
                (None, None) => None,
            },
        })
    }
}

fn default_scopes(kind: ProviderKind) -> Vec<String> {
    let scopes: &[&str] = match kind {
        ProviderKind::Github => &["read:user", "user:email"],
        ProviderKind::Google | ProviderKind::Generic => &["openid", "email", "profile"],
    };
    scopes.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

/// Authorization-code OAuth2 provider speaking JSON over HTTPS
pub struct OAuthProvider {
    id: String,
    kind: ProviderKind,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    endpoints: Endpoints,
    http: reqwest::Client,
}

impl OAuthProvider {
    pub fn new(id: &str, config: &ProviderConfig, http: reqwest::Client) -> Result<Self> {
        let kind = config.kind_for(id);
        Ok(Self {
            id: id.to_string(),
            kind,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.clone().unwrap_or_else(|| default_scopes(kind)),
            endpoints: Endpoints::resolve(id, kind, config)?,
            http,
        })
    }

    fn failure(&self, message: impl Into<String>) -> AuthError {
        AuthError::provider(&self.id, message)
    }

    async fn fetch_access_token(&self, code: &str, redirect_uri: &str) -> std::result::Result<String, AuthError> {
        let response = self
            .http
            .post(self.endpoints.token.clone())
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.failure(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failure(format!("token endpoint returned {status}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| self.failure(format!("unreadable token response: {e}")))?;

        // GitHub reports a bad code as 200 with an error body
        if let Some(error) = token.error {
            let description = token.error_description.unwrap_or_default();
            return Err(self.failure(format!("token endpoint rejected code: {error} {description}")));
        }

        token
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| self.failure("token response has no access_token"))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url, access_token: &str) -> std::result::Result<T, AuthError> {
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.failure(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failure(format!("{url} returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| self.failure(format!("unreadable response from {url}: {e}")))
    }

    /// GitHub hides private addresses from `/user`; ask for the primary verified one instead
    async fn fetch_primary_email(&self, access_token: &str) -> std::result::Result<Option<String>, AuthError> {
        let Some(emails_url) = &self.endpoints.emails else {
            return Ok(None);
        };

        let emails: Vec<ProviderEmail> = self.get_json(emails_url, access_token).await?;
        Ok(emails.into_iter().find(|e| e.primary && e.verified).map(|e| e.email))
    }

    fn normalize(&self, userinfo: &Value) -> std::result::Result<(String, Option<String>, Option<String>, Option<String>), AuthError> {
        let account_id = match userinfo.get("sub").or_else(|| userinfo.get("id")) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(self.failure("userinfo has no subject id")),
        };

        let text = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| userinfo.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .find(|value| !value.is_empty())
                .map(str::to_string)
        };

        let email = text(&["email"]);
        // An address the provider has not verified must not claim an existing account
        let email_verified = match userinfo.get("email_verified") {
            Some(Value::Bool(verified)) => *verified,
            Some(Value::String(verified)) => !verified.eq_ignore_ascii_case("false"),
            _ => true,
        };
        if email.is_some() && !email_verified {
            return Err(self.failure("userinfo email is not verified"));
        }

        Ok((account_id, email, text(&["name", "login"]), text(&["picture", "avatar_url"])))
    }
}

#[async_trait::async_trait]
impl IdentityProvider for OAuthProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        let mut url = self.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        url.into()
    }

    #[instrument(skip_all, fields(provider = %self.id))]
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> std::result::Result<ProviderProfile, AuthError> {
        let access_token = self.fetch_access_token(code, redirect_uri).await?;
        let userinfo: Value = self.get_json(&self.endpoints.userinfo, &access_token).await?;
        let (provider_account_id, email, name, avatar_url) = self.normalize(&userinfo)?;

        let email = match email {
            Some(email) => email,
            None if self.kind == ProviderKind::Github => self
                .fetch_primary_email(&access_token)
                .await?
                .ok_or_else(|| self.failure("account has no primary verified email"))?,
            None => return Err(self.failure("userinfo has no email")),
        };

        debug!("Provider {} returned account {}", self.id, provider_account_id);
        Ok(ProviderProfile {
            provider: self.id.clone(),
            provider_account_id,
            email,
            name,
            avatar_url,
        })
    }
}

/// The configured providers, keyed by id
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let mut registry = Self::default();
        if config.providers.is_empty() {
            return Ok(registry);
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("retrogate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal {
                operation: format!("create provider HTTP client: {e}"),
            })?;

        for (id, provider_config) in &config.providers {
            let provider = OAuthProvider::new(id, provider_config, http.clone())?;
            registry = registry.with_provider(Arc::new(provider));
        }
        Ok(registry)
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.id().to_string(), provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Random, URL-safe CSRF state for one sign-in attempt
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rng().fill(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Complete a provider sign-in: exchange the code within `timeout`, then map to a local user
#[instrument(skip(provider, users, code, redirect_uri), fields(provider = %provider.id()), err)]
pub async fn sign_in_with_provider(
    provider: &dyn IdentityProvider,
    users: &dyn UserRepository,
    code: &str,
    redirect_uri: &str,
    timeout: Duration,
) -> Result<UserResponse> {
    let profile = tokio::time::timeout(timeout, provider.exchange_code(code, redirect_uri))
        .await
        .map_err(|_| AuthError::provider(provider.id(), format!("exchange timed out after {timeout:?}")))??;

    resolve_identity(users, &profile).await
}

/// Find or create the local user for a provider profile.
///
/// Existing records are reused as they are; only the provider link is added when missing.
/// Concurrent first sign-ins for one email converge on whichever create won.
#[instrument(skip_all, fields(provider = %profile.provider), err)]
pub async fn resolve_identity(users: &dyn UserRepository, profile: &ProviderProfile) -> Result<UserResponse> {
    let account = profile.linked_account();

    let user = match users.get_user_by_email(&profile.email).await? {
        Some(user) => user,
        None => {
            let request = UserCreateDBRequest {
                email: profile.email.clone(),
                display_name: profile.name.clone().unwrap_or_else(|| profile.email.clone()),
                avatar_url: profile.avatar_url.clone(),
                password_hash: None,
                role: Role::User,
                is_active: true,
                auth_source: profile.provider.clone(),
                linked_account: Some(account.clone()),
            };

            match users.create(&request).await {
                Ok(user) => {
                    info!("Created user {} on first {} sign-in", user.id, profile.provider);
                    user
                }
                Err(e) if e.is_unique_violation() => {
                    warn!("Concurrent first sign-in for one email; using the existing record");
                    users.get_user_by_email(&profile.email).await?.ok_or(DbError::NotFound)?
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    if !user.is_active {
        return Err(AuthError::AccountDisabled.into());
    }

    let mut user = user;
    if !user.has_linked_account(&account) {
        users.link_account(user.id, &account).await?;
        user.accounts.push(account);
    }

    users.record_login(user.id).await?;
    Ok(UserResponse::from(user))
}
