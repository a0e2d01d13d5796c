//! Email/password verification.
//!
//! Two strategies, picked by `auth.credentials.strategy`:
//!
//! - `database`: look the user up by email and check the argon2 hash
//! - `demo`: accept any non-empty pair as a synthetic user that is never stored

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    api::models::users::UserResponse,
    auth::password::{self, Argon2Params},
    config::{CredentialStrategy, CredentialsConfig},
    db::handlers::UserRepository,
    errors::{AuthError, Result},
};

/// Namespace for demo user ids, so one email always maps to the same id
const DEMO_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_3a7e_9d2b_4c61_8e4f_a1b2_c3d4_e5f6);

pub const DEMO_DISPLAY_NAME: &str = "Demo User";

/// Check an email/password pair and return the identity it belongs to.
///
/// Failure order for the database strategy is fixed: missing input, unknown email, wrong
/// password, then disabled account. The disabled check comes last so that a wrong password
/// never reveals the account state.
#[instrument(skip_all, fields(strategy = ?config.strategy), err)]
pub async fn verify_credentials(
    users: &dyn UserRepository,
    config: &CredentialsConfig,
    email: &str,
    password: &str,
) -> Result<UserResponse> {
    let email = email.trim();
    if email.is_empty() {
        return Err(AuthError::MissingField { field: "email" }.into());
    }
    if password.is_empty() {
        return Err(AuthError::MissingField { field: "password" }.into());
    }

    match config.strategy {
        CredentialStrategy::Database => verify_against_store(users, config, email, password).await,
        CredentialStrategy::Demo => Ok(demo_identity(email, config)),
    }
}

/// One argon2 run whose result is thrown away, so accounts that cannot match still cost a hash
async fn spend_hash_time(password: &str, config: &CredentialsConfig) {
    let params = Argon2Params::from(&config.password);
    if let Err(e) = password::hash_password_blocking(password.to_string(), params).await {
        debug!("Discarded hash failed: {e}");
    }
}

async fn verify_against_store(
    users: &dyn UserRepository,
    config: &CredentialsConfig,
    email: &str,
    password: &str,
) -> Result<UserResponse> {
    let Some(user) = users.get_user_by_email(email).await? else {
        spend_hash_time(password, config).await;
        return Err(AuthError::NotFound.into());
    };

    let Some(hash) = user.password_hash.clone() else {
        spend_hash_time(password, config).await;
        return Err(AuthError::InvalidCredential.into());
    };
    if !password::verify_password_blocking(password.to_string(), hash).await? {
        return Err(AuthError::InvalidCredential.into());
    }

    if !user.is_active {
        return Err(AuthError::AccountDisabled.into());
    }

    users.record_login(user.id).await?;
    info!("User {} signed in with credentials", user.id);

    let mut response = UserResponse::from(user);
    response.last_login = Some(Utc::now());
    Ok(response)
}

/// A stable, non-persisted identity for demo deployments
pub fn demo_identity(email: &str, config: &CredentialsConfig) -> UserResponse {
    let now = Utc::now();
    UserResponse {
        id: Uuid::new_v5(&DEMO_NAMESPACE, email.as_bytes()),
        email: email.to_string(),
        display_name: DEMO_DISPLAY_NAME.to_string(),
        avatar_url: None,
        bio: None,
        location: None,
        play_style: None,
        favorite_genres: Vec::new(),
        favorite_platforms: Vec::new(),
        role: config.demo_role,
        is_active: true,
        created_at: now,
        updated_at: now,
        last_login: Some(now),
        linked_providers: Vec::new(),
        has_password: false,
    }
}
