//! Database models for users.

use crate::api::models::users::{ProfileUpdate, Role, UserAdminUpdate};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An external identity provider account linked to a local user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LinkedAccount {
    pub provider: String,
    pub provider_account_id: String,
}

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub password_hash: Option<String>,
    pub role: Role,
    pub is_active: bool,
    /// How the account was created: "credentials", "system", or a provider id
    pub auth_source: String,
    pub linked_account: Option<LinkedAccount>,
}

/// Database request for updating a user. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub play_style: Option<String>,
    pub favorite_genres: Option<Vec<String>>,
    pub favorite_platforms: Option<Vec<String>>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password_hash: Option<String>,
}

impl From<ProfileUpdate> for UserUpdateDBRequest {
    fn from(update: ProfileUpdate) -> Self {
        Self {
            display_name: update.display_name,
            avatar_url: update.avatar_url,
            bio: update.bio,
            location: update.location,
            play_style: update.play_style,
            favorite_genres: update.favorite_genres,
            favorite_platforms: update.favorite_platforms,
            ..Default::default()
        }
    }
}

impl From<UserAdminUpdate> for UserUpdateDBRequest {
    fn from(update: UserAdminUpdate) -> Self {
        Self {
            role: update.role,
            is_active: update.is_active,
            ..Default::default()
        }
    }
}

/// Database response for a user
#[derive(Debug, Clone)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub play_style: Option<String>,
    pub favorite_genres: Vec<String>,
    pub favorite_platforms: Vec<String>,
    pub password_hash: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub auth_source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub accounts: Vec<LinkedAccount>,
}

impl UserDBResponse {
    pub fn has_linked_account(&self, account: &LinkedAccount) -> bool {
        self.accounts.contains(account)
    }
}
