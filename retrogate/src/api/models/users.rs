//! API request/response models for users.

use crate::db::models::users::{LinkedAccount, UserDBResponse};
use crate::errors::Error;
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Site role. Variants are declared in rank order, so the derived `Ord` is the role hierarchy:
/// `User < Reviewer < Editor < Admin`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Role {
    User,
    Reviewer,
    Editor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::Reviewer, Role::Editor, Role::Admin];

    /// Position in the hierarchy, starting at 0 for `User`
    pub fn rank(self) -> u8 {
        match self {
            Role::User => 0,
            Role::Reviewer => 1,
            Role::Editor => 2,
            Role::Admin => 3,
        }
    }

    /// Whether a holder of this role may access something that requires `required`
    pub fn satisfies(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Reviewer => "reviewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| Error::Config {
                message: format!("unknown role '{s}' (expected one of: user, reviewer, editor, admin)"),
            })
    }
}

impl TryFrom<String> for Role {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The authenticated requester, as asserted by a verified session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub play_style: Option<String>,
    pub favorite_genres: Vec<String>,
    pub favorite_platforms: Vec<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    /// Providers linked to this account (e.g. "google", "github")
    pub linked_providers: Vec<String>,
    /// Whether the account can sign in with a password
    pub has_password: bool,
}

/// Self-service profile changes. A list field replaces the stored list when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub play_style: Option<String>,
    pub favorite_genres: Option<Vec<String>>,
    pub favorite_platforms: Option<Vec<String>>,
}

/// Administrative changes to another account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAdminUpdate {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            display_name: db.display_name,
            avatar_url: db.avatar_url,
            bio: db.bio,
            location: db.location,
            play_style: db.play_style,
            favorite_genres: db.favorite_genres,
            favorite_platforms: db.favorite_platforms,
            role: db.role,
            is_active: db.is_active,
            created_at: db.created_at,
            updated_at: db.updated_at,
            last_login: db.last_login,
            linked_providers: db.accounts.into_iter().map(|LinkedAccount { provider, .. }| provider).collect(),
            has_password: db.password_hash.is_some(),
        }
    }
}

impl From<&UserResponse> for CurrentUser {
    fn from(user: &UserResponse) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
        }
    }
}
