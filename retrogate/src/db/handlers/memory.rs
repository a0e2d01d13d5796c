//! In-memory user store for development and tests.

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::UserRepository,
        models::users::{LinkedAccount, UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
    types::{UserId, abbrev_uuid},
};
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::instrument;
use uuid::Uuid;

/// Users held in process memory. Lost on restart.
///
/// The email index is the source of truth for uniqueness: `create` claims the email through the
/// index entry before the record becomes visible, so concurrent creates for one address cannot
/// both succeed.
#[derive(Debug, Default)]
pub struct InMemoryUsers {
    users: DashMap<UserId, UserDBResponse>,
    emails: DashMap<String, UserId>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUsers {
    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let user = UserDBResponse {
            id,
            email: request.email.clone(),
            display_name: request.display_name.clone(),
            avatar_url: request.avatar_url.clone(),
            bio: None,
            location: None,
            play_style: None,
            favorite_genres: Vec::new(),
            favorite_platforms: Vec::new(),
            password_hash: request.password_hash.clone(),
            role: request.role,
            is_active: request.is_active,
            auth_source: request.auth_source.clone(),
            created_at: now,
            updated_at: now,
            last_login: None,
            accounts: request.linked_account.clone().into_iter().collect(),
        };

        // Hold the email slot while the record is inserted
        match self.emails.entry(request.email.clone()) {
            Entry::Occupied(_) => Err(DbError::duplicate_email(&request.email)),
            Entry::Vacant(slot) => {
                self.users.insert(id, user.clone());
                slot.insert(id);
                Ok(user)
            }
        }
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.users.get(&id).map(|user| user.clone()))
    }

    #[instrument(skip(self, email), err)]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let Some(id) = self.emails.get(email).map(|id| *id) else {
            return Ok(None);
        };
        self.get_by_id(id).await
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse> {
        let mut user = self.users.get_mut(&id).ok_or(DbError::NotFound)?;

        if let Some(display_name) = &request.display_name {
            user.display_name = display_name.clone();
        }
        if let Some(avatar_url) = &request.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
        if let Some(bio) = &request.bio {
            user.bio = Some(bio.clone());
        }
        if let Some(location) = &request.location {
            user.location = Some(location.clone());
        }
        if let Some(play_style) = &request.play_style {
            user.play_style = Some(play_style.clone());
        }
        if let Some(genres) = &request.favorite_genres {
            user.favorite_genres = genres.clone();
        }
        if let Some(platforms) = &request.favorite_platforms {
            user.favorite_platforms = platforms.clone();
        }
        if let Some(role) = request.role {
            user.role = role;
        }
        if let Some(is_active) = request.is_active {
            user.is_active = is_active;
        }
        if let Some(password_hash) = &request.password_hash {
            user.password_hash = Some(password_hash.clone());
        }
        user.updated_at = Utc::now();

        Ok(user.clone())
    }

    #[instrument(skip(self, account), fields(user_id = %abbrev_uuid(&id), provider = %account.provider), err)]
    async fn link_account(&self, id: UserId, account: &LinkedAccount) -> Result<()> {
        let mut user = self.users.get_mut(&id).ok_or(DbError::NotFound)?;
        if !user.has_linked_account(account) {
            user.accounts.push(account.clone());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn record_login(&self, id: UserId) -> Result<()> {
        let mut user = self.users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.last_login = Some(Utc::now());
        Ok(())
    }
}
