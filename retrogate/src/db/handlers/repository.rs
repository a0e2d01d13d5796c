//! Base repository trait for user persistence.

/// Contains the UserRepository trait.
///
/// A repository is the data access layer for user records. Records are addressed by id and by
/// their unique email; they are never physically deleted (deactivation goes through `update`).
/// Implementations must make `create` atomic with respect to the email so that two concurrent
/// creates for the same address leave exactly one record, the loser receiving
/// [`DbError::UniqueViolation`](crate::db::errors::DbError::UniqueViolation).
use crate::{
    db::{
        errors::Result,
        models::users::{LinkedAccount, UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
    types::UserId,
};

#[async_trait::async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    /// Get a user by ID
    async fn get_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>>;

    /// Get a user by exact email match
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;

    /// Update a user by ID, returning [`DbError::NotFound`](crate::db::errors::DbError::NotFound)
    /// if it does not exist
    async fn update(&self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse>;

    /// Link an external provider account. Linking an already linked account is a no-op.
    async fn link_account(&self, id: UserId, account: &LinkedAccount) -> Result<()>;

    /// Stamp the last successful sign-in time
    async fn record_login(&self, id: UserId) -> Result<()>;
}
