//! PostgreSQL repository for users.

use crate::types::{UserId, abbrev_uuid};
use crate::{
    api::models::users::Role,
    db::{
        errors::{DbError, Result},
        handlers::repository::UserRepository,
        models::users::{LinkedAccount, UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::instrument;
use uuid::Uuid;

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct User {
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
}

impl From<(Vec<LinkedAccount>, User)> for UserDBResponse {
    fn from((accounts, user): (Vec<LinkedAccount>, User)) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            bio: user.bio,
            location: user.location,
            play_style: user.play_style,
            favorite_genres: user.favorite_genres,
            favorite_platforms: user.favorite_platforms,
            password_hash: user.password_hash,
            role: user.role,
            is_active: user.is_active,
            auth_source: user.auth_source,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_login: user.last_login,
            accounts,
        }
    }
}

pub struct Users {
    db: PgPool,
}

impl Users {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn accounts_for(conn: &mut PgConnection, user_id: UserId) -> Result<Vec<LinkedAccount>> {
        let accounts = sqlx::query_as::<_, LinkedAccount>(
            "SELECT provider, provider_account_id FROM user_accounts WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(accounts)
    }

    async fn with_accounts(&self, user: Option<User>) -> Result<Option<UserDBResponse>> {
        match user {
            Some(user) => {
                let mut conn = self.db.acquire().await?;
                let accounts = Self::accounts_for(&mut conn, user.id).await?;
                Ok(Some(UserDBResponse::from((accounts, user))))
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl UserRepository for Users {
    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        // Always generate a new ID for users
        let user_id = Uuid::new_v4();

        let mut tx = self.db.begin().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, display_name, avatar_url, password_hash, role, is_active, auth_source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&request.email)
        .bind(&request.display_name)
        .bind(&request.avatar_url)
        .bind(&request.password_hash)
        .bind(request.role)
        .bind(request.is_active)
        .bind(&request.auth_source)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(account) = &request.linked_account {
            sqlx::query("INSERT INTO user_accounts (user_id, provider, provider_account_id) VALUES ($1, $2, $3)")
                .bind(user_id)
                .bind(&account.provider)
                .bind(&account.provider_account_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        let accounts = request.linked_account.clone().into_iter().collect();
        Ok(UserDBResponse::from((accounts, user)))
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        self.with_accounts(user).await
    }

    #[instrument(skip(self, email), err)]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        self.with_accounts(user).await
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse> {
        let mut tx = self.db.begin().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                display_name = COALESCE($2, display_name),
                avatar_url = COALESCE($3, avatar_url),
                bio = COALESCE($4, bio),
                role = COALESCE($5, role),
                is_active = COALESCE($6, is_active),
                password_hash = COALESCE($7, password_hash),
                location = COALESCE($8, location),
                play_style = COALESCE($9, play_style),
                favorite_genres = COALESCE($10, favorite_genres),
                favorite_platforms = COALESCE($11, favorite_platforms),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.display_name)
        .bind(&request.avatar_url)
        .bind(&request.bio)
        .bind(request.role)
        .bind(request.is_active)
        .bind(&request.password_hash)
        .bind(&request.location)
        .bind(&request.play_style)
        .bind(&request.favorite_genres)
        .bind(&request.favorite_platforms)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        let accounts = Self::accounts_for(&mut tx, id).await?;
        tx.commit().await?;

        Ok(UserDBResponse::from((accounts, user)))
    }

    #[instrument(skip(self, account), fields(user_id = %abbrev_uuid(&id), provider = %account.provider), err)]
    async fn link_account(&self, id: UserId, account: &LinkedAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_accounts (user_id, provider, provider_account_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider, provider_account_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&account.provider)
        .bind(&account.provider_account_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn record_login(&self, id: UserId) -> Result<()> {
        let result = sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
