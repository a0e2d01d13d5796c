use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use crate::{
    AppState,
    api::models::users::{CurrentUser, Role, UserAdminUpdate, UserResponse},
    auth::permissions::require_role,
    db::models::users::UserUpdateDBRequest,
    errors::{Error, Result},
    types::{UserId, abbrev_uuid},
};

fn user_not_found(id: UserId) -> Error {
    Error::NotFound {
        resource: "User".to_string(),
        id: id.to_string(),
    }
}

#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&user_id)))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: CurrentUser,
) -> Result<Json<UserResponse>> {
    require_role(&current_user, Role::Admin)?;

    let user = state.users.get_by_id(user_id).await?.ok_or_else(|| user_not_found(user_id))?;
    Ok(Json(UserResponse::from(user)))
}

/// Change another account's role or active flag.
///
/// Admins cannot demote or deactivate themselves, so a site always keeps the admin that made the
/// change. New roles apply from the user's next sign-in.
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&user_id)))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: CurrentUser,
    Json(update): Json<UserAdminUpdate>,
) -> Result<Json<UserResponse>> {
    require_role(&current_user, Role::Admin)?;

    if user_id == current_user.id
        && (update.role.is_some_and(|role| role != Role::Admin) || update.is_active == Some(false))
    {
        return Err(Error::BadRequest {
            message: "Admins cannot demote or deactivate their own account".to_string(),
        });
    }

    if state.users.get_by_id(user_id).await?.is_none() {
        return Err(user_not_found(user_id));
    }

    let user = state.users.update(user_id, &UserUpdateDBRequest::from(update)).await?;
    info!(
        "Admin {} set user {} to role {} (active: {})",
        abbrev_uuid(&current_user.id),
        abbrev_uuid(&user.id),
        user.role,
        user.is_active
    );

    Ok(Json(UserResponse::from(user)))
}
