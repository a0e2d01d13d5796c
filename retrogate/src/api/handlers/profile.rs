use axum::{Json, extract::State};
use url::Url;

use crate::{
    AppState,
    api::models::users::{CurrentUser, ProfileUpdate, UserResponse},
    db::models::users::UserUpdateDBRequest,
    errors::{Error, Result},
};

const MAX_DISPLAY_NAME_LENGTH: usize = 100;
const MAX_BIO_LENGTH: usize = 500;
const MAX_SHORT_FIELD_LENGTH: usize = 100;
const MAX_LIST_ENTRIES: usize = 10;
const MAX_LIST_ENTRY_LENGTH: usize = 50;

fn bad_request(message: impl Into<String>) -> Error {
    Error::BadRequest { message: message.into() }
}

fn check_length(label: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(bad_request(format!("{label} must be at most {max} characters")));
    }
    Ok(())
}

/// Trimmed free-text field
fn validate_short_field(label: &str, value: Option<String>) -> Result<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.trim().to_string();
    check_length(label, &value, MAX_SHORT_FIELD_LENGTH)?;
    Ok(Some(value))
}

/// Trimmed, blank entries dropped, duplicates removed keeping first occurrence
fn validate_list(label: &str, entries: Option<Vec<String>>) -> Result<Option<Vec<String>>> {
    let Some(entries) = entries else {
        return Ok(None);
    };

    let mut cleaned: Vec<String> = Vec::with_capacity(entries.len());
    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() || cleaned.iter().any(|seen| seen.eq_ignore_ascii_case(entry)) {
            continue;
        }
        check_length(label, entry, MAX_LIST_ENTRY_LENGTH)?;
        cleaned.push(entry.to_string());
    }

    if cleaned.len() > MAX_LIST_ENTRIES {
        return Err(bad_request(format!("{label} can hold at most {MAX_LIST_ENTRIES} entries")));
    }
    Ok(Some(cleaned))
}

/// Trim and check a self-service profile change
fn validate_profile_update(update: ProfileUpdate) -> Result<ProfileUpdate> {
    let display_name = match update.display_name {
        Some(name) => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(bad_request("Display name cannot be empty"));
            }
            check_length("Display name", &name, MAX_DISPLAY_NAME_LENGTH)?;
            Some(name)
        }
        None => None,
    };

    if let Some(bio) = &update.bio {
        check_length("Bio", bio, MAX_BIO_LENGTH)?;
    }

    let avatar_url = match update.avatar_url {
        Some(raw) => {
            let raw = raw.trim().to_string();
            let parsed = Url::parse(&raw).map_err(|_| bad_request("Avatar URL is not a valid URL"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(bad_request("Avatar URL must use http or https"));
            }
            Some(raw)
        }
        None => None,
    };

    Ok(ProfileUpdate {
        display_name,
        avatar_url,
        bio: update.bio,
        location: validate_short_field("Location", update.location)?,
        play_style: validate_short_field("Play style", update.play_style)?,
        favorite_genres: validate_list("Favorite genres", update.favorite_genres)?,
        favorite_platforms: validate_list("Favorite platforms", update.favorite_platforms)?,
    })
}

fn profile_not_found(user: &CurrentUser) -> Error {
    Error::NotFound {
        resource: "Profile".to_string(),
        id: user.id.to_string(),
    }
}

/// The caller's own profile.
///
/// Demo sessions have no stored record and get 404.
#[tracing::instrument(skip_all, fields(user_id = %crate::types::abbrev_uuid(&current_user.id)))]
pub async fn get_profile(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>> {
    let user = state
        .users
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| profile_not_found(&current_user))?;

    Ok(Json(UserResponse::from(user)))
}

/// Update the caller's profile fields. Absent fields are left unchanged.
#[tracing::instrument(skip_all, fields(user_id = %crate::types::abbrev_uuid(&current_user.id)))]
pub async fn update_profile(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserResponse>> {
    let update = validate_profile_update(update)?;

    if state.users.get_by_id(current_user.id).await?.is_none() {
        return Err(profile_not_found(&current_user));
    }

    let user = state.users.update(current_user.id, &UserUpdateDBRequest::from(update)).await?;
    Ok(Json(UserResponse::from(user)))
}
