//! API request/response models for sign-in, sign-up, and sessions.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::api::models::users::{CurrentUser, UserResponse};

/// Email/password sign-in. Absent fields deserialize as empty so they surface as `MissingField`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSuccessResponse {
    pub message: String,
}

/// The identity carried by the caller's session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user: CurrentUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub signin_url: String,
}

/// What the sign-in page should offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersInfo {
    pub credentials: bool,
    pub registration: bool,
    pub providers: Vec<ProviderInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSignInQuery {
    #[serde(rename = "callbackUrl")]
    pub callback_url: Option<String>,
}

/// Query string a provider sends back to the callback endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// JSON body plus a `Set-Cookie` header
#[derive(Debug)]
pub struct WithCookie<T> {
    pub status: StatusCode,
    pub body: T,
    pub cookie: String,
}

impl<T: Serialize> IntoResponse for WithCookie<T> {
    fn into_response(self) -> Response {
        (self.status, [(header::SET_COOKIE, self.cookie)], Json(self.body)).into_response()
    }
}

pub type SignInResponse = WithCookie<AuthResponse>;
pub type SignOutResponse = WithCookie<AuthSuccessResponse>;
