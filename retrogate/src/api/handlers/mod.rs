//! HTTP request handlers for all API endpoints.
//!
//! # Handler Modules
//!
//! - [`auth`]: Credential and provider sign-in, sign-up, sign-out, and session lookup
//! - [`profile`]: The signed-in user's own profile
//! - [`users`]: Admin reads and role/active changes for any account
//!
//! # Authentication
//!
//! Handlers that need an identity take [`CurrentUser`](crate::api::models::users::CurrentUser)
//! as an extractor. On gated paths the [`crate::auth::middleware`] gate has already verified the
//! session and stored the identity in request extensions.

pub mod auth;
pub mod profile;
pub mod users;
