//! Authentication and authorization.
//!
//! Sign-in produces a session token; the gate and the handlers consume it.
//!
//! ```text
//! credentials ──┐
//!               ├─► UserResponse ─► session::create_session_token ─► cookie / bearer
//! providers   ──┘                                                        │
//!                                  middleware (gate) ◄── current_user ◄──┘
//! ```
//!
//! # Modules
//!
//! - [`credentials`]: email/password verification (`database` and `demo` strategies)
//! - [`providers`]: OAuth2 provider bridge and local identity resolution
//! - [`session`]: JWT issuance, verification, and cookie formatting
//! - [`current_user`]: session extraction and the [`CurrentUser`](crate::api::models::users::CurrentUser) extractor
//! - [`middleware`]: the authorization gate over path prefixes
//! - [`permissions`]: role checks for handlers
//! - [`password`]: Argon2 hashing and password rules
//!
//! # Usage in Handlers
//!
//! ```ignore
//! async fn protected_handler(current_user: CurrentUser) -> Result<String, Error> {
//!     require_role(&current_user, Role::Editor)?;
//!     Ok(format!("Hello, {}!", current_user.email))
//! }
//! ```

pub mod credentials;
pub mod current_user;
pub mod middleware;
pub mod password;
pub mod permissions;
pub mod providers;
pub mod session;
