//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Authentication** (`/api/auth/*`): sign-in with credentials or a provider, sign-up,
//!   sign-out, session lookup
//! - **Profile** (`/api/profile`): the caller's own account
//! - **Admin** (`/api/admin/users/*`): account management, admin only

pub mod handlers;
pub mod models;
