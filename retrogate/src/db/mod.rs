//! Data access layer.
//!
//! ```text
//! handlers (api)  →  db::handlers (UserRepository)  →  db::models  →  PostgreSQL | memory
//! ```
//!
//! - [`handlers`]: repository trait and its PostgreSQL and in-memory implementations
//! - [`models`]: records exchanged with the repositories
//! - [`errors`]: database-specific error types

pub mod errors;
pub mod handlers;
pub mod models;
