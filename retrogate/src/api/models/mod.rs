//! Request/response data structures for the API.

pub mod auth;
pub mod users;
