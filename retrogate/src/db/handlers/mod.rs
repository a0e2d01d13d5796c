//! Repository implementations for user persistence.
//!
//! Both stores implement [`UserRepository`] and are interchangeable behind an
//! `Arc<dyn UserRepository>`:
//!
//! - [`Users`]: PostgreSQL via SQLx, selected with `database.type: external`
//! - [`InMemoryUsers`]: process-local, selected with `database.type: memory`

pub mod memory;
pub mod repository;
pub mod users;

pub use memory::InMemoryUsers;
pub use repository::UserRepository;
pub use users::Users;
