//! Role checks for handlers.
//!
//! The gate applies the same comparison to whole path prefixes; handlers call [`require_role`]
//! for operations that must hold regardless of how routes are configured.

use crate::{
    api::models::users::{CurrentUser, Role},
    errors::{Error, Result},
};

/// Fail with [`Error::InsufficientRole`] unless the user's role ranks at least `required`
pub fn require_role(user: &CurrentUser, required: Role) -> Result<()> {
    if user.role.satisfies(required) {
        Ok(())
    } else {
        Err(Error::InsufficientRole {
            required,
            actual: user.role,
        })
    }
}
