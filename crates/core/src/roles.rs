//! Well-known role name constants.
//!
//! These must match the role strings embedded in issued access tokens.

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";
