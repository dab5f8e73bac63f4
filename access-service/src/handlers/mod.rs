pub mod audit;
pub mod auth;
pub mod catalog;
pub mod metrics;
pub mod modules;
pub mod roles;
pub mod users;

/// Module guarding role, module, grant and audit administration.
pub const ROLES_PERMISSIONS: &str = "roles_permissions";
/// Module guarding user management.
pub const USER_DIRECTORY: &str = "user_directory";
