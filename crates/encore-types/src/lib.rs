pub mod api;
pub mod events;
pub mod models;

/// Identity of a user, owned by the user-management side of the system.
pub type UserId = uuid::Uuid;
