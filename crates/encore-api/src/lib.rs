pub mod auth;
pub mod blocking;
pub mod error;
pub mod listens;
pub mod middleware;
pub mod notifications;
pub mod routes;
pub mod songs;
pub mod subscriptions;
pub mod users;

pub use auth::{AppState, AppStateInner};
pub use error::SocialError;
