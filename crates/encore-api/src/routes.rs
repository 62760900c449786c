use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{listens, songs, subscriptions, users};

/// REST surface. The WebSocket gateway is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list_users))
        .route("/users/{id}", get(users::get_profile))
        .route("/users/{id}/songs", get(users::list_user_songs))
        .route("/users/{id}/subscribers", get(subscriptions::list_subscribers))
        .route("/users/{id}/subscriptions", get(subscriptions::list_subscriptions))
        .route(
            "/users/{id}/follow",
            post(subscriptions::follow).delete(subscriptions::unfollow),
        )
        .route("/songs", get(songs::list_songs).post(songs::create_song))
        .route("/songs/{id}", get(songs::get_song).delete(songs::delete_song))
        .route("/songs/{id}/listen", post(listens::record_listen))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
