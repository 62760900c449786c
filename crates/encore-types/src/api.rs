use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;
use crate::models::{Notification, RecentListen, Song, SubscriptionEdge, User};

// -- JWT Claims --

/// Bearer token claims. `sub` is the user's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub login: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: UserId,
    pub login: String,
    pub token: String,
}

// -- Profiles --

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: User,
    pub notifications: Vec<Notification>,
    pub subscribers: Vec<UserId>,
    pub subscriptions: Vec<UserId>,
    pub recent_listens: Vec<RecentListen>,
    /// Whether the caller follows this user.
    pub followed_by_me: bool,
}

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub message: String,
    pub user_id: UserId,
    pub edge: SubscriptionEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserSortKey {
    Popular,
    NameAsc,
    NameDesc,
}

/// `GET /users`. Without `sort_by` the newest accounts come first;
/// `recommended` is shorthand for `sort_by=popular`.
#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
    #[serde(default)]
    pub search: String,
    pub sort_by: Option<UserSortKey>,
    #[serde(default)]
    pub recommended: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_follower_limit")]
    pub limit: u32,
}

// -- Songs --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSongRequest {
    pub title: String,
    pub author: String,
}

#[derive(Debug, Serialize)]
pub struct SongResponse {
    #[serde(flatten)]
    pub song: Song,
    pub listeners: u64,
}

/// `GET /songs`, matched against title or author.
#[derive(Debug, Deserialize)]
pub struct SongListQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Serialize)]
pub struct ListenResponse {
    pub song_id: Uuid,
    pub listeners: u64,
}

// -- Paging --

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

fn default_page_size() -> u32 {
    5
}

fn default_follower_limit() -> u32 {
    3
}
