use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: uuid::Uuid,
    pub recipient_id: UserId,
    pub text: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Replay-suppression record, one per (song, listener) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenRecord {
    pub song_id: uuid::Uuid,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Directed follow edge: `subscriber_id` follows `subscribed_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionEdge {
    pub subscriber_id: UserId,
    pub subscribed_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Entry of a profile's recently-played section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentListen {
    pub listen: ListenRecord,
    pub song: Song,
}
