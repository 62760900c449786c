//! Database row types. These map directly to SQLite rows.
//! Distinct from encore-types models to keep the DB layer independent;
//! `into_model` does the parsing at the boundary.

use anyhow::Result;

use encore_types::models::{ListenRecord, Notification, RecentListen, Song, User};

use crate::parse_timestamp;

pub struct UserRow {
    pub id: String,
    pub login: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_model(self) -> Result<User> {
        Ok(User {
            id: self.id.parse()?,
            login: self.login,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct SongRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub author: String,
    pub created_at: String,
}

impl SongRow {
    pub fn into_model(self) -> Result<Song> {
        Ok(Song {
            id: self.id.parse()?,
            user_id: self.user_id.parse()?,
            title: self.title,
            author: self.author,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct NotificationRow {
    pub id: String,
    pub recipient_id: String,
    pub text: String,
    pub link: String,
    pub created_at: String,
    pub expires_at: String,
}

impl NotificationRow {
    pub fn into_model(self) -> Result<Notification> {
        Ok(Notification {
            id: self.id.parse()?,
            recipient_id: self.recipient_id.parse()?,
            text: self.text,
            link: self.link,
            created_at: parse_timestamp(&self.created_at)?,
            expires_at: parse_timestamp(&self.expires_at)?,
        })
    }
}

pub struct ListenRow {
    pub song_id: String,
    pub user_id: String,
    pub created_at: String,
    pub expires_at: String,
}

impl ListenRow {
    pub fn into_model(self) -> Result<ListenRecord> {
        Ok(ListenRecord {
            song_id: self.song_id.parse()?,
            user_id: self.user_id.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            expires_at: parse_timestamp(&self.expires_at)?,
        })
    }
}

/// What `upsert_listen` did to the pair's row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenWrite {
    Refreshed,
    Inserted,
}

/// A listen record together with the song it refers to.
pub struct RecentListenRow {
    pub listen: ListenRow,
    pub song: SongRow,
}

impl RecentListenRow {
    pub fn into_model(self) -> Result<RecentListen> {
        Ok(RecentListen {
            listen: self.listen.into_model()?,
            song: self.song.into_model()?,
        })
    }
}

/// Ordering for user listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserSort {
    #[default]
    Newest,
    /// Most followers first, ties by login descending.
    Popular,
    NameAsc,
    NameDesc,
}
