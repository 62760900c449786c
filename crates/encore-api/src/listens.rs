use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use encore_db::Database;
use encore_db::models::ListenWrite;
use encore_types::UserId;
use encore_types::api::{Claims, ListenResponse};
use encore_types::models::RecentListen;

use crate::auth::AppStateInner;
use crate::blocking::{run_blocking, with_db};
use crate::error::SocialError;

/// Replay-suppression window for a (song, listener) pair.
pub const LISTEN_WINDOW_HOURS: i64 = 24;

/// Tracks plays: a per-pair cooldown record plus the set of distinct
/// listeners, which never shrinks.
#[derive(Clone)]
pub struct ListenTracker {
    db: Arc<Database>,
}

impl ListenTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn record_listen(&self, song_id: Uuid, user_id: UserId) -> Result<ListenWrite, SocialError> {
        self.record_listen_at(song_id, user_id, Utc::now()).await
    }

    pub async fn record_listen_at(
        &self,
        song_id: Uuid,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<ListenWrite, SocialError> {
        let db = self.db.clone();
        let expires_at = now + Duration::hours(LISTEN_WINDOW_HOURS);
        let write = run_blocking(move || {
            if db.get_song(song_id)?.is_none() {
                return Err(SocialError::NotFound);
            }
            // Token outlived its account.
            if db.get_user_by_id(user_id)?.is_none() {
                return Err(SocialError::Unauthorized);
            }
            let write = db.upsert_listen(song_id, user_id, now, expires_at)?;
            db.add_song_listener(song_id, user_id)?;
            Ok(write)
        })
        .await?;

        debug!("listen {:?} for song {} by {}", write, song_id, user_id);
        Ok(write)
    }

    /// The user's plays with their songs, most recent first play first.
    pub async fn recent_for(&self, user_id: UserId, limit: u32) -> Result<Vec<RecentListen>, SocialError> {
        with_db(&self.db, move |db| {
            db.get_recent_listens(user_id, limit)?
                .into_iter()
                .map(|row| row.into_model())
                .collect()
        })
        .await
    }

    pub async fn distinct_listeners(&self, song_id: Uuid) -> Result<u64, SocialError> {
        with_db(&self.db, move |db| db.count_song_listeners(song_id)).await
    }
}

pub async fn record_listen(
    State(state): State<Arc<AppStateInner>>,
    Path(song_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    state.listens.record_listen(song_id, claims.sub).await?;
    let listeners = state.listens.distinct_listeners(song_id).await?;
    Ok(Json(ListenResponse { song_id, listeners }))
}
