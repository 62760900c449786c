use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use encore_db::Database;
use encore_db::models::SongRow;
use encore_db::timestamp;
use encore_gateway::dispatcher::Dispatcher;
use encore_types::UserId;
use encore_types::api::{Claims, CreateSongRequest, Page, SongListQuery, SongResponse};
use encore_types::events::GatewayEvent;
use encore_types::models::Song;

use crate::auth::AppStateInner;
use crate::blocking::{run_blocking, with_db};
use crate::error::SocialError;
use crate::notifications::NotificationStore;
use crate::subscriptions::SubscriptionGraph;
use crate::users::MAX_PAGE_SIZE;

/// Announces new uploads to the uploader's subscribers.
///
/// Notifications are written one recipient at a time. A store failure
/// part-way leaves the earlier recipients notified and is returned as is.
#[derive(Clone)]
pub struct SongPublisher {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    graph: SubscriptionGraph,
    notifications: NotificationStore,
}

impl SongPublisher {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Dispatcher,
        graph: SubscriptionGraph,
        notifications: NotificationStore,
    ) -> Self {
        Self {
            db,
            dispatcher,
            graph,
            notifications,
        }
    }

    pub async fn publish(&self, uploader_id: UserId, title: &str, author: &str) -> Result<Song, SocialError> {
        self.publish_at(uploader_id, title, author, Utc::now()).await
    }

    pub async fn publish_at(
        &self,
        uploader_id: UserId,
        title: &str,
        author: &str,
        now: DateTime<Utc>,
    ) -> Result<Song, SocialError> {
        let title = title.trim();
        let author = author.trim();
        if title.is_empty() || author.is_empty() {
            return Err(SocialError::BadRequest("Miss the field"));
        }

        let song = Song {
            id: Uuid::new_v4(),
            user_id: uploader_id,
            title: title.to_string(),
            author: author.to_string(),
            created_at: now,
        };
        let row = SongRow {
            id: song.id.to_string(),
            user_id: uploader_id.to_string(),
            title: song.title.clone(),
            author: song.author.clone(),
            created_at: timestamp(now),
        };
        let db = self.db.clone();
        let uploader = run_blocking(move || {
            let uploader = db.get_user_by_id(uploader_id)?.ok_or(SocialError::Unauthorized)?;
            db.insert_song(&row)?;
            Ok(uploader)
        })
        .await?;

        let subscribers = self.graph.subscribers_of(uploader_id).await?;
        let recipients: HashSet<UserId> = subscribers.iter().copied().collect();
        let text = format!("New audio \"{}\" from {}!", song.title, uploader.login);
        let reached = self
            .dispatcher
            .dispatch(GatewayEvent::notification(text.clone()), Some(&recipients))
            .await;

        let link = format!("/songs/{}", song.id);
        for (done, subscriber) in subscribers.iter().enumerate() {
            if let Err(e) = self.notifications.create_at(*subscriber, &text, &link, now).await {
                warn!(
                    "song {}: notification failed after {} of {} subscribers",
                    song.id,
                    done,
                    subscribers.len()
                );
                return Err(e);
            }
        }

        info!(
            "{} published {} ({} subscribers, {} online)",
            uploader.login,
            song.id,
            subscribers.len(),
            reached
        );
        Ok(song)
    }

    pub async fn get(&self, song_id: Uuid) -> Result<Song, SocialError> {
        with_db(&self.db, move |db| db.get_song(song_id)?.map(|row| row.into_model()).transpose())
            .await?
            .ok_or(SocialError::NotFound)
    }

    /// Page `page` of `size` songs whose title or author contains `search`,
    /// newest first, with the total match count.
    pub async fn list(&self, search: String, page: u32, size: u32) -> Result<Page<Song>, SocialError> {
        let offset = page.saturating_mul(size);
        with_db(&self.db, move |db| {
            let items = db
                .list_songs(&search, offset, size)?
                .into_iter()
                .map(|row| row.into_model())
                .collect::<anyhow::Result<Vec<_>>>()?;
            let total = db.count_songs(&search)?;
            Ok(Page { items, total })
        })
        .await
    }

    pub async fn by_user(&self, user_id: UserId) -> Result<Vec<Song>, SocialError> {
        let db = self.db.clone();
        run_blocking(move || {
            if db.get_user_by_id(user_id)?.is_none() {
                return Err(SocialError::NotFound);
            }
            let songs = db
                .get_songs_by_user(user_id)?
                .into_iter()
                .map(|row| row.into_model())
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(songs)
        })
        .await
    }

    /// Removes an upload. Its listens and listener set go with it.
    pub async fn delete(&self, song_id: Uuid, caller_id: UserId) -> Result<(), SocialError> {
        let db = self.db.clone();
        run_blocking(move || {
            let row = db.get_song(song_id)?.ok_or(SocialError::NotFound)?;
            if row.user_id != caller_id.to_string() {
                return Err(SocialError::Forbidden);
            }
            // Owner already checked; false only if a concurrent delete won.
            if !db.delete_song(song_id, caller_id)? {
                return Err(SocialError::NotFound);
            }
            Ok(())
        })
        .await?;

        info!("song {} deleted by {}", song_id, caller_id);
        Ok(())
    }
}

pub async fn create_song(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateSongRequest>,
) -> Result<impl IntoResponse, SocialError> {
    let song = state.songs.publish(claims.sub, &req.title, &req.author).await?;
    Ok((StatusCode::CREATED, Json(SongResponse { song, listeners: 0 })))
}

pub async fn get_song(
    State(state): State<Arc<AppStateInner>>,
    Path(song_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let song = state.songs.get(song_id).await?;
    let listeners = state.listens.distinct_listeners(song_id).await?;
    Ok(Json(SongResponse { song, listeners }))
}

pub async fn list_songs(
    State(state): State<Arc<AppStateInner>>,
    Query(query): Query<SongListQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    let size = query.size.clamp(1, MAX_PAGE_SIZE);
    let page = state.songs.list(query.search, query.page, size).await?;
    Ok(Json(page))
}

pub async fn delete_song(
    State(state): State<Arc<AppStateInner>>,
    Path(song_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, SocialError> {
    state.songs.delete(song_id, claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use encore_gateway::registry::{ConnectionHandle, ConnectionRegistry};

    use crate::listens::ListenTracker;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn setup(db: &Arc<Database>, dispatcher: &Dispatcher) -> (SongPublisher, NotificationStore) {
        let notifications = NotificationStore::new(db.clone());
        let graph = SubscriptionGraph::new(db.clone(), dispatcher.clone(), notifications.clone());
        let publisher = SongPublisher::new(db.clone(), dispatcher.clone(), graph, notifications.clone());
        (publisher, notifications)
    }

    #[tokio::test]
    async fn upload_fans_out_to_subscribers_only() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (artist, fan, offline_fan, stranger) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for (id, login) in [(artist, "artist"), (fan, "fan"), (offline_fan, "quiet"), (stranger, "stranger")] {
            db.create_user(id, login, "hash", Utc::now()).unwrap();
        }

        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (fan_handle, mut fan_rx) = ConnectionHandle::new();
        let (stranger_handle, mut stranger_rx) = ConnectionHandle::new();
        dispatcher.registry().register(fan, fan_handle).await;
        dispatcher.registry().register(stranger, stranger_handle).await;

        db.insert_follow_if_absent(fan, artist, Utc::now()).unwrap();
        db.insert_follow_if_absent(offline_fan, artist, Utc::now()).unwrap();

        let (publisher, notifications) = setup(&db, &dispatcher);
        let song = publisher.publish(artist, "Intro", "artist").await.unwrap();

        let expected = GatewayEvent::notification("New audio \"Intro\" from artist!");
        assert_eq!(fan_rx.try_recv().unwrap(), expected);
        assert!(stranger_rx.try_recv().is_err());

        for id in [fan, offline_fan] {
            let inbox = notifications.list_for(id).await.unwrap();
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox[0].link, format!("/songs/{}", song.id));
        }
        assert!(notifications.list_for(stranger).await.unwrap().is_empty());
        assert_eq!(publisher.get(song.id).await.unwrap().title, "Intro");
    }

    #[tokio::test]
    async fn blank_fields_are_rejected() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (publisher, _) = setup(&db, &dispatcher);

        assert!(matches!(
            publisher.publish(Uuid::new_v4(), "  ", "someone").await,
            Err(SocialError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn store_failure_mid_fan_out_stops_and_reports() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let artist = Uuid::new_v4();
        let fans = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        db.create_user(artist, "artist", "hash", at(0)).unwrap();

        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        for (i, fan) in fans.iter().enumerate() {
            db.create_user(*fan, &format!("fan{}", i), "hash", at(0)).unwrap();
            db.insert_follow_if_absent(*fan, artist, at(i as u32 + 1)).unwrap();
            let (handle, rx) = ConnectionHandle::new();
            dispatcher.registry().register(*fan, handle).await;
            receivers.push(rx);
        }

        // Writes for the second subscriber fail.
        let sql = format!(
            "CREATE TRIGGER reject_fan1 BEFORE INSERT ON notifications
             WHEN NEW.recipient_id = '{}'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            fans[1]
        );
        db.with_conn(|c| Ok(c.execute_batch(&sql)?)).unwrap();

        let (publisher, notifications) = setup(&db, &dispatcher);
        let result = publisher.publish_at(artist, "Intro", "artist", at(10)).await;
        assert!(matches!(result, Err(SocialError::Persistence(_))));

        // Dispatch happened before the loop, so every online fan saw it.
        for rx in receivers.iter_mut() {
            assert_eq!(
                rx.try_recv().unwrap(),
                GatewayEvent::notification("New audio \"Intro\" from artist!")
            );
        }
        assert_eq!(notifications.list_for(fans[0]).await.unwrap().len(), 1);
        assert!(notifications.list_for(fans[1]).await.unwrap().is_empty());
        assert!(notifications.list_for(fans[2]).await.unwrap().is_empty());

        // The song itself was stored.
        let page = publisher.list(String::new(), 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].title, "Intro");
    }

    #[tokio::test]
    async fn listing_searches_title_and_author_and_pages() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let artist = Uuid::new_v4();
        db.create_user(artist, "artist", "hash", at(0)).unwrap();
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (publisher, _) = setup(&db, &dispatcher);

        publisher.publish_at(artist, "Night Drive", "Kavinsky", at(1)).await.unwrap();
        publisher.publish_at(artist, "Nightcall", "Kavinsky", at(2)).await.unwrap();
        publisher.publish_at(artist, "Roads", "Portishead", at(3)).await.unwrap();

        let page = publisher.list("Night".into(), 0, 10).await.unwrap();
        let titles: Vec<&str> = page.items.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Nightcall", "Night Drive"]);
        assert_eq!(page.total, 2);

        let by_author = publisher.list("Portis".into(), 0, 10).await.unwrap();
        assert_eq!(by_author.items.len(), 1);

        let second = publisher.list(String::new(), 1, 2).await.unwrap();
        assert_eq!(second.total, 3);
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].title, "Night Drive");

        assert_eq!(publisher.by_user(artist).await.unwrap().len(), 3);
        assert!(matches!(
            publisher.by_user(Uuid::new_v4()).await,
            Err(SocialError::NotFound)
        ));
    }

    #[tokio::test]
    async fn only_the_uploader_can_delete_and_listens_go_too() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (artist, listener) = (Uuid::new_v4(), Uuid::new_v4());
        db.create_user(artist, "artist", "hash", at(0)).unwrap();
        db.create_user(listener, "listener", "hash", at(0)).unwrap();
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (publisher, _) = setup(&db, &dispatcher);
        let tracker = ListenTracker::new(db.clone());

        let song = publisher.publish_at(artist, "Intro", "artist", at(1)).await.unwrap();
        tracker.record_listen_at(song.id, listener, at(2)).await.unwrap();

        assert!(matches!(
            publisher.delete(song.id, listener).await,
            Err(SocialError::Forbidden)
        ));
        publisher.delete(song.id, artist).await.unwrap();

        assert!(matches!(publisher.get(song.id).await, Err(SocialError::NotFound)));
        assert!(matches!(
            publisher.delete(song.id, artist).await,
            Err(SocialError::NotFound)
        ));
        assert_eq!(tracker.distinct_listeners(song.id).await.unwrap(), 0);
        assert!(tracker.recent_for(listener, 10).await.unwrap().is_empty());
        assert!(db.get_listens(song.id, listener).unwrap().is_empty());
    }
}
