use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use encore_db::Database;
use encore_db::models::NotificationRow;
use encore_db::timestamp;
use encore_types::UserId;
use encore_types::models::Notification;

use crate::blocking::with_db;
use crate::error::SocialError;

/// How long a notification stays visible.
pub const NOTIFICATION_TTL_HOURS: i64 = 24;

/// Durable per-user inbox.
///
/// Expired rows are removed only by `expire_for`, which runs when the
/// recipient authenticates. There is no background sweep: a recipient who
/// never comes back keeps their stale rows.
#[derive(Clone)]
pub struct NotificationStore {
    db: Arc<Database>,
}

impl NotificationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create(&self, recipient_id: UserId, text: &str, link: &str) -> Result<Notification, SocialError> {
        self.create_at(recipient_id, text, link, Utc::now()).await
    }

    pub async fn create_at(
        &self,
        recipient_id: UserId,
        text: &str,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<Notification, SocialError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id,
            text: text.to_string(),
            link: link.to_string(),
            created_at: now,
            expires_at: now + Duration::hours(NOTIFICATION_TTL_HOURS),
        };

        let row = NotificationRow {
            id: notification.id.to_string(),
            recipient_id: recipient_id.to_string(),
            text: notification.text.clone(),
            link: notification.link.clone(),
            created_at: timestamp(notification.created_at),
            expires_at: timestamp(notification.expires_at),
        };
        with_db(&self.db, move |db| db.insert_notification(&row)).await?;

        debug!("notification {} created for {}", notification.id, recipient_id);
        Ok(notification)
    }

    /// Newest first.
    pub async fn list_for(&self, recipient_id: UserId) -> Result<Vec<Notification>, SocialError> {
        with_db(&self.db, move |db| {
            db.get_notifications(recipient_id)?
                .into_iter()
                .map(|row| row.into_model())
                .collect()
        })
        .await
    }

    pub async fn expire_for(&self, recipient_id: UserId) -> Result<usize, SocialError> {
        self.expire_for_at(recipient_id, Utc::now()).await
    }

    pub async fn expire_for_at(&self, recipient_id: UserId, now: DateTime<Utc>) -> Result<usize, SocialError> {
        let purged = with_db(&self.db, move |db| db.delete_expired_notifications(recipient_id, now)).await?;
        if purged > 0 {
            debug!("purged {} expired notifications for {}", purged, recipient_id);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    fn store_with_users() -> (NotificationStore, UserId, UserId) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.create_user(alice, "alice", "hash", at(0)).unwrap();
        db.create_user(bob, "bob", "hash", at(0)).unwrap();
        (NotificationStore::new(db), alice, bob)
    }

    #[tokio::test]
    async fn create_sets_one_day_expiry() {
        let (store, _, bob) = store_with_users();
        let n = store.create_at(bob, "hi", "/profile/x", at(3)).await.unwrap();
        assert_eq!(n.created_at, at(3));
        assert_eq!(n.expires_at, at(3) + Duration::hours(24));
        assert_eq!(store.list_for(bob).await.unwrap(), vec![n]);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let (store, _, bob) = store_with_users();
        store.create_at(bob, "first", "/", at(1)).await.unwrap();
        store.create_at(bob, "second", "/", at(2)).await.unwrap();
        store.create_at(bob, "third", "/", at(3)).await.unwrap();

        let texts: Vec<String> = store.list_for(bob).await.unwrap().into_iter().map(|n| n.text).collect();
        assert_eq!(texts, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn expire_for_is_scoped_to_recipient() {
        let (store, alice, bob) = store_with_users();
        store.create_at(bob, "stale", "/", at(0)).await.unwrap();
        store.create_at(bob, "fresh", "/", at(12)).await.unwrap();
        store.create_at(alice, "also stale", "/", at(0)).await.unwrap();

        let now = at(0) + Duration::hours(25);
        assert_eq!(store.expire_for_at(bob, now).await.unwrap(), 1);

        let bobs: Vec<String> = store.list_for(bob).await.unwrap().into_iter().map(|n| n.text).collect();
        assert_eq!(bobs, vec!["fresh"]);
        // Nobody expired alice's row on her behalf.
        assert_eq!(store.list_for(alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_for_unknown_recipient_is_persistence_failure() {
        let (store, _, _) = store_with_users();
        let err = store.create(Uuid::new_v4(), "hi", "/").await.unwrap_err();
        assert!(matches!(err, SocialError::Persistence(_)));
    }
}
