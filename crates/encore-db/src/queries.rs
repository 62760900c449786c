use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use uuid::Uuid;

use encore_types::UserId;

use crate::models::{ListenRow, ListenWrite, NotificationRow, RecentListenRow, SongRow, UserRow, UserSort};
use crate::{Database, timestamp};

impl Database {
    // -- Users --

    /// Returns `false` if `login` is already taken.
    pub fn create_user(
        &self,
        id: UserId,
        login: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let added = conn.execute(
                "INSERT INTO users (id, login, password, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(login) DO NOTHING",
                params![id.to_string(), login, password_hash, timestamp(now)],
            )?;
            Ok(added > 0)
        })
    }

    pub fn get_user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "login", login))
    }

    pub fn get_user_by_id(&self, id: UserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    // -- Follows --

    /// Inserts the edge unless it already exists. Returns whether a row was added.
    pub fn insert_follow_if_absent(
        &self,
        subscriber_id: UserId,
        subscribed_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let added = conn.execute(
                "INSERT OR IGNORE INTO follows (subscriber_id, subscribed_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![subscriber_id.to_string(), subscribed_id.to_string(), timestamp(now)],
            )?;
            Ok(added > 0)
        })
    }

    /// Returns whether an edge was removed.
    pub fn delete_follow(&self, subscriber_id: UserId, subscribed_id: UserId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM follows WHERE subscriber_id = ?1 AND subscribed_id = ?2",
                params![subscriber_id.to_string(), subscribed_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn follow_exists(&self, subscriber_id: UserId, subscribed_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM follows WHERE subscriber_id = ?1 AND subscribed_id = ?2",
                    params![subscriber_id.to_string(), subscribed_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Users following `user_id`, oldest edge first.
    pub fn get_subscriber_ids(&self, user_id: UserId) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            query_ids(
                conn,
                "SELECT subscriber_id FROM follows WHERE subscribed_id = ?1 ORDER BY created_at, rowid",
                user_id,
            )
        })
    }

    /// Users `user_id` follows, oldest edge first.
    pub fn get_subscription_ids(&self, user_id: UserId) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            query_ids(
                conn,
                "SELECT subscribed_id FROM follows WHERE subscriber_id = ?1 ORDER BY created_at, rowid",
                user_id,
            )
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, row: &NotificationRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, recipient_id, text, link, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id,
                    row.recipient_id,
                    row.text,
                    row.link,
                    row.created_at,
                    row.expires_at
                ],
            )?;
            Ok(())
        })
    }

    /// All rows for the recipient, newest first. Expired rows are included
    /// until `delete_expired_notifications` runs for this recipient.
    pub fn get_notifications(&self, recipient_id: UserId) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, text, link, created_at, expires_at
                 FROM notifications
                 WHERE recipient_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;

            let rows = stmt
                .query_map([recipient_id.to_string()], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        text: row.get(2)?,
                        link: row.get(3)?,
                        created_at: row.get(4)?,
                        expires_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Deletes the recipient's rows with `expires_at <= now`. Returns the count.
    pub fn delete_expired_notifications(
        &self,
        recipient_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM notifications WHERE recipient_id = ?1 AND expires_at <= ?2",
                params![recipient_id.to_string(), timestamp(now)],
            )?;
            Ok(deleted)
        })
    }

    // -- Songs --

    pub fn insert_song(&self, row: &SongRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO songs (id, user_id, title, author, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.id, row.user_id, row.title, row.author, row.created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_song(&self, id: Uuid) -> Result<Option<SongRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, title, author, created_at FROM songs WHERE id = ?1",
                    [id.to_string()],
                    song_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Listens --

    /// Refreshes the pair's row to `expires_at`, inserting it if none exists.
    /// The lookup ignores the current expiry, so an expired row is refreshed
    /// rather than superseded.
    pub fn upsert_listen(
        &self,
        song_id: Uuid,
        user_id: UserId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ListenWrite> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let song = song_id.to_string();
            let user = user_id.to_string();

            let updated = tx.execute(
                "UPDATE listens SET expires_at = ?3 WHERE song_id = ?1 AND user_id = ?2",
                params![song, user, timestamp(expires_at)],
            )?;

            let write = if updated == 0 {
                tx.execute(
                    "INSERT INTO listens (song_id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                    params![song, user, timestamp(now), timestamp(expires_at)],
                )?;
                ListenWrite::Inserted
            } else {
                ListenWrite::Refreshed
            };

            tx.commit()?;
            Ok(write)
        })
    }

    pub fn get_listens(&self, song_id: Uuid, user_id: UserId) -> Result<Vec<ListenRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT song_id, user_id, created_at, expires_at
                 FROM listens WHERE song_id = ?1 AND user_id = ?2",
            )?;

            let rows = stmt
                .query_map(params![song_id.to_string(), user_id.to_string()], |row| {
                    Ok(ListenRow {
                        song_id: row.get(0)?,
                        user_id: row.get(1)?,
                        created_at: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Idempotent: a listener already in the relation is left alone.
    pub fn add_song_listener(&self, song_id: Uuid, user_id: UserId) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO song_listeners (song_id, user_id) VALUES (?1, ?2)",
                params![song_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn count_song_listeners(&self, song_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM song_listeners WHERE song_id = ?1",
                [song_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Listings --

    /// Users whose login contains `search`, paged.
    pub fn list_users(&self, search: &str, sort: UserSort, offset: u32, limit: u32) -> Result<Vec<UserRow>> {
        let order = match sort {
            UserSort::Newest => "u.created_at DESC, u.rowid DESC",
            UserSort::Popular => {
                "(SELECT COUNT(*) FROM follows p WHERE p.subscribed_id = u.id) DESC, u.login DESC"
            }
            UserSort::NameAsc => "u.login ASC",
            UserSort::NameDesc => "u.login DESC",
        };
        let sql = format!(
            "SELECT u.id, u.login, u.password, u.created_at FROM users u
             WHERE instr(u.login, ?1) > 0
             ORDER BY {}
             LIMIT ?2 OFFSET ?3",
            order
        );

        self.with_conn(|conn| query_users(conn, &sql, params![search, limit, offset]))
    }

    pub fn count_users(&self, search: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE instr(login, ?1) > 0",
                [search],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Followers of `user_id`, most-followed first.
    pub fn get_subscriber_users(&self, user_id: UserId, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            query_users(
                conn,
                "SELECT u.id, u.login, u.password, u.created_at
                 FROM follows f JOIN users u ON u.id = f.subscriber_id
                 WHERE f.subscribed_id = ?1
                 ORDER BY (SELECT COUNT(*) FROM follows p WHERE p.subscribed_id = u.id) DESC, u.login DESC
                 LIMIT ?2",
                params![user_id.to_string(), limit],
            )
        })
    }

    /// Accounts `user_id` follows, most-followed first.
    pub fn get_subscription_users(&self, user_id: UserId, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            query_users(
                conn,
                "SELECT u.id, u.login, u.password, u.created_at
                 FROM follows f JOIN users u ON u.id = f.subscribed_id
                 WHERE f.subscriber_id = ?1
                 ORDER BY (SELECT COUNT(*) FROM follows p WHERE p.subscribed_id = u.id) DESC, u.login DESC
                 LIMIT ?2",
                params![user_id.to_string(), limit],
            )
        })
    }

    /// Songs whose title or author contains `search`, newest first, paged.
    pub fn list_songs(&self, search: &str, offset: u32, limit: u32) -> Result<Vec<SongRow>> {
        self.with_conn(|conn| {
            query_songs(
                conn,
                "SELECT id, user_id, title, author, created_at FROM songs
                 WHERE instr(title, ?1) > 0 OR instr(author, ?1) > 0
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
                params![search, limit, offset],
            )
        })
    }

    pub fn count_songs(&self, search: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM songs WHERE instr(title, ?1) > 0 OR instr(author, ?1) > 0",
                [search],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn get_songs_by_user(&self, user_id: UserId) -> Result<Vec<SongRow>> {
        self.with_conn(|conn| {
            query_songs(
                conn,
                "SELECT id, user_id, title, author, created_at FROM songs
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
                params![user_id.to_string()],
            )
        })
    }

    /// Deletes the song if `owner_id` uploaded it. Its listens and listeners
    /// go with it.
    pub fn delete_song(&self, id: Uuid, owner_id: UserId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM songs WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), owner_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    /// The user's listen records joined with their songs, most recent first.
    pub fn get_recent_listens(&self, user_id: UserId, limit: u32) -> Result<Vec<RecentListenRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.song_id, l.user_id, l.created_at, l.expires_at,
                        s.id, s.user_id, s.title, s.author, s.created_at
                 FROM listens l JOIN songs s ON s.id = l.song_id
                 WHERE l.user_id = ?1
                 ORDER BY l.created_at DESC, l.rowid DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(params![user_id.to_string(), limit], |row| {
                    Ok(RecentListenRow {
                        listen: ListenRow {
                            song_id: row.get(0)?,
                            user_id: row.get(1)?,
                            created_at: row.get(2)?,
                            expires_at: row.get(3)?,
                        },
                        song: SongRow {
                            id: row.get(4)?,
                            user_id: row.get(5)?,
                            title: row.get(6)?,
                            author: row.get(7)?,
                            created_at: row.get(8)?,
                        },
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, login, password, created_at FROM users WHERE {} = ?1", column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], user_row).optional()?;

    Ok(row)
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        login: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn song_row(row: &Row<'_>) -> rusqlite::Result<SongRow> {
    Ok(SongRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_users(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<UserRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, user_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_songs(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<SongRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, song_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_ids(conn: &Connection, sql: &str, user_id: UserId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}
