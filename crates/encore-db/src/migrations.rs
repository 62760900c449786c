use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                login       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE songs (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title       TEXT NOT NULL,
                author      TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_songs_user ON songs(user_id, created_at);

            -- Distinct listeners: who has ever played a song
            CREATE TABLE song_listeners (
                song_id     TEXT NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (song_id, user_id)
            );

            -- Replay-suppression window, refreshed in place
            CREATE TABLE listens (
                song_id     TEXT NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                expires_at  TEXT NOT NULL,
                UNIQUE(song_id, user_id)
            );

            CREATE TABLE follows (
                subscriber_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                subscribed_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at      TEXT NOT NULL,
                UNIQUE(subscriber_id, subscribed_id),
                CHECK(subscriber_id <> subscribed_id)
            );

            CREATE INDEX idx_follows_subscribed ON follows(subscribed_id);

            CREATE TABLE notifications (
                id              TEXT PRIMARY KEY,
                recipient_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                text            TEXT NOT NULL,
                link            TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                expires_at      TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_recipient
                ON notifications(recipient_id, expires_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
