use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- One row per ordered (from, to) pair; the reverse pair is its own row.
        CREATE TABLE IF NOT EXISTS interests (
            from_user_id    INTEGER NOT NULL,
            to_user_id      INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending',
            created_on      INTEGER NOT NULL,
            updated_on      INTEGER NOT NULL,
            PRIMARY KEY (from_user_id, to_user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_interests_to
            ON interests(to_user_id, created_on);

        -- One row per unordered pair, stored as (low, high).
        CREATE TABLE IF NOT EXISTS channels (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_low        INTEGER NOT NULL,
            user_high       INTEGER NOT NULL,
            created_by      INTEGER NOT NULL,
            latest_message  TEXT,
            created_on      INTEGER NOT NULL,
            updated_on      INTEGER NOT NULL,
            UNIQUE(user_low, user_high)
        );

        CREATE INDEX IF NOT EXISTS idx_channels_high
            ON channels(user_high);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
