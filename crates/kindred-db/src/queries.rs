use crate::Database;
use crate::models::{ChannelRow, InterestRow};
use anyhow::Result;
use kindred_types::models::InterestStatus;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

/// What `save_interest` did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    Created,
    Updated,
    Unchanged,
}

/// A save that would create a record in a settled state or move an
/// existing one anywhere but `pending -> accepted|declined`.
#[derive(Debug, Error)]
#[error("interest {from_user_id} -> {to_user_id} cannot go from {} to {requested}", .current.map_or("nothing", |s| s.as_str()))]
pub struct InvalidTransition {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub current: Option<InterestStatus>,
    pub requested: InterestStatus,
}

const INTEREST_COLUMNS: &str = "from_user_id, to_user_id, status, created_on, updated_on";
const CHANNEL_COLUMNS: &str =
    "id, user_low, user_high, created_by, latest_message, created_on, updated_on";

impl Database {
    // -- Interests --

    pub fn get_interest(&self, from_user_id: i64, to_user_id: i64) -> Result<Option<InterestRow>> {
        self.with_conn(|conn| query_interest(conn, from_user_id, to_user_id))
    }

    /// Create the `(from, to)` record as pending if absent, otherwise apply
    /// a response to a pending record. Repeating the stored status is a no-op.
    ///
    /// Any other change fails with [`InvalidTransition`] and leaves the row as is.
    pub fn save_interest(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        status: Option<&str>,
        now_ms: i64,
    ) -> Result<(InterestRow, SaveKind)> {
        let requested = status.map(InterestStatus::parse);
        self.with_conn(|conn| {
            let existing = query_interest(conn, from_user_id, to_user_id)?;
            let current = existing.as_ref().map(|row| InterestStatus::parse(&row.status));

            let kind = match (current, requested) {
                (None, None | Some(InterestStatus::Pending)) => {
                    conn.execute(
                        "INSERT INTO interests (from_user_id, to_user_id, status, created_on, updated_on)
                         VALUES (?1, ?2, 'pending', ?3, ?3)",
                        rusqlite::params![from_user_id, to_user_id, now_ms],
                    )?;
                    SaveKind::Created
                }
                (Some(_), None) => SaveKind::Unchanged,
                (Some(current), Some(next)) if current == next => SaveKind::Unchanged,
                (Some(current), Some(next)) if current.can_become(next) => {
                    conn.execute(
                        "UPDATE interests SET status = ?3, updated_on = ?4
                         WHERE from_user_id = ?1 AND to_user_id = ?2",
                        rusqlite::params![from_user_id, to_user_id, next.as_str(), now_ms],
                    )?;
                    SaveKind::Updated
                }
                (current, Some(requested)) => {
                    return Err(InvalidTransition {
                        from_user_id,
                        to_user_id,
                        current,
                        requested,
                    }
                    .into());
                }
            };

            let row = query_interest(conn, from_user_id, to_user_id)?
                .ok_or_else(|| anyhow::anyhow!("Interest {} -> {} vanished after save", from_user_id, to_user_id))?;
            Ok((row, kind))
        })
    }

    /// Interests addressed to `user_id`, newest first.
    pub fn list_interests_to(&self, user_id: i64, status: Option<&str>) -> Result<Vec<InterestRow>> {
        self.with_conn(|conn| query_interest_list(conn, "to_user_id", user_id, status))
    }

    /// Interests sent by `user_id`, newest first.
    pub fn list_interests_from(&self, user_id: i64, status: Option<&str>) -> Result<Vec<InterestRow>> {
        self.with_conn(|conn| query_interest_list(conn, "from_user_id", user_id, status))
    }

    // -- Channels --

    pub fn get_channel(&self, a: i64, b: i64) -> Result<Option<ChannelRow>> {
        let (low, high) = ordered(a, b);
        self.with_conn(|conn| query_channel(conn, low, high))
    }

    /// Create the channel for `{a, b}` unless one exists.
    /// Returns the stored row and whether this call created it.
    pub fn create_channel(&self, created_by: i64, other: i64, now_ms: i64) -> Result<(ChannelRow, bool)> {
        let (low, high) = ordered(created_by, other);
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channels (user_low, user_high, created_by, created_on, updated_on)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![low, high, created_by, now_ms],
            )?;

            let row = query_channel(conn, low, high)?
                .ok_or_else(|| anyhow::anyhow!("Channel {}<->{} vanished after insert", low, high))?;
            Ok((row, inserted == 1))
        })
    }

    /// Channels the user takes part in, most recently updated first.
    pub fn list_channels(&self, user_id: i64) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM channels WHERE user_low = ?1 OR user_high = ?1 ORDER BY updated_on DESC, id DESC",
                CHANNEL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_channel)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn ordered(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

fn map_interest(row: &rusqlite::Row<'_>) -> rusqlite::Result<InterestRow> {
    Ok(InterestRow {
        from_user_id: row.get(0)?,
        to_user_id: row.get(1)?,
        status: row.get(2)?,
        created_on: row.get(3)?,
        updated_on: row.get(4)?,
    })
}

fn map_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        user_low: row.get(1)?,
        user_high: row.get(2)?,
        created_by: row.get(3)?,
        latest_message: row.get(4)?,
        created_on: row.get(5)?,
        updated_on: row.get(6)?,
    })
}

fn query_interest(conn: &Connection, from_user_id: i64, to_user_id: i64) -> Result<Option<InterestRow>> {
    let sql = format!(
        "SELECT {} FROM interests WHERE from_user_id = ?1 AND to_user_id = ?2",
        INTEREST_COLUMNS
    );
    let row = conn
        .query_row(&sql, [from_user_id, to_user_id], map_interest)
        .optional()?;
    Ok(row)
}

fn query_interest_list(
    conn: &Connection,
    column: &str,
    user_id: i64,
    status: Option<&str>,
) -> Result<Vec<InterestRow>> {
    let sql = format!(
        "SELECT {} FROM interests WHERE {} = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY created_on DESC",
        INTEREST_COLUMNS, column
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![user_id, status], map_interest)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_channel(conn: &Connection, low: i64, high: i64) -> Result<Option<ChannelRow>> {
    let sql = format!(
        "SELECT {} FROM channels WHERE user_low = ?1 AND user_high = ?2",
        CHANNEL_COLUMNS
    );
    let row = conn.query_row(&sql, [low, high], map_channel).optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_types::models::InterestStatus;

    #[test]
    fn save_interest_creates_then_updates() {
        let db = Database::open_in_memory().unwrap();

        let (row, kind) = db.save_interest(1, 2, None, 100).unwrap();
        assert_eq!(kind, SaveKind::Created);
        assert_eq!(row.status, "pending");

        let (row, kind) = db.save_interest(1, 2, None, 200).unwrap();
        assert_eq!(kind, SaveKind::Unchanged);
        assert_eq!(row.updated_on, 100);

        let (row, kind) = db.save_interest(1, 2, Some("accepted"), 300).unwrap();
        assert_eq!(kind, SaveKind::Updated);
        assert_eq!(row.created_on, 100);
        assert_eq!(row.updated_on, 300);
        assert_eq!(row.into_interest().status, InterestStatus::Accepted);
    }

    #[test]
    fn settled_interest_cannot_change() {
        let db = Database::open_in_memory().unwrap();
        db.save_interest(1, 2, None, 100).unwrap();
        db.save_interest(1, 2, Some("accepted"), 200).unwrap();

        for status in ["declined", "pending", "withdrawn"] {
            let err = db.save_interest(1, 2, Some(status), 300).unwrap_err();
            let invalid = err.downcast_ref::<InvalidTransition>().unwrap();
            assert_eq!(invalid.current, Some(InterestStatus::Accepted));
        }

        let (row, kind) = db.save_interest(1, 2, Some("accepted"), 400).unwrap();
        assert_eq!(kind, SaveKind::Unchanged);
        assert_eq!(row.status, "accepted");
        assert_eq!(row.updated_on, 200);
    }

    #[test]
    fn interest_is_never_created_settled() {
        let db = Database::open_in_memory().unwrap();

        let err = db.save_interest(1, 2, Some("accepted"), 100).unwrap_err();
        let invalid = err.downcast_ref::<InvalidTransition>().unwrap();
        assert_eq!(invalid.current, None);
        assert_eq!(invalid.requested, InterestStatus::Accepted);
        assert!(db.get_interest(1, 2).unwrap().is_none());

        let (row, kind) = db.save_interest(1, 2, Some("pending"), 100).unwrap();
        assert_eq!(kind, SaveKind::Created);
        assert_eq!(row.status, "pending");
    }

    #[test]
    fn reverse_pair_is_independent() {
        let db = Database::open_in_memory().unwrap();
        db.save_interest(1, 2, None, 100).unwrap();
        db.save_interest(1, 2, Some("declined"), 100).unwrap();

        assert!(db.get_interest(2, 1).unwrap().is_none());
        db.save_interest(2, 1, None, 200).unwrap();
        assert_eq!(db.get_interest(2, 1).unwrap().unwrap().status, "pending");
        assert_eq!(db.get_interest(1, 2).unwrap().unwrap().status, "declined");
    }

    #[test]
    fn lists_are_newest_first_and_filtered() {
        let db = Database::open_in_memory().unwrap();
        db.save_interest(2, 1, None, 100).unwrap();
        db.save_interest(3, 1, None, 300).unwrap();
        db.save_interest(4, 1, None, 200).unwrap();
        db.save_interest(4, 1, Some("accepted"), 400).unwrap();

        let incoming: Vec<i64> = db
            .list_interests_to(1, None)
            .unwrap()
            .into_iter()
            .map(|r| r.from_user_id)
            .collect();
        assert_eq!(incoming, vec![3, 4, 2]);

        let accepted = db.list_interests_to(1, Some("accepted")).unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].from_user_id, 4);

        assert_eq!(db.list_interests_from(4, None).unwrap().len(), 1);
    }

    #[test]
    fn one_channel_per_unordered_pair() {
        let db = Database::open_in_memory().unwrap();

        let (first, created) = db.create_channel(5, 3, 100).unwrap();
        assert!(created);
        let (second, created) = db.create_channel(3, 5, 200).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let channel = db.get_channel(3, 5).unwrap().unwrap().into_channel();
        assert_eq!(channel.participant_a, 5);
        assert_eq!(channel.participant_b, 3);
        assert!(channel.latest_message.is_none());

        assert_eq!(db.list_channels(3).unwrap().len(), 1);
        assert!(db.list_channels(4).unwrap().is_empty());
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kindred.db");

        {
            let db = Database::open(&path).unwrap();
            db.save_interest(1, 2, None, 100).unwrap();
            db.create_channel(1, 2, 100).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert!(db.get_interest(1, 2).unwrap().is_some());
        assert!(db.get_channel(2, 1).unwrap().is_some());
    }
}
