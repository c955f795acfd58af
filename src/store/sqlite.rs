use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use tracing::warn;

use crate::app::{PortageError, Result};
use crate::domain::{CursorRecord, ProducerRecord};
use crate::store::Store;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.lock()?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| PortageError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            PortageError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(|| {
                warn!(value = %s, "Unparseable stored timestamp, substituting current time");
                Utc::now()
            })
    }
}

impl Store for SqliteStore {
    fn producer(&self, id: &str) -> Result<Option<ProducerRecord>> {
        let conn = self.lock()?;

        let result = conn
            .query_row(
                "SELECT id, display_name, handle, updated_at FROM producers WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ProducerRecord {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        handle: row.get(2)?,
                        updated_at: Self::parse_datetime(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    fn cursor(&self, producer_id: &str) -> Result<Option<CursorRecord>> {
        let conn = self.lock()?;

        let result = conn
            .query_row(
                "SELECT producer_id, last_seen_at, last_item_id, updated_at
                 FROM cursors WHERE producer_id = ?1",
                params![producer_id],
                |row| {
                    Ok(CursorRecord {
                        producer_id: row.get(0)?,
                        last_seen_at: row.get(1)?,
                        last_item_id: row.get(2)?,
                        updated_at: Self::parse_datetime(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    fn producers(&self) -> Result<Vec<ProducerRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, display_name, handle, updated_at FROM producers ORDER BY display_name, id",
        )?;

        let producers = stmt
            .query_map([], |row| {
                Ok(ProducerRecord {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    handle: row.get(2)?,
                    updated_at: Self::parse_datetime(&row.get::<_, String>(3)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(producers)
    }

    fn commit(&self, producer: &ProducerRecord, cursor: &CursorRecord) -> Result<()> {
        let mut conn = self.lock()?;

        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO producers (id, display_name, handle, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 handle = excluded.handle,
                 updated_at = excluded.updated_at",
            params![
                producer.id,
                producer.display_name,
                producer.handle,
                producer.updated_at.to_rfc3339()
            ],
        )?;

        // Monotonic watermark: stale commits fall through without effect.
        tx.execute(
            "INSERT INTO cursors (producer_id, last_seen_at, last_item_id, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(producer_id) DO UPDATE SET
                 last_seen_at = excluded.last_seen_at,
                 last_item_id = excluded.last_item_id,
                 updated_at = excluded.updated_at
             WHERE excluded.last_seen_at >= cursors.last_seen_at",
            params![
                cursor.producer_id,
                cursor.last_seen_at,
                cursor.last_item_id,
                cursor.updated_at.to_rfc3339()
            ],
        )?;

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pair(seen_at: i64, item_id: &str) -> (ProducerRecord, CursorRecord) {
        let producer = ProducerRecord::new("sec-1", "Some Creator", "some.creator");
        let cursor = CursorRecord::new("sec-1", seen_at, item_id);
        (producer, cursor)
    }

    #[test]
    fn test_commit_and_get() {
        let store = SqliteStore::in_memory().unwrap();
        let (producer, cursor) = sample_pair(100, "item-a");

        store.commit(&producer, &cursor).unwrap();

        let got = store.producer("sec-1").unwrap().unwrap();
        assert_eq!(got.display_name, "Some Creator");
        assert_eq!(got.handle, "some.creator");

        let got = store.cursor("sec-1").unwrap().unwrap();
        assert_eq!(got.last_seen_at, 100);
        assert_eq!(got.last_item_id, "item-a");
    }

    #[test]
    fn test_absent_records() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.producer("nope").unwrap().is_none());
        assert!(store.cursor("nope").unwrap().is_none());
    }

    #[test]
    fn test_commit_advances_watermark() {
        let store = SqliteStore::in_memory().unwrap();
        let (producer, cursor) = sample_pair(100, "item-a");
        store.commit(&producer, &cursor).unwrap();

        let (producer, cursor) = sample_pair(150, "item-b");
        store.commit(&producer, &cursor).unwrap();

        let got = store.cursor("sec-1").unwrap().unwrap();
        assert_eq!(got.last_seen_at, 150);
        assert_eq!(got.last_item_id, "item-b");
    }

    #[test]
    fn test_commit_never_moves_watermark_backwards() {
        let store = SqliteStore::in_memory().unwrap();
        let (producer, cursor) = sample_pair(150, "item-b");
        store.commit(&producer, &cursor).unwrap();

        let (producer, cursor) = sample_pair(100, "item-a");
        store.commit(&producer, &cursor).unwrap();

        let got = store.cursor("sec-1").unwrap().unwrap();
        assert_eq!(got.last_seen_at, 150);
        assert_eq!(got.last_item_id, "item-b");
    }

    #[test]
    fn test_commit_updates_producer_metadata() {
        let store = SqliteStore::in_memory().unwrap();
        let (producer, cursor) = sample_pair(100, "item-a");
        store.commit(&producer, &cursor).unwrap();

        let mut renamed = producer.clone();
        renamed.display_name = "Renamed Creator".into();
        renamed.handle = "renamed.creator".into();
        let cursor = CursorRecord::new("sec-1", 120, "item-b");
        store.commit(&renamed, &cursor).unwrap();

        let got = store.producer("sec-1").unwrap().unwrap();
        assert_eq!(got.display_name, "Renamed Creator");
        assert_eq!(got.handle, "renamed.creator");
    }

    #[test]
    fn test_producers_listing_ordered() {
        let store = SqliteStore::in_memory().unwrap();

        for (id, name) in [("sec-c", "Charlie"), ("sec-a", "Alpha"), ("sec-b", "Bravo")] {
            let producer = ProducerRecord::new(id, name, name.to_lowercase());
            let cursor = CursorRecord::new(id, 1, "x");
            store.commit(&producer, &cursor).unwrap();
        }

        let names: Vec<String> = store
            .producers()
            .unwrap()
            .into_iter()
            .map(|p| p.display_name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Bravo", "Charlie"]);
    }

    #[test]
    fn test_parse_datetime_round_trips_and_survives_garbage() {
        let now = Utc::now();
        let parsed = SqliteStore::parse_datetime(&now.to_rfc3339());
        assert_eq!(parsed.timestamp(), now.timestamp());

        // Corrupt values fall back to a valid time instead of panicking.
        let before = Utc::now();
        let fallback = SqliteStore::parse_datetime("not a timestamp");
        assert!(fallback >= before);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portage.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            let (producer, cursor) = sample_pair(100, "item-a");
            store.commit(&producer, &cursor).unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        let got = store.cursor("sec-1").unwrap().unwrap();
        assert_eq!(got.last_seen_at, 100);
    }
}
