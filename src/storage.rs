//! SQLite-backed key-value store.
//!
//! One table keyed by (pk, sk) holding JSON attributes. Every statement runs
//! under the connection's busy timeout, so a locked database surfaces as
//! `FlowError::StoreUnavailable` instead of blocking.

use crate::error::FlowError;
use crate::kv::{Key, KvItem, KvPage, KvStore, SortOrder};
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage handle over a SQLite database file.
pub struct SqliteKv {
    db: Connection,
}

/// Map a driver error to a transient store failure.
fn unavailable(e: rusqlite::Error) -> eyre::Report {
    eyre::eyre!(FlowError::StoreUnavailable(e.to_string()))
}

/// SQL `LIMIT` for `limit` rows plus the one extra row that tells whether
/// another page exists.
fn row_limit(limit: usize) -> i64 {
    i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX)
}

impl SqliteKv {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let db = Connection::open(path).context("Failed to open SQLite database")?;
        Self::with_connection(db, timeout)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(db, DEFAULT_STORE_TIMEOUT)
    }

    fn with_connection(db: Connection, timeout: Duration) -> Result<Self> {
        db.busy_timeout(timeout).context("Failed to set busy timeout")?;
        let storage = Self { db };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                    pk TEXT NOT NULL,
                    sk TEXT NOT NULL,
                    attrs TEXT NOT NULL,
                    PRIMARY KEY (pk, sk)
                ) WITHOUT ROWID;
            "#,
            )
            .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Collect rows, parsing stored JSON. Rows that no longer parse are
    /// skipped with a warning.
    fn collect_rows(rows: Vec<(String, String, String)>) -> Vec<KvItem> {
        rows.into_iter()
            .filter_map(|(pk, sk, attrs)| match serde_json::from_str(&attrs) {
                Ok(attrs) => Some(KvItem {
                    key: Key { pk, sk },
                    attrs,
                }),
                Err(e) => {
                    log::warn!("Skipping corrupt attributes at {}/{}: {}", pk, sk, e);
                    None
                }
            })
            .collect()
    }

    fn row_triple(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }
}

impl KvStore for SqliteKv {
    fn put(&mut self, key: &Key, attrs: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(attrs).context("Failed to serialize attributes")?;
        self.db
            .execute(
                "INSERT OR REPLACE INTO kv (pk, sk, attrs) VALUES (?, ?, ?)",
                params![key.pk, key.sk, json],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn get(&self, key: &Key) -> Result<Option<serde_json::Value>> {
        let attrs: Option<String> = self
            .db
            .query_row(
                "SELECT attrs FROM kv WHERE pk = ? AND sk = ?",
                params![key.pk, key.sk],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;

        match attrs {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).with_context(|| format!("Corrupt attributes at {}/{}", key.pk, key.sk))?,
            )),
            None => Ok(None),
        }
    }

    fn query(
        &self,
        pk: &str,
        sk_prefix: &str,
        limit: usize,
        order: SortOrder,
        start: Option<&Key>,
    ) -> Result<KvPage> {
        let sql = match order {
            SortOrder::Ascending => {
                r#"
                SELECT pk, sk, attrs FROM kv
                WHERE pk = ?1 AND substr(sk, 1, length(?2)) = ?2 AND (?3 IS NULL OR sk > ?3)
                ORDER BY sk ASC
                LIMIT ?4
                "#
            }
            SortOrder::Descending => {
                r#"
                SELECT pk, sk, attrs FROM kv
                WHERE pk = ?1 AND substr(sk, 1, length(?2)) = ?2 AND (?3 IS NULL OR sk < ?3)
                ORDER BY sk DESC
                LIMIT ?4
                "#
            }
        };

        let mut stmt = self.db.prepare(sql).map_err(unavailable)?;
        // One extra row tells us whether another page exists
        let mut rows: Vec<(String, String, String)> = stmt
            .query_map(
                params![pk, sk_prefix, start.map(|k| k.sk.as_str()), row_limit(limit)],
                Self::row_triple,
            )
            .map_err(unavailable)?
            .collect::<rusqlite::Result<_>>()
            .map_err(unavailable)?;

        let continuation = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|(pk, sk, _)| Key::new(pk.as_str(), sk.as_str()))
        } else {
            None
        };
        let items = Self::collect_rows(rows);

        Ok(KvPage { items, continuation })
    }

    fn scan(&self, sk_prefix: &str, limit: usize, start: Option<&Key>) -> Result<KvPage> {
        let mut stmt = self
            .db
            .prepare(
                r#"
                SELECT pk, sk, attrs FROM kv
                WHERE ?1 IS NULL OR pk > ?1 OR (pk = ?1 AND sk > ?2)
                ORDER BY pk ASC, sk ASC
                LIMIT ?3
                "#,
            )
            .map_err(unavailable)?;

        let evaluated: Vec<(String, String, String)> = stmt
            .query_map(
                params![
                    start.map(|k| k.pk.as_str()),
                    start.map(|k| k.sk.as_str()),
                    row_limit(limit)
                ],
                Self::row_triple,
            )
            .map_err(unavailable)?
            .collect::<rusqlite::Result<_>>()
            .map_err(unavailable)?;

        let continuation = if evaluated.len() > limit && limit > 0 {
            let (pk, sk, _) = &evaluated[limit - 1];
            Some(Key::new(pk.as_str(), sk.as_str()))
        } else {
            None
        };

        // Filter after the limit, like a hosted scan with a filter expression
        let matching = evaluated
            .into_iter()
            .take(limit)
            .filter(|(_, sk, _)| sk.starts_with(sk_prefix))
            .collect();

        Ok(KvPage {
            items: Self::collect_rows(matching),
            continuation,
        })
    }

    fn delete(&mut self, key: &Key) -> Result<bool> {
        let removed = self
            .db
            .execute("DELETE FROM kv WHERE pk = ? AND sk = ?", params![key.pk, key.sk])
            .map_err(unavailable)?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::flow_error;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup_test_storage() -> (TempDir, SqliteKv) {
        let temp_dir = TempDir::new().unwrap();
        let storage = SqliteKv::open(&temp_dir.path().join("data").join("flowline.db"), DEFAULT_STORE_TIMEOUT).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_open_creates_file() {
        let (temp_dir, _storage) = setup_test_storage();
        assert!(temp_dir.path().join("data").join("flowline.db").exists());
    }

    #[test]
    fn test_put_get_delete() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let key = Key::new("USER#u1", "FLOW#f1");

        storage.put(&key, &json!({ "title": "Spring show" })).unwrap();
        assert_eq!(storage.get(&key).unwrap(), Some(json!({ "title": "Spring show" })));

        storage.put(&key, &json!({ "title": "Renamed" })).unwrap();
        assert_eq!(storage.get(&key).unwrap(), Some(json!({ "title": "Renamed" })));

        assert!(storage.delete(&key).unwrap());
        assert!(storage.get(&key).unwrap().is_none());
        assert!(!storage.delete(&key).unwrap());
    }

    #[test]
    fn test_query_prefix_and_order() {
        let (_temp_dir, mut storage) = setup_test_storage();
        storage.put(&Key::new("USER#u1", "PROFILE"), &json!({})).unwrap();
        for i in 0..5 {
            storage
                .put(&Key::new("USER#u1", format!("FLOW#{}", i)), &json!({ "i": i }))
                .unwrap();
        }
        storage.put(&Key::new("USER#u2", "FLOW#9"), &json!({})).unwrap();

        let page = storage.query("USER#u1", "FLOW#", 2, SortOrder::Descending, None).unwrap();
        let sks: Vec<_> = page.items.iter().map(|i| i.key.sk.clone()).collect();
        assert_eq!(sks, vec!["FLOW#4", "FLOW#3"]);
        assert_eq!(page.continuation, Some(Key::new("USER#u1", "FLOW#3")));

        let mut all = sks;
        let mut cursor = page.continuation;
        while let Some(start) = cursor {
            let next = storage
                .query("USER#u1", "FLOW#", 2, SortOrder::Descending, Some(&start))
                .unwrap();
            all.extend(next.items.iter().map(|i| i.key.sk.clone()));
            cursor = next.continuation;
        }
        assert_eq!(all, vec!["FLOW#4", "FLOW#3", "FLOW#2", "FLOW#1", "FLOW#0"]);

        let asc = storage.query("USER#u1", "FLOW#", 10, SortOrder::Ascending, None).unwrap();
        assert_eq!(asc.items.first().unwrap().key.sk, "FLOW#0");
        assert!(asc.continuation.is_none());
    }

    #[test]
    fn test_query_prefix_is_literal() {
        let (_temp_dir, mut storage) = setup_test_storage();
        storage.put(&Key::new("p", "FLOW%x"), &json!({})).unwrap();
        storage.put(&Key::new("p", "FLOW_y"), &json!({})).unwrap();

        let page = storage.query("p", "FLOW%", 10, SortOrder::Ascending, None).unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_scan_covers_every_partition() {
        let (_temp_dir, mut storage) = setup_test_storage();
        for u in 0..3 {
            storage.put(&Key::new(format!("USER#{}", u), "PROFILE"), &json!({})).unwrap();
            for f in 0..3 {
                storage
                    .put(&Key::new(format!("USER#{}", u), format!("FLOW#{}", f)), &json!({}))
                    .unwrap();
            }
        }

        let mut found = 0;
        let mut pages = 0;
        let mut cursor: Option<Key> = None;
        loop {
            let page = storage.scan("FLOW#", 4, cursor.as_ref()).unwrap();
            assert!(page.items.len() <= 4);
            found += page.items.len();
            pages += 1;
            cursor = page.continuation;
            if cursor.is_none() {
                break;
            }
        }

        assert_eq!(found, 9);
        assert_eq!(pages, 3);
    }

    #[test]
    fn test_corrupt_rows_skipped_without_losing_position() {
        let (_temp_dir, mut storage) = setup_test_storage();
        for f in 0..3 {
            storage
                .put(&Key::new("USER#u", format!("FLOW#{}", f)), &json!({ "n": f }))
                .unwrap();
        }
        storage
            .db
            .execute(
                "UPDATE kv SET attrs = 'not json' WHERE pk = 'USER#u' AND sk = 'FLOW#1'",
                [],
            )
            .unwrap();

        let page = storage.query("USER#u", "FLOW#", 2, SortOrder::Ascending, None).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].key.sk, "FLOW#0");
        assert_eq!(page.continuation, Some(Key::new("USER#u", "FLOW#1")));

        let page = storage.scan("FLOW#", 10, None).unwrap();
        let sks: Vec<&str> = page.items.iter().map(|i| i.key.sk.as_str()).collect();
        assert_eq!(sks, vec!["FLOW#0", "FLOW#2"]);
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_unbounded_limit_does_not_wrap() {
        let (_temp_dir, mut storage) = setup_test_storage();
        for f in 0..3 {
            storage.put(&Key::new("USER#u", format!("FLOW#{}", f)), &json!({})).unwrap();
        }

        let page = storage.query("USER#u", "FLOW#", usize::MAX, SortOrder::Descending, None).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.continuation.is_none());

        let page = storage.scan("FLOW#", usize::MAX, None).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_locked_database_is_transient() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("locked.db");
        let mut storage = SqliteKv::open(&path, Duration::from_millis(50)).unwrap();

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let err = storage
            .put(&Key::new("USER#u", "FLOW#f"), &json!({}))
            .unwrap_err();
        let flow_err = flow_error(&err).expect("typed store error");
        assert!(flow_err.is_transient());

        holder.execute_batch("COMMIT;").unwrap();
        storage.put(&Key::new("USER#u", "FLOW#f"), &json!({})).unwrap();
    }
}
