//! Relational persistence for items, attributes, and secrets.
//!
//! One SQLite database file, three relations:
//!
//! | relation     | columns                                  |
//! |--------------|------------------------------------------|
//! | `items`      | `object, label, created, modified`       |
//! | `attributes` | `object, attribute, value` (many per item) |
//! | `secrets`    | `object, secret, content_type`           |
//!
//! The item's D-Bus object path is the primary key everywhere. Every mutation
//! commits before returning; multi-relation mutations run in a transaction so
//! readers never observe a partially written item.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use cask_core::{Attributes, ServiceError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    object   TEXT PRIMARY KEY,
    label    TEXT NOT NULL,
    created  INTEGER NOT NULL,
    modified INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS attributes (
    object    TEXT NOT NULL,
    attribute TEXT NOT NULL,
    value     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attributes_by_pair ON attributes (attribute, value);
CREATE INDEX IF NOT EXISTS attributes_by_object ON attributes (object);
CREATE TABLE IF NOT EXISTS secrets (
    object       TEXT PRIMARY KEY,
    secret       BLOB NOT NULL,
    content_type TEXT NOT NULL
);
";

/// Item metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMetadata {
    pub label: String,
    pub created: u64,
    pub modified: u64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if missing) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ServiceError::Storage(format!("open {}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000; PRAGMA secure_delete=ON;")
            .map_err(db_err)?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, ServiceError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ServiceError::Storage(format!("open in-memory: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ServiceError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ServiceError> {
        self.conn
            .lock()
            .map_err(|_| ServiceError::Storage("store lock poisoned".to_string()))
    }

    /// Insert an item with its attributes and secret in one transaction.
    /// `created` and `modified` are both set to the current time.
    pub fn add_item(
        &self,
        object: &str,
        label: &str,
        attributes: &Attributes,
        secret: &[u8],
        content_type: &str,
    ) -> Result<(), ServiceError> {
        let mut conn = self.lock()?;
        let now = unix_now();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO items (object, label, created, modified) VALUES (?1, ?2, ?3, ?4)",
            params![object, label, now, now],
        )
        .map_err(db_err)?;
        for (attribute, value) in attributes {
            tx.execute(
                "INSERT INTO attributes (object, attribute, value) VALUES (?1, ?2, ?3)",
                params![object, attribute, value],
            )
            .map_err(db_err)?;
        }
        tx.execute(
            "INSERT INTO secrets (object, secret, content_type) VALUES (?1, ?2, ?3)",
            params![object, secret, content_type],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    /// Object paths whose attribute set is a superset of `matches`.
    ///
    /// Built as an N-way `INTERSECT` of per-pair selections, so every
    /// requested pair must be present but extra attributes never exclude an
    /// item. Result order is unspecified. An empty query is refused.
    pub fn find_items(&self, matches: &Attributes) -> Result<Vec<String>, ServiceError> {
        if matches.is_empty() {
            return Err(ServiceError::InvalidArgs(
                "search requires at least one attribute".to_string(),
            ));
        }
        let conn = self.lock()?;
        let mut sql = String::new();
        let mut bindings: Vec<&str> = Vec::with_capacity(matches.len() * 2);
        for (attribute, value) in matches {
            if !sql.is_empty() {
                sql.push_str(" INTERSECT ");
            }
            sql.push_str("SELECT object FROM attributes WHERE attribute = ? AND value = ?");
            bindings.push(attribute);
            bindings.push(value);
        }
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(bindings), |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    /// Label and timestamps, or `None` for unknown objects.
    pub fn get_metadata(&self, object: &str) -> Result<Option<ItemMetadata>, ServiceError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT label, created, modified FROM items WHERE object = ?1",
            params![object],
            |row| {
                Ok(ItemMetadata {
                    label: row.get(0)?,
                    created: row.get(1)?,
                    modified: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    /// Update the label. Deliberately leaves `modified` untouched — label
    /// edits are not observable through the timestamp.
    ///
    /// Returns `false` when no such item exists.
    pub fn set_label(&self, object: &str, label: &str) -> Result<bool, ServiceError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE items SET label = ?2 WHERE object = ?1",
                params![object, label],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// All attribute rows for an object (empty map when none).
    pub fn get_attributes(&self, object: &str) -> Result<Attributes, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT attribute, value FROM attributes WHERE object = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![object], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;
        rows.collect::<Result<HashMap<_, _>, _>>().map_err(db_err)
    }

    /// Full attribute replacement: drop every existing row, insert the new
    /// set. One transaction.
    pub fn set_attributes(&self, object: &str, attributes: &Attributes) -> Result<(), ServiceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM attributes WHERE object = ?1", params![object])
            .map_err(db_err)?;
        for (attribute, value) in attributes {
            tx.execute(
                "INSERT INTO attributes (object, attribute, value) VALUES (?1, ?2, ?3)",
                params![object, attribute, value],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    /// Secret bytes and content type, or `None` for unknown objects.
    pub fn get_secret(&self, object: &str) -> Result<Option<(Vec<u8>, String)>, ServiceError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT secret, content_type FROM secrets WHERE object = ?1",
            params![object],
            |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(db_err)
    }

    /// Replace the secret bytes and content type, advancing `modified`.
    ///
    /// Returns `false` when no such item exists.
    pub fn set_secret(
        &self,
        object: &str,
        secret: &[u8],
        content_type: &str,
    ) -> Result<bool, ServiceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let changed = tx
            .execute(
                "UPDATE secrets SET secret = ?2, content_type = ?3 WHERE object = ?1",
                params![object, secret, content_type],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE items SET modified = ?2 WHERE object = ?1",
            params![object, unix_now()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    /// Remove the item's rows from all three relations in one transaction.
    ///
    /// Returns `false` when no such item exists.
    pub fn delete_item(&self, object: &str) -> Result<bool, ServiceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let changed = tx
            .execute("DELETE FROM items WHERE object = ?1", params![object])
            .map_err(db_err)?;
        tx.execute("DELETE FROM attributes WHERE object = ?1", params![object])
            .map_err(db_err)?;
        tx.execute("DELETE FROM secrets WHERE object = ?1", params![object])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn item_exists(&self, object: &str) -> Result<bool, ServiceError> {
        Ok(self.get_metadata(object)?.is_some())
    }

    /// Every stored object path. Used at startup to re-export item objects
    /// and to seed the path allocator.
    pub fn all_items(&self) -> Result<Vec<String>, ServiceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT object FROM items").map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store_with_item(object: &str, pairs: &[(&str, &str)]) -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .add_item(object, "test", &attrs(pairs), b"hunter2", "text/plain")
            .unwrap();
        store
    }

    #[test]
    fn add_item_populates_all_three_relations() {
        let store = store_with_item("/i/1", &[("app", "x")]);
        let meta = store.get_metadata("/i/1").unwrap().unwrap();
        assert_eq!(meta.label, "test");
        assert_eq!(meta.created, meta.modified);
        assert_eq!(store.get_attributes("/i/1").unwrap(), attrs(&[("app", "x")]));
        let (secret, content_type) = store.get_secret("/i/1").unwrap().unwrap();
        assert_eq!(secret, b"hunter2");
        assert_eq!(content_type, "text/plain");
    }

    #[test]
    fn existence_reads_agree() {
        let store = store_with_item("/i/1", &[("app", "x")]);
        assert!(store.item_exists("/i/1").unwrap());
        assert!(store.get_metadata("/i/1").unwrap().is_some());
        assert!(store.get_secret("/i/1").unwrap().is_some());

        assert!(!store.item_exists("/i/2").unwrap());
        assert!(store.get_metadata("/i/2").unwrap().is_none());
        assert!(store.get_secret("/i/2").unwrap().is_none());
    }

    #[test]
    fn superset_search_intersects_pairs() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_item("/i/1", "a", &attrs(&[("a", "1"), ("b", "2")]), b"s1", "text/plain")
            .unwrap();
        store
            .add_item("/i/2", "b", &attrs(&[("a", "1"), ("b", "3")]), b"s2", "text/plain")
            .unwrap();

        let mut both = store.find_items(&attrs(&[("a", "1")])).unwrap();
        both.sort();
        assert_eq!(both, vec!["/i/1".to_string(), "/i/2".to_string()]);

        let first = store.find_items(&attrs(&[("a", "1"), ("b", "2")])).unwrap();
        assert_eq!(first, vec!["/i/1".to_string()]);

        let neither = store.find_items(&attrs(&[("a", "1"), ("b", "9")])).unwrap();
        assert!(neither.is_empty());
    }

    #[test]
    fn extra_attributes_do_not_exclude() {
        let store = store_with_item("/i/1", &[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(
            store.find_items(&attrs(&[("b", "2")])).unwrap(),
            vec!["/i/1".to_string()]
        );
    }

    #[test]
    fn empty_search_is_refused() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.find_items(&Attributes::new()),
            Err(ServiceError::InvalidArgs(_))
        ));
    }

    #[test]
    fn set_attributes_is_full_replacement() {
        let store = store_with_item("/i/1", &[("x", "1")]);
        store.set_attributes("/i/1", &attrs(&[("y", "2")])).unwrap();
        assert_eq!(store.get_attributes("/i/1").unwrap(), attrs(&[("y", "2")]));
        assert!(store.find_items(&attrs(&[("x", "1")])).unwrap().is_empty());
    }

    #[test]
    fn set_label_leaves_modified_alone() {
        let store = store_with_item("/i/1", &[("app", "x")]);
        let before = store.get_metadata("/i/1").unwrap().unwrap();
        assert!(store.set_label("/i/1", "renamed").unwrap());
        let after = store.get_metadata("/i/1").unwrap().unwrap();
        assert_eq!(after.label, "renamed");
        assert_eq!(after.created, before.created);
        assert_eq!(after.modified, before.modified);
    }

    #[test]
    fn set_label_on_missing_item_reports_absent() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.set_label("/i/404", "nope").unwrap());
    }

    #[test]
    fn set_secret_updates_bytes_and_content_type() {
        let store = store_with_item("/i/1", &[("app", "x")]);
        assert!(store.set_secret("/i/1", b"swordfish", "application/octet-stream").unwrap());
        let (secret, content_type) = store.get_secret("/i/1").unwrap().unwrap();
        assert_eq!(secret, b"swordfish");
        assert_eq!(content_type, "application/octet-stream");
        let meta = store.get_metadata("/i/1").unwrap().unwrap();
        assert!(meta.modified >= meta.created);
    }

    #[test]
    fn set_secret_on_missing_item_reports_absent() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.set_secret("/i/404", b"x", "text/plain").unwrap());
    }

    #[test]
    fn delete_removes_every_relation() {
        let store = store_with_item("/i/1", &[("app", "x")]);
        assert!(store.delete_item("/i/1").unwrap());
        assert!(!store.item_exists("/i/1").unwrap());
        assert!(store.get_attributes("/i/1").unwrap().is_empty());
        assert!(store.get_secret("/i/1").unwrap().is_none());
        assert!(store.find_items(&attrs(&[("app", "x")])).unwrap().is_empty());
        // Second delete is a no-op.
        assert!(!store.delete_item("/i/1").unwrap());
    }

    #[test]
    fn all_items_lists_every_object() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_item("/i/1", "a", &attrs(&[("a", "1")]), b"s", "text/plain")
            .unwrap();
        store
            .add_item("/i/5", "b", &attrs(&[("a", "2")]), b"s", "text/plain")
            .unwrap();
        let mut all = store.all_items().unwrap();
        all.sort();
        assert_eq!(all, vec!["/i/1".to_string(), "/i/5".to_string()]);
    }

    #[test]
    fn duplicate_object_path_is_a_storage_error() {
        let store = store_with_item("/i/1", &[("app", "x")]);
        let err = store
            .add_item("/i/1", "again", &attrs(&[("app", "y")]), b"s", "text/plain")
            .unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
        // The failed transaction must not have half-written attribute rows.
        assert_eq!(store.get_attributes("/i/1").unwrap(), attrs(&[("app", "x")]));
    }
}
