//! Database module - the per-root metadata store

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Result as SqliteResult};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{ChangeSet, MediaRecord, StoredEntry};

/// Columns added after the first release, with their types
const MIGRATED_COLUMNS: &[(&str, &str)] = &[
    ("prompt", "TEXT"),
    ("title", "TEXT"),
    ("modified_at", "INTEGER"),
    ("width", "INTEGER"),
    ("height", "INTEGER"),
    ("model_id", "INTEGER"),
];

const RECORD_COLUMNS: &str =
    "path, modified_at, width, height, hidden, starred, prompt, title, model_id";

/// Metadata store for one scanned root
///
/// The connection lives as long as the store and is closed on drop.
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open the store for a root, creating the state directory if needed
    pub fn open_for_root(root: &Path, config: &IndexConfig) -> Result<Self, IndexError> {
        let db_path = config.db_path(root);
        if let Some(state_dir) = db_path.parent() {
            std::fs::create_dir_all(state_dir)
                .map_err(|e| IndexError::from(e).with_path(state_dir))?;
        }
        Self::open(&db_path).map_err(|e| IndexError::from(e).with_path(&db_path))
    }

    /// Open or create a database file
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("Opened {:?} (journal_mode={})", path, mode);
        let store = Self { conn };
        store.init_schema()?;
        store.migrate_schema()?;
        Ok(store)
    }

    /// Open an existing database for reading only
    ///
    /// No schema is created or migrated and the journal mode is left alone.
    pub fn open_read_only(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        store.migrate_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS images (
                path TEXT PRIMARY KEY,
                hidden BOOLEAN NOT NULL DEFAULT FALSE,
                starred BOOLEAN NOT NULL DEFAULT FALSE,
                prompt TEXT,
                title TEXT,
                modified_at INTEGER,
                width INTEGER,
                height INTEGER,
                model_id INTEGER
            );
            ",
        )?;
        Ok(())
    }

    /// Add columns missing from tables created by older versions
    fn migrate_schema(&self) -> SqliteResult<()> {
        for (column, sql_type) in MIGRATED_COLUMNS {
            let exists: bool = self.conn.query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('images') WHERE name = ?1",
                [*column],
                |row| row.get(0),
            )?;
            if !exists {
                log::info!("Migrating images table: adding column {}", column);
                self.conn.execute(
                    &format!("ALTER TABLE images ADD COLUMN {} {}", column, sql_type),
                    [],
                )?;
            }
        }
        Ok(())
    }

    /// Load every known path with what diffing needs, in one query
    pub fn load_snapshot(&self) -> SqliteResult<HashMap<String, StoredEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, modified_at, width IS NOT NULL FROM images")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                StoredEntry {
                    modified_at: row.get(1)?,
                    has_width: row.get(2)?,
                },
            ))
        })?;

        let mut snapshot = HashMap::new();
        for row in rows {
            let (path, entry) = row?;
            snapshot.insert(path, entry);
        }
        Ok(snapshot)
    }

    /// Apply inserts, updates and deletes as one transaction
    ///
    /// Updates only touch `modified_at`, `width` and `height`; inserts leave
    /// every user-owned column at its default.
    pub fn apply(&mut self, changes: &ChangeSet) -> SqliteResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut insert_stmt = tx.prepare(
                "INSERT INTO images (path, modified_at, width, height) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in &changes.inserts {
                insert_stmt.execute(params![
                    entry.path,
                    entry.modified_at,
                    entry.dimensions.width(),
                    entry.dimensions.height(),
                ])?;
            }

            let mut update_stmt = tx.prepare(
                "UPDATE images SET modified_at = ?1, width = ?2, height = ?3 WHERE path = ?4",
            )?;
            for entry in &changes.updates {
                update_stmt.execute(params![
                    entry.modified_at,
                    entry.dimensions.width(),
                    entry.dimensions.height(),
                    entry.path,
                ])?;
            }

            let mut delete_stmt = tx.prepare("DELETE FROM images WHERE path = ?1")?;
            for path in &changes.deletes {
                delete_stmt.execute(params![path])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Get one record by relative path
    pub fn get(&self, path: &str) -> SqliteResult<Option<MediaRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM images WHERE path = ?1", RECORD_COLUMNS),
                [path],
                record_from_row,
            )
            .optional()
    }

    /// Get all records ordered by path
    pub fn records(&self) -> SqliteResult<Vec<MediaRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM images ORDER BY path", RECORD_COLUMNS))?;
        let rows = stmt.query_map([], record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Get record count
    pub fn file_count(&self) -> SqliteResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Count records still waiting for dimensions
    pub fn missing_dimensions_count(&self) -> SqliteResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE width IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Newest stored mtime, if any record has one
    pub fn latest_modified_at(&self) -> SqliteResult<Option<i64>> {
        self.conn
            .query_row("SELECT MAX(modified_at) FROM images", [], |row| row.get(0))
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> SqliteResult<MediaRecord> {
    Ok(MediaRecord {
        path: row.get(0)?,
        modified_at: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        hidden: row.get(4)?,
        starred: row.get(5)?,
        prompt: row.get(6)?,
        title: row.get(7)?,
        model_id: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dimensions, ProbedEntry};

    fn probed(path: &str, modified_at: i64, dimensions: Dimensions) -> ProbedEntry {
        ProbedEntry {
            path: path.to_string(),
            modified_at,
            dimensions,
        }
    }

    #[test]
    fn test_apply_and_snapshot() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store
            .apply(&ChangeSet {
                inserts: vec![
                    probed("a.jpg", 1000, Dimensions::new(10, 20)),
                    probed("b.jpg", 2000, Dimensions::unknown()),
                ],
                ..Default::default()
            })
            .unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(
            snapshot["a.jpg"],
            StoredEntry {
                modified_at: Some(1000),
                has_width: true
            }
        );
        assert!(!snapshot["b.jpg"].has_width);

        let record = store.get("a.jpg").unwrap().unwrap();
        assert_eq!(record.dimensions(), Dimensions::new(10, 20));
        assert!(!record.hidden);
        assert!(!record.starred);
        assert_eq!(store.missing_dimensions_count().unwrap(), 1);
        assert_eq!(store.latest_modified_at().unwrap(), Some(2000));
    }

    #[test]
    fn test_update_preserves_user_columns() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store
            .apply(&ChangeSet {
                inserts: vec![probed("a.jpg", 1000, Dimensions::unknown())],
                ..Default::default()
            })
            .unwrap();
        store
            .conn
            .execute(
                "UPDATE images SET starred = 1, title = 'Sunset', model_id = 7 WHERE path = 'a.jpg'",
                [],
            )
            .unwrap();

        store
            .apply(&ChangeSet {
                updates: vec![probed("a.jpg", 3000, Dimensions::new(4, 3))],
                ..Default::default()
            })
            .unwrap();

        let record = store.get("a.jpg").unwrap().unwrap();
        assert_eq!(record.modified_at, Some(3000));
        assert_eq!(record.width, Some(4));
        assert!(record.starred);
        assert_eq!(record.title.as_deref(), Some("Sunset"));
        assert_eq!(record.model_id, Some(7));
    }

    #[test]
    fn test_delete() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store
            .apply(&ChangeSet {
                inserts: vec![
                    probed("a.jpg", 1, Dimensions::unknown()),
                    probed("b.jpg", 1, Dimensions::unknown()),
                ],
                ..Default::default()
            })
            .unwrap();
        store
            .apply(&ChangeSet {
                deletes: vec!["a.jpg".to_string()],
                ..Default::default()
            })
            .unwrap();

        assert!(store.get("a.jpg").unwrap().is_none());
        assert_eq!(store.file_count().unwrap(), 1);
    }

    #[test]
    fn test_failed_apply_rolls_back() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store
            .apply(&ChangeSet {
                inserts: vec![probed("a.jpg", 1, Dimensions::unknown())],
                ..Default::default()
            })
            .unwrap();

        // Second insert of "a.jpg" violates the primary key.
        let result = store.apply(&ChangeSet {
            inserts: vec![
                probed("new.jpg", 5, Dimensions::unknown()),
                probed("a.jpg", 5, Dimensions::unknown()),
            ],
            deletes: vec!["a.jpg".to_string()],
            ..Default::default()
        });
        assert!(result.is_err());

        assert!(store.get("new.jpg").unwrap().is_none());
        assert_eq!(store.get("a.jpg").unwrap().unwrap().modified_at, Some(1));
    }

    #[test]
    fn test_migrates_legacy_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE images (
                    path TEXT PRIMARY KEY,
                    hidden BOOLEAN NOT NULL DEFAULT FALSE,
                    starred BOOLEAN NOT NULL DEFAULT FALSE,
                    prompt TEXT
                );
                INSERT INTO images (path, starred) VALUES ('old.png', 1);",
            )
            .unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(
            snapshot["old.png"],
            StoredEntry {
                modified_at: None,
                has_width: false
            }
        );
        assert!(store.get("old.png").unwrap().unwrap().starred);
    }

    #[test]
    fn test_open_for_root_creates_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::default();
        let store = MetadataStore::open_for_root(dir.path(), &config).unwrap();
        assert_eq!(store.file_count().unwrap(), 0);
        assert!(config.db_path(dir.path()).exists());
    }

    #[test]
    fn test_read_only_store_reads_but_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        let mut writer = MetadataStore::open(&path).unwrap();
        writer
            .apply(&ChangeSet {
                inserts: vec![
                    probed("a.jpg", 7, Dimensions::new(2, 2)),
                    probed("b.jpg", 9, Dimensions::unknown()),
                ],
                ..Default::default()
            })
            .unwrap();

        let mut reader = MetadataStore::open_read_only(&path).unwrap();
        assert_eq!(reader.file_count().unwrap(), 2);
        assert_eq!(reader.missing_dimensions_count().unwrap(), 1);
        assert_eq!(reader.latest_modified_at().unwrap(), Some(9));

        let result = reader.apply(&ChangeSet {
            deletes: vec!["a.jpg".to_string()],
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(writer.file_count().unwrap(), 2);
    }

    #[test]
    fn test_read_only_open_leaves_legacy_schema_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE images (path TEXT PRIMARY KEY, starred BOOLEAN NOT NULL DEFAULT FALSE);
                INSERT INTO images (path) VALUES ('old.png');",
            )
            .unwrap();
        }

        let store = MetadataStore::open_read_only(&path).unwrap();
        assert_eq!(store.file_count().unwrap(), 1);
        drop(store);

        let conn = Connection::open(&path).unwrap();
        let columns: i64 = conn
            .query_row("SELECT COUNT(*) FROM pragma_table_info('images')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(columns, 2);
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MetadataStore::open_read_only(&dir.path().join("absent.db")).is_err());
        assert!(!dir.path().join("absent.db").exists());
    }
}
