use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    BatchMoveResult, DuplicateGroup, DuplicateRecord, FileRecord, FileStatus, MoveOperation,
};

/// Content-addressed index of every file the vault knows about.
///
/// `files` is keyed uniquely by path with a secondary index on checksum.
/// `content` holds one row per checksum and is the uniqueness constraint
/// that duplicate admission races against.
pub struct FileIndex {
    conn: Mutex<Connection>,
    // Destinations holding a pending claim from a move in this process.
    in_flight: Mutex<HashSet<String>>,
}

/// Outcome of admitting a file into the index.
#[derive(Debug, Clone)]
pub struct Admission {
    pub record: FileRecord,
    /// Path that owns the checksum, when it is not this file.
    pub original_path: Option<PathBuf>,
}

/// Result of asking to become the owner of a checksum before a move.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller now owns the checksum and should go ahead with the move.
    Claimed(ContentClaim),
    /// Another live file already holds these bytes.
    Owned(FileRecord),
}

/// Ownership of a checksum reserved for a move that has not landed yet.
/// Hand it back with [`FileIndex::release_claim`] if the move fails.
#[derive(Debug, Clone)]
pub struct ContentClaim {
    pub destination: PathBuf,
    pub checksum: String,
    previous_canonical: Option<String>,
    held: bool,
}

impl ContentClaim {
    /// False when nothing was reserved because the destination was already
    /// taken; the move itself will refuse it.
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl FileIndex {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let index = Self {
            conn: Mutex::new(conn),
            in_flight: Mutex::new(HashSet::new()),
        };
        index.init_schema()?;
        Ok(index)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS files (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              path TEXT NOT NULL,
              checksum TEXT NOT NULL COLLATE NOCASE,
              size_bytes INTEGER NOT NULL,
              modified_at TEXT,
              created_at TEXT NOT NULL,
              status TEXT NOT NULL,
              UNIQUE(path)
            );

            CREATE INDEX IF NOT EXISTS idx_files_checksum ON files(checksum);

            CREATE TABLE IF NOT EXISTS content (
              checksum TEXT PRIMARY KEY NOT NULL COLLATE NOCASE,
              canonical_path TEXT NOT NULL,
              first_seen_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS duplicates (
              duplicate_id TEXT PRIMARY KEY NOT NULL,
              original_file_id INTEGER NOT NULL,
              duplicate_path TEXT NOT NULL,
              original_path TEXT NOT NULL,
              file_hash TEXT NOT NULL COLLATE NOCASE,
              detected_at TEXT NOT NULL,
              metadata_diff TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS move_operations (
              operation_id TEXT PRIMARY KEY NOT NULL,
              batch_id TEXT,
              source_path TEXT NOT NULL,
              destination_path TEXT NOT NULL,
              file_hash TEXT NOT NULL,
              file_size INTEGER NOT NULL,
              status TEXT NOT NULL,
              created_at TEXT NOT NULL,
              started_at TEXT,
              completed_at TEXT,
              error_message TEXT,
              rollback_attempted INTEGER NOT NULL,
              rollback_success INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS move_batches (
              batch_id TEXT PRIMARY KEY NOT NULL,
              started_at TEXT NOT NULL,
              finished_at TEXT NOT NULL,
              total_operations INTEGER NOT NULL,
              successful INTEGER NOT NULL,
              duplicates INTEGER NOT NULL,
              quarantined INTEGER NOT NULL,
              failed INTEGER NOT NULL,
              not_attempted INTEGER NOT NULL,
              total_time_ms REAL NOT NULL,
              interrupted INTEGER NOT NULL
            );
            "#,
        )?;
        debug!("file index schema initialized");
        Ok(())
    }

    /// Records `path` and decides in the same transaction whether its content
    /// is new. The checksum claim is a single conflict-aware insert, so two
    /// concurrent admissions of identical bytes cannot both come out
    /// processed.
    pub fn admit_file(
        &self,
        path: &Path,
        checksum: &str,
        size_bytes: u64,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<Admission> {
        let checksum = checksum.to_ascii_lowercase();
        let path_str = path.to_string_lossy().to_string();
        let now = Utc::now();

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let claimed = tx.execute(
            r#"
            INSERT INTO content (checksum, canonical_path, first_seen_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(checksum) DO NOTHING
            "#,
            params![checksum, path_str, to_db_time(now)],
        )? == 1;

        let original_path = if claimed {
            None
        } else {
            let canonical: String = tx.query_row(
                "SELECT canonical_path FROM content WHERE checksum = ?1",
                params![checksum],
                |r| r.get(0),
            )?;
            (canonical != path_str).then(|| PathBuf::from(canonical))
        };
        let status = if original_path.is_some() {
            FileStatus::Duplicate
        } else {
            FileStatus::Processed
        };

        upsert_file(&tx, &path_str, &checksum, size_bytes, modified_at, now, status)?;
        let record = select_by_path(&tx, &path_str)?.ok_or_else(|| {
            rusqlite::Error::QueryReturnedNoRows
        })?;
        tx.commit()?;

        Ok(Admission {
            record,
            original_path,
        })
    }

    pub fn get_by_path(&self, path: &Path) -> Result<Option<FileRecord>> {
        let conn = self.conn();
        Ok(select_by_path(&conn, &path.to_string_lossy())?)
    }

    pub fn checksum_exists(&self, checksum: &str) -> Result<bool> {
        let conn = self.conn();
        let found: Option<i64> = conn
            .query_row(
                r#"
                SELECT 1 FROM content WHERE checksum = ?1
                UNION ALL
                SELECT 1 FROM files WHERE checksum = ?1
                LIMIT 1
                "#,
                params![checksum.trim().to_ascii_lowercase()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// The record that currently owns `checksum`, if any.
    pub fn canonical_for(&self, checksum: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn();
        let canonical: Option<String> = conn
            .query_row(
                "SELECT canonical_path FROM content WHERE checksum = ?1",
                params![checksum.to_ascii_lowercase()],
                |r| r.get(0),
            )
            .optional()?;
        match canonical {
            Some(path) => Ok(select_by_path(&conn, &path)?
                .filter(|rec| rec.checksum.eq_ignore_ascii_case(checksum))),
            None => Ok(None),
        }
    }

    /// Decides, in one transaction, whether a move of `source` to
    /// `destination` places new content or a copy of something already
    /// stored. A claim points the checksum at `destination` and records it
    /// as pending, so a concurrent move of the same bytes sees an owner.
    ///
    /// An existing owner counts only while its row still carries this
    /// checksum and its file exists or its own move is in flight.
    pub fn claim_content(
        &self,
        source: &Path,
        destination: &Path,
        checksum: &str,
        size_bytes: u64,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<ClaimOutcome> {
        let checksum = checksum.to_ascii_lowercase();
        let src_str = source.to_string_lossy().to_string();
        let dest_str = destination.to_string_lossy().to_string();
        let now = Utc::now();

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let canonical: Option<String> = tx
            .query_row(
                "SELECT canonical_path FROM content WHERE checksum = ?1",
                params![checksum],
                |r| r.get(0),
            )
            .optional()?;

        if let Some(path) = canonical.as_deref().filter(|p| *p != src_str) {
            if let Some(owner) = select_by_path(&tx, path)? {
                let live = owner.checksum.eq_ignore_ascii_case(&checksum)
                    && (self.in_flight().contains(path) || owner.file_path.is_file());
                if live {
                    tx.commit()?;
                    return Ok(ClaimOutcome::Owned(owner));
                }
            }
            debug!(checksum = %checksum, stale = %path, "replacing stale content owner");
        }

        let taken = self.in_flight().contains(&dest_str)
            || std::fs::symlink_metadata(destination).is_ok();
        if !taken {
            upsert_file(
                &tx,
                &dest_str,
                &checksum,
                size_bytes,
                modified_at,
                now,
                FileStatus::Pending,
            )?;
            tx.execute(
                r#"
                INSERT INTO content (checksum, canonical_path, first_seen_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(checksum) DO UPDATE SET canonical_path = excluded.canonical_path
                "#,
                params![checksum, dest_str, to_db_time(now)],
            )?;
        }
        tx.commit()?;
        if !taken {
            self.in_flight().insert(dest_str);
        }

        Ok(ClaimOutcome::Claimed(ContentClaim {
            destination: destination.to_path_buf(),
            checksum,
            previous_canonical: canonical,
            held: !taken,
        }))
    }

    /// Undoes a claim whose move did not land: the pending row goes away and
    /// the checksum points back at its previous owner.
    pub fn release_claim(&self, claim: &ContentClaim) -> Result<()> {
        if !claim.held {
            return Ok(());
        }
        let dest_str = claim.destination.to_string_lossy().to_string();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM files WHERE path = ?1 AND status = ?2",
            params![dest_str, FileStatus::Pending.as_str()],
        )?;
        match &claim.previous_canonical {
            Some(previous) => tx.execute(
                "UPDATE content SET canonical_path = ?1 WHERE checksum = ?2 AND canonical_path = ?3",
                params![previous, claim.checksum, dest_str],
            )?,
            None => tx.execute(
                "DELETE FROM content WHERE checksum = ?1 AND canonical_path = ?2",
                params![claim.checksum, dest_str],
            )?,
        };
        tx.commit()?;
        self.in_flight().remove(&dest_str);
        debug!(path = %dest_str, checksum = %claim.checksum, "content claim released");
        Ok(())
    }

    /// Registers a completed move: the source row goes away, the destination
    /// row becomes the owner of the checksum.
    pub fn register_placement(
        &self,
        source: &Path,
        destination: &Path,
        checksum: &str,
        size_bytes: u64,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<FileRecord> {
        let checksum = checksum.to_ascii_lowercase();
        let dest_str = destination.to_string_lossy().to_string();
        let now = Utc::now();

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM files WHERE path = ?1",
            params![source.to_string_lossy()],
        )?;
        upsert_file(
            &tx,
            &dest_str,
            &checksum,
            size_bytes,
            modified_at,
            now,
            FileStatus::Processed,
        )?;
        tx.execute(
            r#"
            INSERT INTO content (checksum, canonical_path, first_seen_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(checksum) DO UPDATE SET canonical_path = excluded.canonical_path
            "#,
            params![checksum, dest_str, to_db_time(now)],
        )?;
        tx.execute(
            "UPDATE duplicates SET original_path = ?1 WHERE original_path = ?2",
            params![dest_str, source.to_string_lossy()],
        )?;
        let record =
            select_by_path(&tx, &dest_str)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        self.in_flight().remove(&dest_str);
        Ok(record)
    }

    /// Stores a detected duplicate and re-keys the incoming file's row to its
    /// new location in the duplicates tree.
    pub fn record_duplicate(
        &self,
        source: &Path,
        record: &DuplicateRecord,
        size_bytes: u64,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let diff = serde_json::to_string(&record.metadata_diff)?;
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM files WHERE path = ?1",
            params![source.to_string_lossy()],
        )?;
        upsert_file(
            &tx,
            &record.duplicate_path.to_string_lossy(),
            &record.file_hash,
            size_bytes,
            modified_at,
            record.detected_at,
            FileStatus::Duplicate,
        )?;
        tx.execute(
            r#"
            INSERT INTO duplicates (
              duplicate_id, original_file_id, duplicate_path, original_path,
              file_hash, detected_at, metadata_diff
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.duplicate_id.to_string(),
                record.original_file_id,
                record.duplicate_path.to_string_lossy(),
                record.original_path.to_string_lossy(),
                record.file_hash.to_ascii_lowercase(),
                to_db_time(record.detected_at),
                diff,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn count_duplicate_records(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM duplicates", [], |r| r.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn set_status(&self, path: &Path, status: FileStatus) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE files SET status = ?1 WHERE path = ?2",
            params![status.as_str(), path.to_string_lossy()],
        )?;
        Ok(changed > 0)
    }

    pub fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT checksum, path FROM files
            WHERE checksum IN (
              SELECT checksum FROM files GROUP BY checksum HAVING COUNT(*) > 1
            )
            ORDER BY checksum, path
            "#,
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for row in rows {
            let (checksum, path) = row?;
            match groups.last_mut() {
                Some(group) if group.checksum.eq_ignore_ascii_case(&checksum) => {
                    group.paths.push(PathBuf::from(path));
                }
                _ => groups.push(DuplicateGroup {
                    checksum,
                    paths: vec![PathBuf::from(path)],
                }),
            }
        }
        Ok(groups)
    }

    pub fn count_files(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn record_move_operation(&self, op: &MoveOperation, batch_id: Option<Uuid>) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO move_operations (
              operation_id, batch_id, source_path, destination_path, file_hash,
              file_size, status, created_at, started_at, completed_at,
              error_message, rollback_attempted, rollback_success
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(operation_id) DO UPDATE SET
              status=excluded.status,
              completed_at=excluded.completed_at,
              error_message=excluded.error_message,
              rollback_attempted=excluded.rollback_attempted,
              rollback_success=excluded.rollback_success
            "#,
            params![
                op.operation_id.to_string(),
                batch_id.map(|id| id.to_string()),
                op.source_path.to_string_lossy(),
                op.destination_path.to_string_lossy(),
                op.file_hash,
                op.file_size as i64,
                op.status.as_str(),
                to_db_time(op.created_at),
                op.started_at.map(to_db_time),
                op.completed_at.map(to_db_time),
                op.error_message.as_deref(),
                op.rollback_attempted,
                op.rollback_success,
            ],
        )?;
        Ok(())
    }

    pub fn count_move_operations(&self, batch_id: Uuid) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM move_operations WHERE batch_id = ?1",
            params![batch_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn record_batch(&self, result: &BatchMoveResult, started_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO move_batches (
              batch_id, started_at, finished_at, total_operations, successful,
              duplicates, quarantined, failed, not_attempted, total_time_ms, interrupted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                result.batch_id.to_string(),
                to_db_time(started_at),
                to_db_time(Utc::now()),
                result.total_operations as i64,
                result.successful as i64,
                result.duplicates as i64,
                result.quarantined as i64,
                result.failed as i64,
                result.not_attempted as i64,
                result.total_time_ms,
                result.interrupted,
            ],
        )?;
        Ok(())
    }

    /// Was a batch persisted, and was it interrupted?
    pub fn batch_interrupted(&self, batch_id: Uuid) -> Result<Option<bool>> {
        let flag: Option<bool> = self
            .conn()
            .query_row(
                "SELECT interrupted FROM move_batches WHERE batch_id = ?1",
                params![batch_id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(flag)
    }

    /// Folds the write-ahead log back into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn().execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

fn upsert_file(
    conn: &Connection,
    path: &str,
    checksum: &str,
    size_bytes: u64,
    modified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    status: FileStatus,
) -> rusqlite::Result<()> {
    // A path whose bytes changed no longer owns its old checksum: hand the
    // content to another row with those bytes, or forget it.
    conn.execute(
        r#"
        DELETE FROM content
        WHERE canonical_path = ?1 AND checksum <> ?2
          AND NOT EXISTS (
            SELECT 1 FROM files f WHERE f.checksum = content.checksum AND f.path <> ?1
          )
        "#,
        params![path, checksum],
    )?;
    conn.execute(
        r#"
        UPDATE content SET canonical_path = (
          SELECT f.path FROM files f
          WHERE f.checksum = content.checksum AND f.path <> ?1
          ORDER BY f.status = 'processed' DESC, f.id
          LIMIT 1
        )
        WHERE canonical_path = ?1 AND checksum <> ?2
        "#,
        params![path, checksum],
    )?;
    conn.execute(
        r#"
        INSERT INTO files (
          path, checksum, size_bytes, modified_at, created_at, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(path) DO UPDATE SET
          checksum=excluded.checksum,
          size_bytes=excluded.size_bytes,
          modified_at=excluded.modified_at,
          status=excluded.status
        "#,
        params![
            path,
            checksum.to_ascii_lowercase(),
            size_bytes as i64,
            modified_at.map(to_db_time),
            to_db_time(created_at),
            status.as_str(),
        ],
    )?;
    Ok(())
}

fn select_by_path(conn: &Connection, path: &str) -> rusqlite::Result<Option<FileRecord>> {
    conn.query_row(
        r#"
        SELECT id, path, checksum, size_bytes, modified_at, created_at, status
        FROM files
        WHERE path = ?1
        "#,
        params![path],
        row_to_record,
    )
    .optional()
}

fn row_to_record(r: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let size_bytes: i64 = r.get(3)?;
    let modified_at: Option<String> = r.get(4)?;
    let created_at: String = r.get(5)?;
    let status: String = r.get(6)?;
    Ok(FileRecord {
        id: r.get(0)?,
        file_path: PathBuf::from(r.get::<_, String>(1)?),
        checksum: r.get(2)?,
        file_size: size_bytes.max(0) as u64,
        modification_time: modified_at
            .map(|s| from_db_time(4, &s))
            .transpose()?,
        created_at: from_db_time(5, &created_at)?,
        status: status
            .parse()
            .map_err(|e: crate::error::Error| conversion_error(6, e.to_string()))?,
    })
}

fn to_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn from_db_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn first_admission_claims_checksum() {
        let index = FileIndex::open_in_memory().unwrap();
        let first = index.admit_file(Path::new("/x/a"), HASH_A, 3, None).unwrap();
        assert_eq!(first.record.status, FileStatus::Processed);
        assert!(first.original_path.is_none());

        let second = index
            .admit_file(Path::new("/x/b"), &HASH_A.to_uppercase(), 3, None)
            .unwrap();
        assert_eq!(second.record.status, FileStatus::Duplicate);
        assert_eq!(second.original_path.as_deref(), Some(Path::new("/x/a")));
        assert_eq!(second.record.checksum, HASH_A);
    }

    #[test]
    fn readmitting_same_path_stays_processed() {
        let index = FileIndex::open_in_memory().unwrap();
        index.admit_file(Path::new("/x/a"), HASH_A, 3, None).unwrap();
        let again = index.admit_file(Path::new("/x/a"), HASH_A, 3, None).unwrap();
        assert_eq!(again.record.status, FileStatus::Processed);
        assert_eq!(index.count_files().unwrap(), 1);
    }

    #[test]
    fn placement_moves_ownership() {
        let index = FileIndex::open_in_memory().unwrap();
        index.admit_file(Path::new("/in/a"), HASH_A, 3, None).unwrap();
        index
            .register_placement(Path::new("/in/a"), Path::new("/vault/a"), HASH_A, 3, None)
            .unwrap();
        assert!(index.get_by_path(Path::new("/in/a")).unwrap().is_none());
        let owner = index.canonical_for(HASH_A).unwrap().unwrap();
        assert_eq!(owner.file_path, PathBuf::from("/vault/a"));
    }

    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn changed_bytes_give_up_the_old_checksum() {
        let index = FileIndex::open_in_memory().unwrap();
        index.admit_file(Path::new("/v/a"), HASH_A, 3, None).unwrap();
        index.admit_file(Path::new("/v/a"), HASH_B, 4, None).unwrap();
        assert!(index.canonical_for(HASH_A).unwrap().is_none());
        assert!(!index.checksum_exists(HASH_A).unwrap());
        assert_eq!(
            index.canonical_for(HASH_B).unwrap().unwrap().file_path,
            PathBuf::from("/v/a")
        );
    }

    #[test]
    fn changed_owner_hands_checksum_to_remaining_copy() {
        let index = FileIndex::open_in_memory().unwrap();
        index.admit_file(Path::new("/v/a"), HASH_A, 3, None).unwrap();
        index.admit_file(Path::new("/v/b"), HASH_A, 3, None).unwrap();
        index.admit_file(Path::new("/v/a"), HASH_B, 4, None).unwrap();
        let owner = index.canonical_for(HASH_A).unwrap().unwrap();
        assert_eq!(owner.file_path, PathBuf::from("/v/b"));
    }

    #[test]
    fn released_claim_restores_previous_owner() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        std::fs::write(&src, b"abc").unwrap();
        let index = FileIndex::open_in_memory().unwrap();
        index.admit_file(&src, HASH_A, 3, None).unwrap();

        let dest = dir.path().join("vault/a");
        let claim = match index.claim_content(&src, &dest, HASH_A, 3, None).unwrap() {
            ClaimOutcome::Claimed(claim) => claim,
            ClaimOutcome::Owned(rec) => panic!("unexpected owner {}", rec.file_path.display()),
        };
        let pending = index.get_by_path(&dest).unwrap().unwrap();
        assert_eq!(pending.status, FileStatus::Pending);
        assert_eq!(index.canonical_for(HASH_A).unwrap().unwrap().file_path, dest);

        index.release_claim(&claim).unwrap();
        assert!(index.get_by_path(&dest).unwrap().is_none());
        assert_eq!(index.canonical_for(HASH_A).unwrap().unwrap().file_path, src);
    }

    #[test]
    fn occupied_destination_is_not_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dest = dir.path().join("b");
        std::fs::write(&src, b"abc").unwrap();
        std::fs::write(&dest, b"other").unwrap();
        let index = FileIndex::open_in_memory().unwrap();

        match index.claim_content(&src, &dest, HASH_A, 3, None).unwrap() {
            ClaimOutcome::Claimed(claim) => assert!(!claim.is_held()),
            ClaimOutcome::Owned(_) => panic!("no owner expected"),
        }
        assert!(index.canonical_for(HASH_A).unwrap().is_none());
        assert!(index.get_by_path(&dest).unwrap().is_none());
    }

    #[test]
    fn status_can_change() {
        let index = FileIndex::open_in_memory().unwrap();
        index.admit_file(Path::new("/x/a"), HASH_A, 3, None).unwrap();
        assert!(index.set_status(Path::new("/x/a"), FileStatus::Error).unwrap());
        let rec = index.get_by_path(Path::new("/x/a")).unwrap().unwrap();
        assert_eq!(rec.status, FileStatus::Error);
    }
}
