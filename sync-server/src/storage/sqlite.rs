//! SQLite storage backend for talent-sync.

use super::{
    millis, now_millis, ChangeLog, ChangeLogEntry, JobCounts, JobOutcome, ProfileDirectory,
    SyncJob, SyncJobStore, UnsyncedHead,
};
use crate::error::StorageError;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use sync_core::SyncJobStatus;
use sync_types::{
    ChangeLogEntryId, Operation, ProfileRecord, SubjectId, SyncJobId, TalentPool, TalentPoolId,
};

const ENTRY_COLUMNS: &str = "id, subject_id, operation, timestamp, synced, payload, \
                             delivery_rounds, last_error, leased_by, leased_until, skipped";

const JOB_COLUMNS: &str = "id, payload, payload_digest, status, retry_count, error_message, \
                           created_at, updated_at, next_attempt_at";

/// SQLite-based storage for the change log, sync jobs, talent pools and
/// profile snapshots.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection that never expires: dropping it drops the database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS change_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                payload TEXT,
                delivery_rounds INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                leased_by TEXT,
                leased_until INTEGER,
                skipped INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sync_jobs (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                payload_digest TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                next_attempt_at INTEGER NOT NULL,
                leased_by TEXT,
                leased_until INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS talent_pools (
                talent_pool_id TEXT PRIMARY KEY,
                talent_pool_name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS talent_pool_members (
                talent_pool_id TEXT NOT NULL,
                cv_id TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (talent_pool_id, cv_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                cv_id TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_change_log_subject ON change_log(subject_id, operation, synced)",
            "CREATE INDEX IF NOT EXISTS idx_sync_jobs_status ON sync_jobs(status, next_attempt_at)",
            "CREATE INDEX IF NOT EXISTS idx_sync_jobs_digest ON sync_jobs(payload_digest, status)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
        }

        Ok(())
    }

    // =========================================================================
    // Talent pools
    // =========================================================================

    /// Create a talent pool. Fails with `Conflict` if the id is taken.
    pub async fn create_pool(
        &self,
        id: &TalentPoolId,
        name: &str,
    ) -> Result<TalentPool, StorageError> {
        let now = now_millis() / 1000;

        let result = sqlx::query(
            r#"
            INSERT INTO talent_pools (talent_pool_id, talent_pool_name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(talent_pool_id) DO NOTHING
            "#,
        )
        .bind(id.as_str())
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict {
                entity: "talent pool",
                id: id.to_string(),
            });
        }

        Ok(TalentPool {
            talent_pool_id: id.clone(),
            talent_pool_name: name.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// All talent pools in creation order.
    pub async fn list_pools(&self) -> Result<Vec<TalentPool>, StorageError> {
        let rows = sqlx::query_as::<_, PoolRow>(
            r#"
            SELECT talent_pool_id, talent_pool_name, created_at, updated_at
            FROM talent_pools
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TalentPool::from).collect())
    }

    /// Get a talent pool by id.
    pub async fn get_pool(&self, id: &TalentPoolId) -> Result<Option<TalentPool>, StorageError> {
        let row = sqlx::query_as::<_, PoolRow>(
            r#"
            SELECT talent_pool_id, talent_pool_name, created_at, updated_at
            FROM talent_pools
            WHERE talent_pool_id = ?1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TalentPool::from))
    }

    /// Insert or replace a member snapshot of a pool.
    pub async fn upsert_member(
        &self,
        pool: &TalentPoolId,
        record: &ProfileRecord,
    ) -> Result<(), StorageError> {
        let now = now_millis();
        let snapshot = serde_json::to_string(record)?;

        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query(
            "UPDATE talent_pools SET updated_at = ?1 WHERE talent_pool_id = ?2",
        )
        .bind(now / 1000)
        .bind(pool.as_str())
        .execute(&mut *tx)
        .await?;

        if touched.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "talent pool",
                id: pool.to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO talent_pool_members (talent_pool_id, cv_id, snapshot, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(talent_pool_id, cv_id) DO UPDATE SET snapshot = ?3, updated_at = ?4
            "#,
        )
        .bind(pool.as_str())
        .bind(record.cv_id.as_str())
        .bind(snapshot)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Remove a member from a pool. Returns whether it was a member.
    pub async fn remove_member(
        &self,
        pool: &TalentPoolId,
        cv_id: &SubjectId,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM talent_pool_members WHERE talent_pool_id = ?1 AND cv_id = ?2",
        )
        .bind(pool.as_str())
        .bind(cv_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Profile snapshots
    // =========================================================================

    /// Store a profile snapshot and record the matching change.
    ///
    /// The change is `INSERT` for a profile not seen before, `UPDATE`
    /// otherwise. Both writes commit together.
    pub async fn ingest_profile(
        &self,
        record: &ProfileRecord,
    ) -> Result<(ChangeLogEntryId, Operation), StorageError> {
        let now = now_millis();
        let snapshot = record.to_value();
        let encoded = serde_json::to_string(&snapshot)?;

        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM profiles WHERE cv_id = ?1")
            .bind(record.cv_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let operation = if exists.is_some() {
            Operation::Update
        } else {
            Operation::Insert
        };

        write_snapshot(&mut tx, &record.cv_id, &encoded, now).await?;
        let id = insert_entry(&mut tx, &record.cv_id, operation, Some(encoded.as_str()), now).await?;

        tx.commit().await?;
        Ok((id, operation))
    }

    /// Store a profile snapshot and record a change with the caller's operation.
    ///
    /// Used for change notifications, where the source system names the
    /// operation. The body is kept as the entry payload unchanged.
    pub async fn store_profile_change(
        &self,
        record: &ProfileRecord,
        operation: Operation,
        payload: &Value,
    ) -> Result<ChangeLogEntryId, StorageError> {
        let now = now_millis();
        let snapshot = serde_json::to_string(&record.to_value())?;
        let encoded = serde_json::to_string(payload)?;

        let mut tx = self.pool.begin().await?;
        write_snapshot(&mut tx, &record.cv_id, &snapshot, now).await?;
        let id = insert_entry(&mut tx, &record.cv_id, operation, Some(encoded.as_str()), now).await?;
        tx.commit().await?;

        Ok(id)
    }

    /// Drop a profile snapshot and record the `DELETE` change.
    ///
    /// Returns the entry id and whether a snapshot existed.
    pub async fn forget_profile(
        &self,
        cv_id: &SubjectId,
    ) -> Result<(ChangeLogEntryId, bool), StorageError> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM profiles WHERE cv_id = ?1")
            .bind(cv_id.as_str())
            .execute(&mut *tx)
            .await?;

        let id = insert_entry(&mut tx, cv_id, Operation::Delete, None, now).await?;

        tx.commit().await?;
        Ok((id, removed.rows_affected() > 0))
    }

    /// Current snapshot of a profile.
    pub async fn get_profile(&self, cv_id: &SubjectId) -> Result<Option<ProfileRecord>, StorageError> {
        let snapshot: Option<String> =
            sqlx::query_scalar("SELECT snapshot FROM profiles WHERE cv_id = ?1")
                .bind(cv_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match snapshot {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Total number of change log entries.
    pub async fn count_entries(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM change_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Total number of talent pools.
    pub async fn count_pools(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM talent_pools")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Total number of stored profile snapshots.
    pub async fn count_profiles(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Upsert a profile snapshot inside a transaction.
async fn write_snapshot(
    tx: &mut Transaction<'_, Sqlite>,
    cv_id: &SubjectId,
    snapshot: &str,
    now: i64,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO profiles (cv_id, snapshot, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(cv_id) DO UPDATE SET snapshot = ?2, updated_at = ?3
        "#,
    )
    .bind(cv_id.as_str())
    .bind(snapshot)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Append a change log entry inside a transaction.
async fn insert_entry(
    tx: &mut Transaction<'_, Sqlite>,
    subject: &SubjectId,
    operation: Operation,
    payload: Option<&str>,
    timestamp: i64,
) -> Result<ChangeLogEntryId, StorageError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO change_log (subject_id, operation, timestamp, synced, payload)
        VALUES (?1, ?2, ?3, 0, ?4)
        RETURNING id
        "#,
    )
    .bind(subject.as_str())
    .bind(operation.as_str())
    .bind(timestamp)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await?;

    Ok(ChangeLogEntryId::new(id as u64))
}

#[async_trait]
impl ChangeLog for SqliteStorage {
    async fn record(
        &self,
        subject: &SubjectId,
        operation: Operation,
        payload: Option<&Value>,
    ) -> Result<ChangeLogEntryId, StorageError> {
        let encoded = payload.map(serde_json::to_string).transpose()?;

        let mut tx = self.pool.begin().await?;
        let id = insert_entry(&mut tx, subject, operation, encoded.as_deref(), now_millis()).await?;
        tx.commit().await?;

        Ok(id)
    }

    async fn find_latest_unsynced(
        &self,
        subject: &SubjectId,
        operation: Operation,
    ) -> Result<Option<ChangeLogEntry>, StorageError> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM change_log
            WHERE subject_id = ?1 AND operation = ?2 AND synced = 0
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(subject.as_str())
            .bind(operation.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ChangeLogEntry::try_from).transpose()
    }

    async fn claim_latest_unsynced(
        &self,
        subject: &SubjectId,
        operation: Operation,
        holder: &str,
        lease: Duration,
    ) -> Result<Option<ChangeLogEntry>, StorageError> {
        let now = now_millis();
        let sql = format!(
            r#"
            UPDATE change_log
            SET leased_by = ?1, leased_until = ?2
            WHERE id = (
                SELECT id FROM change_log
                WHERE subject_id = ?3 AND operation = ?4 AND synced = 0
                ORDER BY timestamp DESC, id DESC
                LIMIT 1
            )
              AND synced = 0
              AND skipped = 0
              AND (leased_until IS NULL OR leased_until < ?5)
            RETURNING {ENTRY_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(holder)
            .bind(now.saturating_add(millis(lease)))
            .bind(subject.as_str())
            .bind(operation.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ChangeLogEntry::try_from).transpose()
    }

    async fn renew_lease(
        &self,
        id: ChangeLogEntryId,
        holder: &str,
        lease: Duration,
    ) -> Result<bool, StorageError> {
        let until = now_millis().saturating_add(millis(lease));

        let result = sqlx::query(
            r#"
            UPDATE change_log SET leased_until = ?1
            WHERE id = ?2 AND leased_by = ?3 AND synced = 0
            "#,
        )
        .bind(until)
        .bind(id.value() as i64)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_synced(&self, id: ChangeLogEntryId) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE change_log
            SET synced = 1, leased_by = NULL, leased_until = NULL
            WHERE id = ?1
            "#,
        )
        .bind(id.value() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release(
        &self,
        id: ChangeLogEntryId,
        holder: &str,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        let sql = if error.is_some() {
            r#"
            UPDATE change_log
            SET leased_by = NULL, leased_until = NULL,
                delivery_rounds = delivery_rounds + 1, last_error = ?3
            WHERE id = ?1 AND leased_by = ?2
            "#
        } else {
            r#"
            UPDATE change_log
            SET leased_by = NULL, leased_until = NULL
            WHERE id = ?1 AND leased_by = ?2
            "#
        };

        let mut query = sqlx::query(sql).bind(id.value() as i64).bind(holder);
        if let Some(error) = error {
            query = query.bind(error);
        }
        query.execute(&self.pool).await?;

        Ok(())
    }

    async fn skip(
        &self,
        id: ChangeLogEntryId,
        holder: &str,
        reason: &str,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE change_log
            SET skipped = 1, last_error = ?3, leased_by = NULL, leased_until = NULL
            WHERE id = ?1 AND leased_by = ?2 AND synced = 0
            "#,
        )
        .bind(id.value() as i64)
        .bind(holder)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_entry(&self, id: ChangeLogEntryId) -> Result<Option<ChangeLogEntry>, StorageError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM change_log WHERE id = ?1");

        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(id.value() as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ChangeLogEntry::try_from).transpose()
    }

    async fn unsynced_heads(
        &self,
        cutoff: i64,
        max_rounds: u32,
    ) -> Result<Vec<UnsyncedHead>, StorageError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT c.subject_id, c.operation
            FROM change_log c
            WHERE c.synced = 0
              AND c.skipped = 0
              AND c.timestamp <= ?1
              AND c.delivery_rounds < ?2
              AND (c.leased_until IS NULL OR c.leased_until < ?3)
              AND c.id = (
                  SELECT MAX(d.id) FROM change_log d
                  WHERE d.subject_id = c.subject_id AND d.operation = c.operation
              )
            ORDER BY c.id ASC
            "#,
        )
        .bind(cutoff)
        .bind(max_rounds as i64)
        .bind(now_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(subject, operation)| {
                Ok(UnsyncedHead {
                    subject_id: SubjectId::new(subject),
                    operation: parse_operation(&operation)?,
                })
            })
            .collect()
    }

    async fn count_unsynced_heads(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM change_log c
            WHERE c.synced = 0
              AND c.skipped = 0
              AND c.id = (
                  SELECT MAX(d.id) FROM change_log d
                  WHERE d.subject_id = c.subject_id AND d.operation = c.operation
              )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn reset_rounds(&self, id: ChangeLogEntryId) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE change_log SET delivery_rounds = 0, skipped = 0, last_error = NULL
            WHERE id = ?1 AND synced = 0
            "#,
        )
        .bind(id.value() as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SyncJobStore for SqliteStorage {
    async fn create_job(&self, payload: &Value, digest: &str) -> Result<Option<SyncJob>, StorageError> {
        let id = SyncJobId::new();
        let now = now_millis();
        let encoded = serde_json::to_string(payload)?;

        // One statement, so the duplicate check and the insert are atomic.
        let result = sqlx::query(
            r#"
            INSERT INTO sync_jobs
                (id, payload, payload_digest, status, retry_count, error_message,
                 created_at, updated_at, next_attempt_at)
            SELECT ?1, ?2, ?3, 'pending', 0, NULL, ?4, ?4, ?4
            WHERE NOT EXISTS (
                SELECT 1 FROM sync_jobs WHERE payload_digest = ?3 AND status = 'pending'
            )
            "#,
        )
        .bind(id.to_string())
        .bind(encoded)
        .bind(digest)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(SyncJob {
            id,
            payload: payload.clone(),
            payload_digest: digest.to_string(),
            status: SyncJobStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            next_attempt_at: now,
        }))
    }

    async fn get_job(&self, id: SyncJobId) -> Result<Option<SyncJob>, StorageError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = ?1");

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncJob::try_from).transpose()
    }

    async fn claim_job(
        &self,
        id: SyncJobId,
        holder: &str,
        lease: Duration,
    ) -> Result<Option<SyncJob>, StorageError> {
        let now = now_millis();
        let sql = format!(
            r#"
            UPDATE sync_jobs
            SET leased_by = ?1, leased_until = ?2
            WHERE id = ?3
              AND status = 'pending'
              AND next_attempt_at <= ?4
              AND (leased_until IS NULL OR leased_until < ?4)
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(holder)
            .bind(now.saturating_add(millis(lease)))
            .bind(id.to_string())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncJob::try_from).transpose()
    }

    async fn record_outcome(
        &self,
        id: SyncJobId,
        holder: &str,
        outcome: &JobOutcome,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?1, retry_count = ?2, error_message = ?3, next_attempt_at = ?4,
                updated_at = ?5, leased_by = NULL, leased_until = NULL
            WHERE id = ?6 AND leased_by = ?7 AND status = 'pending'
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(outcome.retry_count as i64)
        .bind(outcome.error_message.as_deref())
        .bind(outcome.next_attempt_at)
        .bind(now_millis())
        .bind(id.to_string())
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn redrive_failed(&self, max_retries: u32) -> Result<Vec<SyncJobId>, StorageError> {
        let now = now_millis();

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE sync_jobs
            SET status = 'pending', next_attempt_at = ?1, updated_at = ?1
            WHERE status = 'failed' AND retry_count < ?2
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(max_retries as i64)
        .fetch_all(&self.pool)
        .await?;

        ids.iter().map(|id| parse_job_id(id)).collect()
    }

    async fn stalled_pending(&self, now: i64) -> Result<Vec<SyncJobId>, StorageError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM sync_jobs
            WHERE status = 'pending'
              AND next_attempt_at <= ?1
              AND (leased_until IS NULL OR leased_until < ?1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        ids.iter().map(|id| parse_job_id(id)).collect()
    }

    async fn reset_job(&self, id: SyncJobId) -> Result<bool, StorageError> {
        let now = now_millis();

        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'pending', retry_count = 0, error_message = NULL,
                next_attempt_at = ?1, updated_at = ?1, leased_by = NULL, leased_until = NULL
            WHERE id = ?2 AND status = 'failed'
            "#,
        )
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_jobs(
        &self,
        status: Option<SyncJobStatus>,
        limit: u32,
    ) -> Result<Vec<SyncJob>, StorageError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM sync_jobs
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#
        );

        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SyncJob::try_from).collect()
    }

    async fn job_counts(&self) -> Result<JobCounts, StorageError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match parse_status(&status)? {
                SyncJobStatus::Pending => counts.pending = count as u64,
                SyncJobStatus::Success => counts.success = count as u64,
                SyncJobStatus::Failed => counts.failed = count as u64,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ProfileDirectory for SqliteStorage {
    async fn members(&self, pool: &TalentPoolId) -> Result<Vec<ProfileRecord>, StorageError> {
        let snapshots: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT snapshot FROM talent_pool_members
            WHERE talent_pool_id = ?1
            ORDER BY rowid ASC
            "#,
        )
        .bind(pool.as_str())
        .fetch_all(&self.pool)
        .await?;

        snapshots
            .iter()
            .map(|s| serde_json::from_str(s).map_err(StorageError::from))
            .collect()
    }
}

fn parse_operation(value: &str) -> Result<Operation, StorageError> {
    value.parse().map_err(|_| StorageError::Corrupt {
        table: "change_log",
        reason: format!("unknown operation '{}'", value),
    })
}

fn parse_status(value: &str) -> Result<SyncJobStatus, StorageError> {
    value.parse().map_err(|reason| StorageError::Corrupt {
        table: "sync_jobs",
        reason,
    })
}

fn parse_job_id(value: &str) -> Result<SyncJobId, StorageError> {
    value.parse().map_err(|_| StorageError::Corrupt {
        table: "sync_jobs",
        reason: format!("invalid job id '{}'", value),
    })
}

fn to_u32(value: i64, table: &'static str, column: &str) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::Corrupt {
        table,
        reason: format!("{} out of range: {}", column, value),
    })
}

/// Internal row type for change log queries.
#[derive(sqlx::FromRow)]
struct EntryRow {
    id: i64,
    subject_id: String,
    operation: String,
    timestamp: i64,
    synced: bool,
    payload: Option<String>,
    delivery_rounds: i64,
    last_error: Option<String>,
    leased_by: Option<String>,
    leased_until: Option<i64>,
    skipped: bool,
}

impl TryFrom<EntryRow> for ChangeLogEntry {
    type Error = StorageError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let payload = row
            .payload
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;

        Ok(ChangeLogEntry {
            id: ChangeLogEntryId::new(row.id as u64),
            subject_id: SubjectId::new(row.subject_id),
            operation: parse_operation(&row.operation)?,
            timestamp: row.timestamp,
            synced: row.synced,
            payload,
            delivery_rounds: to_u32(row.delivery_rounds, "change_log", "delivery_rounds")?,
            last_error: row.last_error,
            leased_by: row.leased_by,
            leased_until: row.leased_until,
            skipped: row.skipped,
        })
    }
}

/// Internal row type for sync job queries.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    payload: String,
    payload_digest: String,
    status: String,
    retry_count: i64,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
    next_attempt_at: i64,
}

impl TryFrom<JobRow> for SyncJob {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(SyncJob {
            id: parse_job_id(&row.id)?,
            payload: serde_json::from_str(&row.payload)?,
            payload_digest: row.payload_digest,
            status: parse_status(&row.status)?,
            retry_count: to_u32(row.retry_count, "sync_jobs", "retry_count")?,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            next_attempt_at: row.next_attempt_at,
        })
    }
}

/// Internal row type for talent pool queries.
#[derive(sqlx::FromRow)]
struct PoolRow {
    talent_pool_id: String,
    talent_pool_name: String,
    created_at: i64,
    updated_at: i64,
}

impl From<PoolRow> for TalentPool {
    fn from(row: PoolRow) -> Self {
        TalentPool {
            talent_pool_id: TalentPoolId::new(row.talent_pool_id),
            talent_pool_name: row.talent_pool_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
