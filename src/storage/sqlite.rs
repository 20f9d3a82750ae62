//! SQLite cycle store.
//!
//! One row per cycle keyed by issue id. Indexed columns (state, iteration, PR,
//! last error, lease owner/expiry) sit next to the full JSON record, which is the
//! source of truth. A row may exist with a lease but no JSON yet: the cycle has
//! been claimed but not committed.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{CycleFilter, CycleStore, Lease, expiry};
use crate::domain::IssueCycle;
use crate::error::{CyclrError, Result};

/// Database file name inside the store directory
const DB_FILE: &str = "cycles.db";

/// How long a writer waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed cycle store
pub struct SqliteCycleStore {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl SqliteCycleStore {
    /// Open or create the store for a project under `base_dir/<project-hash>/`
    pub fn open_for_project(base_dir: &Path, project_dir: &Path) -> Result<Self> {
        let hash = compute_project_hash(project_dir)?;
        Self::open_at(&base_dir.join(hash))
    }

    /// Open or create a store in `dir`
    pub fn open_at(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);
        let db = Connection::open(&path)?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        Self::init_schema(&db)?;

        log::debug!("Opened cycle store at {}", path.display());
        Ok(Self {
            path,
            db: Mutex::new(db),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            db: Mutex::new(db),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS cycles (
                issue_id TEXT PRIMARY KEY,
                state TEXT,
                iteration INTEGER,
                max_iterations INTEGER,
                pr_id TEXT,
                last_error TEXT,
                lease_owner TEXT,
                lease_expires_at INTEGER,
                cancel_reason TEXT,
                updated_at INTEGER NOT NULL,
                json_data TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_cycles_state ON cycles(state);
            CREATE INDEX IF NOT EXISTS idx_cycles_updated ON cycles(updated_at);
            "#,
        )?;
        Ok(())
    }

    fn db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn parse_cycle(json: &str) -> Result<IssueCycle> {
        let cycle: IssueCycle = serde_json::from_str(json)?;
        cycle.validate()?;
        Ok(cycle)
    }
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl CycleStore for SqliteCycleStore {
    fn acquire(&self, issue_id: &str, owner: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        let db = self.db();
        let expires_at = expiry(now, ttl);

        let changed = db.execute(
            r#"
            INSERT INTO cycles (issue_id, lease_owner, lease_expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(issue_id) DO UPDATE SET
                lease_owner = excluded.lease_owner,
                lease_expires_at = excluded.lease_expires_at
            WHERE cycles.lease_owner IS NULL
               OR cycles.lease_owner = excluded.lease_owner
               OR cycles.lease_expires_at <= ?4
            "#,
            params![issue_id, owner, to_ms(expires_at), to_ms(now)],
        )?;

        if changed == 0 {
            let (holder, holder_expiry): (Option<String>, Option<i64>) = db.query_row(
                "SELECT lease_owner, lease_expires_at FROM cycles WHERE issue_id = ?1",
                params![issue_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            return Err(CyclrError::LeaseHeld {
                issue_id: issue_id.to_string(),
                owner: holder.unwrap_or_default(),
                expires_at: holder_expiry.map(from_ms).unwrap_or(now).to_rfc3339(),
            });
        }

        Ok(Lease {
            issue_id: issue_id.to_string(),
            owner: owner.to_string(),
            expires_at: from_ms(to_ms(expires_at)),
        })
    }

    fn load(&self, issue_id: &str) -> Result<Option<IssueCycle>> {
        let json: Option<Option<String>> = self
            .db()
            .query_row(
                "SELECT json_data FROM cycles WHERE issue_id = ?1",
                params![issue_id],
                |row| row.get(0),
            )
            .optional()?;

        match json.flatten() {
            Some(json) => Ok(Some(Self::parse_cycle(&json)?)),
            None => Ok(None),
        }
    }

    fn commit(&self, cycle: &IssueCycle, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        let json = serde_json::to_string(cycle)?;
        let expires_at = expiry(now, ttl);

        let changed = self.db().execute(
            r#"
            UPDATE cycles SET
                state = ?1,
                iteration = ?2,
                max_iterations = ?3,
                pr_id = ?4,
                last_error = ?5,
                json_data = ?6,
                updated_at = ?7,
                lease_expires_at = ?8
            WHERE issue_id = ?9 AND lease_owner = ?10
            "#,
            params![
                cycle.state().as_str(),
                cycle.iteration(),
                cycle.max_iterations(),
                cycle.pr_id(),
                cycle.last_error(),
                json,
                to_ms(now),
                to_ms(expires_at),
                cycle.issue_id(),
                lease.owner,
            ],
        )?;

        if changed == 0 {
            return Err(CyclrError::LeaseLost(cycle.issue_id().to_string()));
        }

        Ok(Lease {
            issue_id: cycle.issue_id().to_string(),
            owner: lease.owner.clone(),
            expires_at: from_ms(to_ms(expires_at)),
        })
    }

    fn renew(&self, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease> {
        let expires_at = to_ms(expiry(now, ttl));
        let changed = self.db().execute(
            "UPDATE cycles SET lease_expires_at = ?1 WHERE issue_id = ?2 AND lease_owner = ?3",
            params![expires_at, lease.issue_id, lease.owner],
        )?;

        if changed == 0 {
            return Err(CyclrError::LeaseLost(lease.issue_id.clone()));
        }

        Ok(Lease {
            issue_id: lease.issue_id.clone(),
            owner: lease.owner.clone(),
            expires_at: from_ms(expires_at),
        })
    }

    fn release(&self, lease: &Lease) -> Result<()> {
        let db = self.db();
        // Claimed but never committed: drop the placeholder row
        db.execute(
            "DELETE FROM cycles WHERE issue_id = ?1 AND lease_owner = ?2 AND json_data IS NULL",
            params![lease.issue_id, lease.owner],
        )?;
        db.execute(
            "UPDATE cycles SET lease_owner = NULL, lease_expires_at = NULL
             WHERE issue_id = ?1 AND lease_owner = ?2",
            params![lease.issue_id, lease.owner],
        )?;
        Ok(())
    }

    fn lease(&self, issue_id: &str) -> Result<Option<Lease>> {
        let row: Option<(Option<String>, Option<i64>)> = self
            .db()
            .query_row(
                "SELECT lease_owner, lease_expires_at FROM cycles WHERE issue_id = ?1",
                params![issue_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((Some(owner), Some(expires_ms))) => Some(Lease {
                issue_id: issue_id.to_string(),
                owner,
                expires_at: from_ms(expires_ms),
            }),
            _ => None,
        })
    }

    fn list(&self, filter: &CycleFilter) -> Result<Vec<IssueCycle>> {
        let db = self.db();
        let mut stmt = db.prepare(
            "SELECT json_data FROM cycles
             WHERE json_data IS NOT NULL AND (?1 IS NULL OR state = ?1)
             ORDER BY updated_at DESC",
        )?;
        let state = filter.state.map(|s| s.as_str());
        let rows = stmt.query_map(params![state], |row| row.get::<_, String>(0))?;

        let mut cycles = Vec::new();
        for json in rows {
            let cycle = Self::parse_cycle(&json?)?;
            if filter.matches(&cycle) {
                cycles.push(cycle);
            }
        }
        Ok(cycles)
    }

    fn request_cancel(&self, issue_id: &str, reason: &str) -> Result<bool> {
        let changed = self.db().execute(
            "UPDATE cycles SET cancel_reason = ?1
             WHERE issue_id = ?2 AND json_data IS NOT NULL AND state NOT IN ('merged', 'abandoned')",
            params![reason, issue_id],
        )?;
        Ok(changed > 0)
    }

    fn cancel_request(&self, issue_id: &str) -> Result<Option<String>> {
        let reason: Option<Option<String>> = self
            .db()
            .query_row(
                "SELECT cancel_reason FROM cycles WHERE issue_id = ?1",
                params![issue_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reason.flatten())
    }
}

impl std::fmt::Debug for SqliteCycleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCycleStore").field("path", &self.path).finish()
    }
}

/// Compute a stable hash for a project directory.
///
/// Uses SHA-256 of the canonicalized path, truncated to 16 hex characters.
pub fn compute_project_hash(project_dir: &Path) -> Result<String> {
    let canonical = project_dir.canonicalize().map_err(|e| {
        CyclrError::Storage(format!(
            "Failed to canonicalize path {}: {}",
            project_dir.display(),
            e
        ))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let result = hasher.finalize();

    Ok(hex::encode(&result[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Issue;
    use crate::storage::tests::exercise_store;
    use tempfile::TempDir;

    fn create_temp_store() -> (SqliteCycleStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteCycleStore::open_at(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_sqlite_store_contract() {
        let (store, _dir) = create_temp_store();
        exercise_store(&store);
    }

    #[test]
    fn test_in_memory_store_contract() {
        exercise_store(&SqliteCycleStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_cycle_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();
        let cycle = IssueCycle::new(Issue::new("ABC-1", "t", "d"), 3);
        {
            let store = SqliteCycleStore::open_at(temp_dir.path()).unwrap();
            let lease = store.acquire("ABC-1", "drv-a", Duration::from_secs(60), now).unwrap();
            store.commit(&cycle, &lease, Duration::from_secs(60), now).unwrap();
        }

        let store = SqliteCycleStore::open_at(temp_dir.path()).unwrap();
        assert_eq!(store.load("ABC-1").unwrap(), Some(cycle));
        // Lease survived the "crash" too
        let err = store.acquire("ABC-1", "drv-b", Duration::from_secs(60), now).unwrap_err();
        assert!(matches!(err, CyclrError::LeaseHeld { ref owner, .. } if owner == "drv-a"));
    }

    #[test]
    fn test_two_connections_contend_for_lease() {
        let temp_dir = TempDir::new().unwrap();
        let a = SqliteCycleStore::open_at(temp_dir.path()).unwrap();
        let b = SqliteCycleStore::open_at(temp_dir.path()).unwrap();
        let now = Utc::now();

        a.acquire("ABC-1", "drv-a", Duration::from_secs(60), now).unwrap();
        assert!(b.acquire("ABC-1", "drv-b", Duration::from_secs(60), now).is_err());
        let later = now + chrono::Duration::seconds(61);
        assert!(b.acquire("ABC-1", "drv-b", Duration::from_secs(60), later).is_ok());
    }

    #[test]
    fn test_corrupt_iteration_rejected_on_load() {
        let (store, _dir) = create_temp_store();
        let now = Utc::now();
        let cycle = IssueCycle::new(Issue::new("ABC-1", "t", "d"), 3);
        let lease = store.acquire("ABC-1", "drv", Duration::from_secs(60), now).unwrap();
        store.commit(&cycle, &lease, Duration::from_secs(60), now).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&cycle).unwrap()).unwrap();
        json["iteration"] = serde_json::json!(9);
        store
            .db()
            .execute(
                "UPDATE cycles SET json_data = ?1 WHERE issue_id = 'ABC-1'",
                params![json.to_string()],
            )
            .unwrap();

        assert!(matches!(store.load("ABC-1"), Err(CyclrError::InvariantViolation(_))));
    }

    #[test]
    fn test_compute_project_hash() {
        let temp_dir = TempDir::new().unwrap();
        let hash = compute_project_hash(temp_dir.path()).unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, compute_project_hash(temp_dir.path()).unwrap());
        assert!(compute_project_hash(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_open_for_project() {
        let base = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let store = SqliteCycleStore::open_for_project(base.path(), project.path()).unwrap();
        let hash = compute_project_hash(project.path()).unwrap();
        assert_eq!(store.path(), base.path().join(hash).join(DB_FILE));
    }
}
