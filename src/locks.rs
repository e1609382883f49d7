//! WebDAV class-2 locking on top of a SQLite lock table.
//!
//! SQLite handles the cross-process and cross-thread synchronization,
//! this module handles the WebDAV lock semantics. All mutations run in
//! an immediate write transaction so conflict detection and insertion
//! are atomic across server processes. Contention past the configured
//! busy timeout surfaces as 503, any other store error as 500.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use log::{debug, trace};
use rusqlite::{Connection, TransactionBehavior, params};
use uuid::Uuid;

use crate::davheaders::DavTimeout;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};

// DAV precondition element name for token/uri mismatches.
const TOKEN_MISMATCH: &str = "lock-token-matches-request-uri";

/// A live lock row.
#[derive(Debug, Clone)]
pub struct Lock {
    pub urn: String,
    pub path: DavPath,
    pub shared: bool,
    pub owner: String,
    pub infinite_depth: bool,
    // granted on a nonexistent path, materialized as an empty file
    pub is_placeholder: bool,
    pub valid_until: i64,
}

impl Lock {
    /// Does this lock's scope cover `rel`: its own path, plus all
    /// descendants when the lock has infinite depth.
    pub fn covers(&self, rel: &DavPath) -> bool {
        self.path == *rel || (self.infinite_depth && rel.is_within(&self.path))
    }

    /// Seconds from now until expiry, for the activelock timeout field.
    pub fn seconds_until_timeout(&self) -> i64 {
        (self.valid_until - now()).max(0)
    }
}

/// Shared handle over the lock table. Open it once per server; the
/// store serializes its own writes.
#[derive(Debug, Clone)]
pub struct LockManager {
    conn: Arc<Mutex<Connection>>,
    max_time: u32,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn store_err(e: rusqlite::Error) -> DavError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.code == rusqlite::ErrorCode::DatabaseBusy
            || err.code == rusqlite::ErrorCode::DatabaseLocked
        {
            return DavError::LockStoreBusy;
        }
    }
    DavError::LockStoreFail(e.to_string())
}

fn row_to_lock(row: &rusqlite::Row) -> rusqlite::Result<Lock> {
    Ok(Lock {
        urn: row.get("urn")?,
        path: DavPath::from_rel(row.get::<_, String>("path")?),
        shared: row.get("shared")?,
        owner: row.get("owner")?,
        infinite_depth: row.get("infinite_depth")?,
        is_placeholder: row.get("is_placeholder")?,
        valid_until: row.get("valid_until")?,
    })
}

// Query every live lock whose scope covers `rel`: locks on the path
// itself, infinite-depth locks on any ancestor, and with `recursive`
// also locks on anything inside the collection.
fn query_locks(
    conn: &Connection,
    rel: &DavPath,
    recursive: bool,
    now: i64,
) -> rusqlite::Result<Vec<Lock>> {
    let mut exprs = vec!["path = ?".to_string()];
    let mut args: Vec<rusqlite::types::Value> = vec![rel.as_rel_str().to_string().into()];

    for parent in rel.ancestors() {
        exprs.push("(infinite_depth AND path = ?)".to_string());
        args.push(parent.as_rel_str().to_string().into());
    }

    if recursive {
        let prefix = if rel.is_root() {
            String::new()
        } else {
            format!("{}/", rel.as_rel_str())
        };
        exprs.push("SUBSTR(path,1,?) = ?".to_string());
        args.push((prefix.len() as i64).into());
        args.push(prefix.into());
    }

    let sql = format!(
        "SELECT * FROM locks WHERE valid_until > ? AND ({})",
        exprs.join(" OR ")
    );
    let mut args_full: Vec<rusqlite::types::Value> = vec![now.into()];
    args_full.extend(args);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args_full), row_to_lock)?;
    rows.collect()
}

// A lock with that urn exists, is live, and its scope covers `rel`.
fn query_validate(conn: &Connection, rel: &DavPath, urn: &str, now: i64) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare("SELECT * FROM locks WHERE urn = ? AND valid_until > ?")?;
    let mut rows = stmt.query_map(params![urn, now], row_to_lock)?;
    match rows.next() {
        Some(row) => Ok(row?.covers(rel)),
        None => Ok(false),
    }
}

fn query_lock_by_urn(conn: &Connection, urn: &str) -> rusqlite::Result<Lock> {
    conn.query_row("SELECT * FROM locks WHERE urn = ?", params![urn], row_to_lock)
}

impl LockManager {
    /// Open (creating if needed) the lock table at `db_path`.
    /// Contended writes wait up to `lock_wait` before giving up;
    /// `max_time` caps every granted lock TTL, in seconds.
    pub fn open(db_path: &Path, lock_wait: Duration, max_time: u32) -> DavResult<LockManager> {
        let newfile = !db_path.exists();
        let conn = Connection::open(db_path).map_err(store_err)?;
        conn.busy_timeout(lock_wait).map_err(store_err)?;

        let mgr = LockManager {
            conn: Arc::new(Mutex::new(conn)),
            max_time,
        };
        if newfile {
            mgr.create_tables()?;
        } else {
            mgr.purge_expired()?;
        }
        Ok(mgr)
    }

    fn create_tables(&self) -> DavResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE locks (
                urn TEXT PRIMARY KEY,
                path TEXT,
                shared BOOLEAN,
                owner TEXT,
                infinite_depth BOOLEAN,
                is_placeholder BOOLEAN,
                valid_until TIMESTAMP);
            CREATE INDEX locks_idx1 ON locks (path);
            CREATE INDEX locks_idx2 ON locks (valid_until);",
        )
        .map_err(store_err)
    }

    /// Remove all expired locks. A read runs first so an idle table
    /// does not take a write lock.
    fn purge_expired(&self) -> DavResult<()> {
        let conn = self.conn.lock().unwrap();
        let stale: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM locks WHERE valid_until < ? LIMIT 1",
                params![now()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(store_err(e)),
            })?;
        if stale.is_some() {
            conn.execute("DELETE FROM locks WHERE valid_until < ?", params![now()])
                .map_err(store_err)?;
        }
        Ok(())
    }

    /// All live locks whose scope covers `rel`; with `recursive`, also
    /// the locks on resources inside the collection.
    pub fn get_locks(&self, rel: &DavPath, recursive: bool) -> DavResult<Vec<Lock>> {
        let conn = self.conn.lock().unwrap();
        query_locks(&conn, rel, recursive, now()).map_err(store_err)
    }

    /// True iff a live lock with this urn exists and covers `rel`.
    /// Expiry is re-checked at query time, never from a cache.
    pub fn validate(&self, rel: &DavPath, urn: &str) -> DavResult<bool> {
        let conn = self.conn.lock().unwrap();
        query_validate(&conn, rel, urn, now()).map_err(store_err)
    }

    // effective TTL: requested capped by config, absent or zero -> cap.
    fn effective_timeout(&self, requested: Option<DavTimeout>) -> u32 {
        match requested {
            Some(DavTimeout::Seconds(n)) if n > 0 => n.min(self.max_time),
            _ => self.max_time,
        }
    }

    /// Grant a new lock on `rel`, or fail with 423 if a conflicting
    /// lock exists. Conflict check and insert run in one immediate
    /// transaction so at most one contender wins an exclusive slot.
    /// `placeholder` marks a lock-null resource, so UNLOCK knows to
    /// remove the empty file it left behind.
    pub fn create(
        &self,
        rel: &DavPath,
        shared: bool,
        owner: &str,
        infinite_depth: bool,
        placeholder: bool,
        timeout: Option<DavTimeout>,
    ) -> DavResult<Lock> {
        let urn = Uuid::new_v4().urn().to_string();
        let valid_until = now() + self.effective_timeout(timeout) as i64;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;

        for lock in query_locks(&tx, rel, infinite_depth, now()).map_err(store_err)? {
            if !lock.shared || !shared {
                // Allow only one exclusive lock.
                debug!("lock conflict on {}: {}", rel, lock.urn);
                return Err(DavError::Status(StatusCode::LOCKED));
            }
        }
        tx.execute(
            "INSERT INTO locks VALUES (?,?,?,?,?,?,?)",
            params![
                urn,
                rel.as_rel_str(),
                shared,
                owner,
                infinite_depth,
                placeholder,
                valid_until
            ],
        )
        .map_err(store_err)?;
        let lock = query_lock_by_urn(&tx, &urn).map_err(store_err)?;
        tx.commit().map_err(store_err)?;

        trace!("lock {} created on {}", lock.urn, rel);
        Ok(lock)
    }

    /// Refresh an existing lock. The `(rel, urn)` pair must match a
    /// live lock, otherwise 412 with `lock-token-matches-request-uri`.
    pub fn refresh(&self, rel: &DavPath, urn: &str, timeout: Option<DavTimeout>) -> DavResult<Lock> {
        let valid_until = now() + self.effective_timeout(timeout) as i64;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;

        if !query_validate(&tx, rel, urn, now()).map_err(store_err)? {
            return Err(DavError::Precondition(
                StatusCode::PRECONDITION_FAILED,
                TOKEN_MISMATCH,
            ));
        }
        // a refresh restarts the timeout counter; validity never shrinks.
        tx.execute(
            "UPDATE locks SET valid_until = MAX(valid_until, ?) WHERE urn = ?",
            params![valid_until, urn],
        )
        .map_err(store_err)?;
        let lock = query_lock_by_urn(&tx, urn).map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(lock)
    }

    /// Release a lock, returning the removed row. The `(rel, urn)`
    /// pair must match, otherwise 409 with
    /// `lock-token-matches-request-uri`.
    pub fn release(&self, rel: &DavPath, urn: &str) -> DavResult<Lock> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;

        if !query_validate(&tx, rel, urn, now()).map_err(store_err)? {
            return Err(DavError::Precondition(StatusCode::CONFLICT, TOKEN_MISMATCH));
        }
        let lock = query_lock_by_urn(&tx, urn).map_err(store_err)?;
        tx.execute("DELETE FROM locks WHERE urn = ?", params![urn])
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(lock)
    }

    /// Release every lock scoped at or below `rel`, after DELETE or
    /// MOVE removed that subtree. Infinite-depth locks on ancestors
    /// stay in place.
    pub fn purge_below(&self, rel: &DavPath) -> DavResult<()> {
        for lock in self.get_locks(rel, true)? {
            if !lock.path.is_within(rel) {
                continue;
            }
            self.release(&lock.path, &lock.urn)?;
        }
        Ok(())
    }
}
