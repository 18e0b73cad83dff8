//! SQLite-backed account store.
//!
//! Tables:
//! - `accounts`: id, display_name, email (unique, case-insensitive),
//!   credential_hash, created_at, updated_at
//!
//! Every connection comes from an r2d2 pool. A [`TransactionScope`] owns one
//! pooled connection with an open `BEGIN IMMEDIATE` transaction; calls that
//! receive the scope run on that connection, so their visibility and
//! durability follow the scope's commit or abort. All SQLite work runs on
//! the blocking pool.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How long a connection waits on SQLite's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: u32 = 8;

const ACCOUNT_COLUMNS: &str = "id, display_name, email, credential_hash, created_at, updated_at";

type PooledConn = PooledConnection<SqliteConnectionManager>;

/// A persisted account.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: Option<String>,
    pub email: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("credential_hash", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Fields supplied by the caller when creating an account.
#[derive(Clone)]
pub struct AccountDraft {
    pub email: String,
    pub credential_hash: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an account with this email already exists")]
    DuplicateKey,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("transaction scope already released")]
    ScopeReleased,
    #[error("store task failed: {0}")]
    Task(String),
}

/// Trimmed, lowercased form of an email used as the login key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// One open transaction on a dedicated pooled connection.
///
/// Consumed by [`AccountStore::commit`] or [`AccountStore::abort`]. A scope
/// dropped on any other path rolls back and returns its connection to the pool.
pub struct TransactionScope {
    slot: Arc<Mutex<Option<PooledConn>>>,
}

impl TransactionScope {
    fn new(conn: PooledConn) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Whether the scope still holds its connection.
    pub fn is_open(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("open", &self.slot.try_lock().map(|slot| slot.is_some()))
            .finish()
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slot.try_lock() {
            if let Some(conn) = slot.take() {
                rollback_quietly(&conn);
            }
            return;
        }

        // An operation still holds the connection (e.g. a commit that timed
        // out); release it once that operation lets go.
        let slot = Arc::clone(&self.slot);
        let release = move || {
            if let Some(conn) = slot.lock().take() {
                rollback_quietly(&conn);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(release);
            }
            Err(_) => release(),
        }
    }
}

fn rollback_quietly(conn: &Connection) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(e) = conn.execute_batch("ROLLBACK") {
        tracing::warn!("Failed to roll back abandoned transaction: {e}");
    }
}

fn finish_scope(slot: &Mutex<Option<PooledConn>>, commit: bool) -> Result<(), StoreError> {
    let conn = slot.lock().take().ok_or(StoreError::ScopeReleased)?;
    if conn.is_autocommit() {
        return Ok(());
    }
    if commit {
        if let Err(e) = conn.execute_batch("COMMIT") {
            rollback_quietly(&conn);
            return Err(e.into());
        }
        Ok(())
    } else {
        conn.execute_batch("ROLLBACK").map_err(Into::into)
    }
}

/// Persistence boundary for accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Open a transaction scope.
    async fn begin(&self) -> Result<TransactionScope, StoreError>;

    async fn find_by_email(
        &self,
        email: &str,
        scope: Option<&TransactionScope>,
    ) -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>, StoreError>;

    /// Insert a new account, assigning its id and timestamps.
    ///
    /// Fails with [`StoreError::DuplicateKey`] when the normalized email is taken.
    async fn insert(
        &self,
        draft: AccountDraft,
        scope: Option<&TransactionScope>,
    ) -> Result<Account, StoreError>;

    async fn commit(&self, scope: TransactionScope) -> Result<(), StoreError>;

    async fn abort(&self, scope: TransactionScope) -> Result<(), StoreError>;

    /// Number of stored accounts, as seen by `scope` when one is given.
    async fn count(&self, scope: Option<&TransactionScope>) -> Result<u64, StoreError>;
}

/// SQLite implementation of [`AccountStore`].
#[derive(Clone)]
pub struct SqliteAccountStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAccountStore {
    /// Open (or create) the account database at the given path.
    pub fn open(db_path: &Path, pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database dir: {}", parent.display()))?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            // WAL mode for concurrent reads + crash safety
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;",
            )
        });

        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .with_context(|| format!("Failed to open account DB: {}", db_path.display()))?;

        let conn = pool.get()?;
        Self::init_schema(&conn)?;

        Ok(Self { pool })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id              TEXT PRIMARY KEY,
                display_name    TEXT,
                email           TEXT NOT NULL UNIQUE COLLATE NOCASE,
                credential_hash TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Run `op` on the scope's connection, or on a fresh pooled one.
    async fn with_conn<T, F>(&self, scope: Option<&TransactionScope>, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        match scope {
            Some(scope) => {
                let slot = Arc::clone(&scope.slot);
                run_blocking(move || {
                    let guard = slot.lock();
                    let conn = guard.as_ref().ok_or(StoreError::ScopeReleased)?;
                    op(&**conn)
                })
                .await
            }
            None => {
                let pool = self.pool.clone();
                run_blocking(move || {
                    let conn = checkout(&pool)?;
                    op(&*conn)
                })
                .await
            }
        }
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn begin(&self) -> Result<TransactionScope, StoreError> {
        let pool = self.pool.clone();
        let conn = run_blocking(move || {
            let conn = checkout(&pool)?;
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(conn)
        })
        .await?;
        Ok(TransactionScope::new(conn))
    }

    async fn find_by_email(
        &self,
        email: &str,
        scope: Option<&TransactionScope>,
    ) -> Result<Option<Account>, StoreError> {
        let email = normalize_email(email);
        self.with_conn(scope, move |conn| {
            query_optional(
                conn,
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1"),
                &email,
            )
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let id = id.to_owned();
        self.with_conn(None, move |conn| {
            query_optional(
                conn,
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                &id,
            )
        })
        .await
    }

    async fn insert(
        &self,
        draft: AccountDraft,
        scope: Option<&TransactionScope>,
    ) -> Result<Account, StoreError> {
        self.with_conn(scope, move |conn| {
            let now = Utc::now();
            let account = Account {
                id: uuid::Uuid::new_v4().to_string(),
                display_name: draft.display_name,
                email: normalize_email(&draft.email),
                credential_hash: draft.credential_hash,
                created_at: now,
                updated_at: now,
            };

            let result = conn.execute(
                "INSERT INTO accounts (id, display_name, email, credential_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    account.id,
                    account.display_name,
                    account.email,
                    account.credential_hash,
                    account.created_at.to_rfc3339(),
                    account.updated_at.to_rfc3339(),
                ],
            );

            match result {
                Ok(_) => Ok(account),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateKey)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn commit(&self, scope: TransactionScope) -> Result<(), StoreError> {
        let slot = Arc::clone(&scope.slot);
        run_blocking(move || finish_scope(&slot, true)).await
    }

    async fn abort(&self, scope: TransactionScope) -> Result<(), StoreError> {
        let slot = Arc::clone(&scope.slot);
        run_blocking(move || finish_scope(&slot, false)).await
    }

    async fn count(&self, scope: Option<&TransactionScope>) -> Result<u64, StoreError> {
        self.with_conn(scope, |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }
}

/// Check a connection out of the pool, discarding any transaction a
/// previous holder left open.
fn checkout(pool: &Pool<SqliteConnectionManager>) -> Result<PooledConn, StoreError> {
    let conn = pool.get()?;
    rollback_quietly(&conn);
    Ok(conn)
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

fn query_optional(conn: &Connection, sql: &str, key: &str) -> Result<Option<Account>, StoreError> {
    match conn.query_row(sql, rusqlite::params![key], row_to_account) {
        Ok(account) => Ok(Some(account)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        credential_hash: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?),
        updated_at: parse_timestamp(&row.get::<_, String>(5)?),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            tracing::warn!("Unparseable account timestamp {raw:?}");
            DateTime::<Utc>::UNIX_EPOCH
        })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteAccountStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteAccountStore::open(&tmp.path().join("accounts.db"), 4).unwrap();
        (tmp, store)
    }

    fn draft(email: &str) -> AccountDraft {
        AccountDraft {
            email: email.to_string(),
            credential_hash: "$pbkdf2-sha256$i=1000,l=32$c2FsdA$aGFzaA".to_string(),
            display_name: Some("Test User".to_string()),
        }
    }

    #[tokio::test]
    async fn insert_assigns_id_and_timestamps() {
        let (_tmp, store) = test_store();

        let account = store.insert(draft("a@x.com"), None).await.unwrap();
        assert!(!account.id.is_empty());
        assert_eq!(account.created_at, account.updated_at);

        let other = store.insert(draft("b@x.com"), None).await.unwrap();
        assert_ne!(account.id, other.id);
    }

    #[tokio::test]
    async fn find_by_email_is_normalized() {
        let (_tmp, store) = test_store();

        let account = store.insert(draft("  Mixed@Case.COM "), None).await.unwrap();
        assert_eq!(account.email, "mixed@case.com");

        let found = store
            .find_by_email("MIXED@case.com", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, account.id);
        assert_eq!(found.display_name.as_deref(), Some("Test User"));
        assert_eq!(found.credential_hash, account.credential_hash);

        assert!(store.find_by_email("nobody@x.com", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_duplicate_key() {
        let (_tmp, store) = test_store();

        store.insert(draft("a@x.com"), None).await.unwrap();
        let err = store.insert(draft("A@X.com"), None).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey));
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_by_id_round_trips() {
        let (_tmp, store) = test_store();

        let account = store.insert(draft("a@x.com"), None).await.unwrap();
        let found = store.find_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(found.email, "a@x.com");
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scoped_insert_visible_only_after_commit() {
        let (_tmp, store) = test_store();

        let scope = store.begin().await.unwrap();
        let account = store.insert(draft("a@x.com"), Some(&scope)).await.unwrap();

        // Visible inside the scope, not outside it.
        assert!(store
            .find_by_email("a@x.com", Some(&scope))
            .await
            .unwrap()
            .is_some());
        assert!(store.find_by_email("a@x.com", None).await.unwrap().is_none());

        store.commit(scope).await.unwrap();
        let found = store.find_by_email("a@x.com", None).await.unwrap().unwrap();
        assert_eq!(found.id, account.id);
    }

    #[tokio::test]
    async fn abort_discards_scoped_insert() {
        let (_tmp, store) = test_store();

        let scope = store.begin().await.unwrap();
        store.insert(draft("a@x.com"), Some(&scope)).await.unwrap();
        store.abort(scope).await.unwrap();

        assert!(store.find_by_email("a@x.com", None).await.unwrap().is_none());
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_scope_rolls_back_and_frees_write_lock() {
        let (_tmp, store) = test_store();

        {
            let scope = store.begin().await.unwrap();
            store.insert(draft("a@x.com"), Some(&scope)).await.unwrap();
            assert!(scope.is_open());
        }

        assert!(store.find_by_email("a@x.com", None).await.unwrap().is_none());

        let scope = store.begin().await.unwrap();
        store.insert(draft("a@x.com"), Some(&scope)).await.unwrap();
        store.commit(scope).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("accounts.db");

        let id = {
            let store = SqliteAccountStore::open(&path, 2).unwrap();
            store.insert(draft("a@x.com"), None).await.unwrap().id
        };

        let store = SqliteAccountStore::open(&path, 2).unwrap();
        let found = store.find_by_email("a@x.com", None).await.unwrap().unwrap();
        assert_eq!(found.id, id);
    }

    #[test]
    fn serialized_account_omits_credential_hash() {
        let now = Utc::now();
        let account = Account {
            id: "acct-1".into(),
            display_name: Some("Ada".into()),
            email: "ada@x.com".into(),
            credential_hash: "$pbkdf2-sha256$secret-material".into(),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["id"], "acct-1");
        assert_eq!(json["name"], "Ada");
        assert_eq!(json["email"], "ada@x.com");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("credentialHash").is_none());
        assert!(!json.to_string().contains("secret-material"));
        assert!(!format!("{account:?}").contains("secret-material"));
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  A@X.Com\n"), "a@x.com");
    }
}
