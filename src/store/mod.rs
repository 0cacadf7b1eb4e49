//! SQLite persistence shared by every repository.
//!
//! A single [`Database`] owns the connection; repositories hold an
//! `Arc<Database>` and lock it for the duration of one statement or one
//! transaction. The database is the arbiter of uniqueness for states, vault
//! entries, accounts, ads, ownership edges and spend keys.

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

mod accounts;
mod metrics;
mod ownership;
mod sessions;

pub use accounts::{
    normalize_account_id, AccountsRepo, LinkedAccount, RowStage, RowWriteError, SpendRecord,
    STATUS_LINKED,
};
pub use metrics::{DailyMetricRow, MetricsRepo};
pub use ownership::OwnershipRepo;
pub use sessions::SessionStore;

/// Schema, applied idempotently on every open.
///
/// Timestamps are unix milliseconds so expiry comparisons stay numeric.
/// Money is stored as normalized decimal text.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS oauth_states (
    state         TEXT PRIMARY KEY,
    code_verifier TEXT NOT NULL,
    user_id       INTEGER NOT NULL,
    expires_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS credential_vault (
    user_id           INTEGER NOT NULL,
    external_identity TEXT NOT NULL,
    refresh_token_enc TEXT NOT NULL,
    scope             TEXT NOT NULL,
    status            TEXT NOT NULL,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL,
    UNIQUE(user_id, external_identity)
);

CREATE TABLE IF NOT EXISTS ad_accounts (
    account_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id             INTEGER NOT NULL,
    platform            TEXT NOT NULL,
    external_account_id TEXT NOT NULL,
    token_owner         TEXT NOT NULL,
    status              TEXT NOT NULL,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL,
    UNIQUE(platform, external_account_id)
);

CREATE TABLE IF NOT EXISTS ads (
    ad_id      INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    name       TEXT NOT NULL,
    status     TEXT NOT NULL,
    platform   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_ads (
    user_id INTEGER NOT NULL,
    ad_id   INTEGER NOT NULL,
    PRIMARY KEY (user_id, ad_id)
);

CREATE TABLE IF NOT EXISTS ads_insights (
    ad_id       INTEGER NOT NULL,
    metric_date TEXT NOT NULL,
    spend       TEXT NOT NULL,
    PRIMARY KEY (ad_id, metric_date)
);

CREATE TABLE IF NOT EXISTS ad_daily_metrics (
    ad_id       INTEGER NOT NULL,
    metric_date TEXT NOT NULL,
    clicks      INTEGER NOT NULL DEFAULT 0,
    conversions INTEGER NOT NULL DEFAULT 0,
    revenue     TEXT NOT NULL DEFAULT '0',
    spend       TEXT NOT NULL DEFAULT '0',
    PRIMARY KEY (ad_id, metric_date)
);

CREATE TABLE IF NOT EXISTS sessions (
    token      TEXT PRIMARY KEY,
    user_id    INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vault_user ON credential_vault(user_id, status);
CREATE INDEX IF NOT EXISTS idx_accounts_user ON ad_accounts(user_id, platform);
CREATE INDEX IF NOT EXISTS idx_states_expiry ON oauth_states(expires_at);
"#;

/// Owner of the SQLite connection.
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex; callers hold the lock for one
///   statement or one transaction, never across an await point
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database file and applies the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database (tests and ephemeral runs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to apply database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Locks the connection.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }
}

/// Current time as unix milliseconds, the representation of every stored
/// timestamp.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
