use crate::config::Config;
use anyhow::Result;
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_accounts.sql", include_str!("migrations/001_accounts.sql"))];

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    tx_lock: Arc<Mutex<()>>,
    /// Set when a transaction was dropped without being finished.
    abandoned: Arc<AtomicBool>,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

/// An open `BEGIN`..`COMMIT` span. Writers hold the transaction lock for its
/// whole lifetime, so statements from other requests never land inside it.
///
/// Dropping it unfinished (a cancelled request) rolls back before the lock
/// is handed to the next writer.
pub struct Transaction<'a> {
    conn: &'a Connection,
    guard: Option<OwnedMutexGuard<()>>,
    abandoned: Arc<AtomicBool>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    /// Commits on `Ok`, rolls back on `Err`, and hands the result through.
    pub async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.conn.execute("COMMIT", ()).await?;
                self.finished = true;
                Ok(value)
            }
            Err(e) => {
                match self.conn.execute("ROLLBACK", ()).await {
                    Ok(_) => self.finished = true,
                    Err(rollback) => tracing::warn!(error = %rollback, "rollback failed"),
                }
                Err(e)
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.abandoned.store(true, Ordering::SeqCst);
        let Some(guard) = self.guard.take() else {
            return;
        };
        // Without a runtime the flag is enough: the next `begin` rolls back.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let conn = self.conn.clone();
        let abandoned = self.abandoned.clone();
        runtime.spawn(async move {
            let _guard = guard;
            if abandoned.swap(false, Ordering::SeqCst) {
                if let Err(e) = conn.execute("ROLLBACK", ()).await {
                    tracing::warn!(error = %e, "rollback of abandoned transaction failed");
                } else {
                    tracing::warn!("rolled back an abandoned transaction");
                }
            }
        });
    }
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    pub async fn sync(&self) -> Result<()> {
        if Self::is_replica(&self.turso_url, &self.turso_auth_token) {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    /// Runs a `SELECT COUNT(*) ...` statement.
    pub async fn count(&self, sql: &str, params: Vec<libsql::Value>) -> Result<u64> {
        let mut rows = self.conn.query(sql, libsql::params_from_iter(params)).await?;
        match rows.next().await? {
            Some(row) => Ok(u64::try_from(row.get::<i64>(0)?)?),
            None => Ok(0),
        }
    }

    pub async fn begin(&self) -> Result<Transaction<'_>> {
        let guard = self.tx_lock.clone().lock_owned().await;
        if self.abandoned.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.conn.execute("ROLLBACK", ()).await {
                tracing::warn!(error = %e, "rollback of abandoned transaction failed");
            }
        }
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        Ok(Transaction {
            conn: &self.conn,
            guard: Some(guard),
            abandoned: self.abandoned.clone(),
            finished: false,
        })
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let turso_url = cfg.app.turso_url.clone();
        let turso_auth_token = cfg.app.turso_auth_token.clone();

        let db = if cfg.app.is_in_memory() {
            tracing::info!("[db] running against an in-memory database");
            Builder::new_local(":memory:").build().await?
        } else {
            let path = data_dir.join(cfg.app.get_db());
            match (&turso_url, &turso_auth_token) {
                (Some(url), Some(token)) => {
                    tracing::info!("[db] running in synced database mode (offline writes)");
                    let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                    Builder::new_synced_database(&path, url.clone(), token.clone())
                        .sync_interval(sync_interval)
                        .build()
                        .await?
                }
                _ => Builder::new_local(&path).build().await?,
            }
        };

        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;

        Self::migrate(&conn).await?;

        Ok(Database {
            db,
            conn,
            tx_lock: Arc::new(Mutex::new(())),
            abandoned: Arc::new(AtomicBool::new(false)),
            turso_url,
            turso_auth_token,
        })
    }

    /// Fresh, fully migrated in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::new(&Config::in_memory(), Path::new(".")).await
    }

    async fn migrate(conn: &Connection) -> Result<()> {
        for (filename, sql) in SYSTEM_MIGRATIONS {
            Self::run_migration(conn, filename, sql).await?;
        }

        for (filename, sql) in MIGRATIONS {
            Self::run_migration(conn, filename, sql).await?;
        }

        for (filename, sql) in crate::catalog::migrations() {
            Self::run_migration(conn, filename, sql).await?;
        }

        for (filename, sql) in crate::library::migrations() {
            Self::run_migration(conn, filename, sql).await?;
        }

        for (filename, sql) in crate::blog::migrations() {
            Self::run_migration(conn, filename, sql).await?;
        }

        Ok(())
    }
}

/// Splits free text on commas, trims each token and drops empty ones.
pub fn split_comma_separated_string(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
