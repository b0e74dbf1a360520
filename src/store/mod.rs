pub mod legacy;
pub mod subscriptions;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use subscriptions::Subscription;

/// Thread-safe SQLite store of form subscriptions.
#[derive(Clone)]
pub struct SubscriptionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SubscriptionStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Run migrations on the raw connection before wrapping in Mutex.
        Self::run_migrations(&conn)?;

        info!("Subscription store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run raw SQL against the database (for testing)
    #[cfg(test)]
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().await.execute_batch(sql)?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS subscriptions (
                requester_chat_id INTEGER NOT NULL,
                form_id TEXT NOT NULL,
                destination_id INTEGER NOT NULL,
                delivered_ids TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (requester_chat_id, form_id)
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_form
                ON subscriptions(form_id);
            ",
        )
        .context("Failed to create subscriptions table")?;

        Self::import_forms_data(conn)?;
        Ok(())
    }

    /// Older deployments kept one `forms_data` row per save, without a key,
    /// and the group id as text. Fold those rows into `subscriptions` once,
    /// merging the sent-id sets of duplicate rows, then rename the table.
    fn import_forms_data(conn: &Connection) -> Result<()> {
        let exists: bool = conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name='forms_data'",
            [],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(());
        }

        let mut stmt = conn
            .prepare("SELECT chat_id, group_id, form_id, sent_response_ids FROM forms_data")
            .context("Failed to read legacy forms_data table")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect legacy rows")?;
        drop(stmt);

        let mut merged: BTreeMap<(i64, String), (i64, BTreeSet<String>)> = BTreeMap::new();
        for (chat_id, group_id, form_id, sent) in rows {
            let Some(form_id) = form_id.filter(|f| !f.is_empty()) else {
                warn!("Skipping legacy row of chat {} without form id", chat_id);
                continue;
            };
            let destination = match group_id.as_deref().map(str::parse::<i64>) {
                Some(Ok(id)) => id,
                None => chat_id,
                Some(Err(_)) => {
                    warn!(
                        "Skipping legacy row of chat {}: bad group id {:?}",
                        chat_id, group_id
                    );
                    continue;
                }
            };
            let ids = sent
                .as_deref()
                .map(subscriptions::decode_ids)
                .transpose()?
                .unwrap_or_default();
            let entry = merged
                .entry((chat_id, form_id))
                .or_insert_with(|| (destination, BTreeSet::new()));
            entry.0 = destination;
            entry.1.extend(ids);
        }

        let count = merged.len();
        for ((chat_id, form_id), (destination, ids)) in merged {
            conn.execute(
                "INSERT OR IGNORE INTO subscriptions
                 (requester_chat_id, form_id, destination_id, delivered_ids)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![chat_id, form_id, destination, subscriptions::encode_ids(&ids)?],
            )
            .context("Failed to import legacy subscription")?;
        }

        conn.execute_batch("ALTER TABLE forms_data RENAME TO forms_data_imported;")
            .context("Failed to retire legacy forms_data table")?;
        info!("Imported {} legacy subscription(s) from forms_data", count);
        Ok(())
    }
}
