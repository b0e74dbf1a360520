use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeSet;
use tracing::error;

use super::SubscriptionStore;

/// A form bound to a chat: responses to `form_id` go to `destination_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub requester_chat_id: i64,
    pub form_id: String,
    pub destination_id: i64,
    /// Response ids already delivered; gates redelivery.
    pub delivered: BTreeSet<String>,
}

impl Subscription {
    pub fn new(requester_chat_id: i64, form_id: &str, destination_id: i64) -> Self {
        Self {
            requester_chat_id,
            form_id: form_id.to_string(),
            destination_id,
            delivered: BTreeSet::new(),
        }
    }

    pub fn is_delivered(&self, response_id: &str) -> bool {
        self.delivered.contains(response_id)
    }
}

pub(crate) fn encode_ids(ids: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(ids).context("Failed to encode delivered ids")
}

pub(crate) fn decode_ids(json: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(json).context("Failed to decode delivered ids")
}

const SELECT_COLUMNS: &str =
    "SELECT requester_chat_id, form_id, destination_id, delivered_ids FROM subscriptions";

impl SubscriptionStore {
    /// Insert or overwrite the subscription for (requester, form).
    pub async fn put(&self, sub: &Subscription) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO subscriptions (requester_chat_id, form_id, destination_id, delivered_ids)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(requester_chat_id, form_id) DO UPDATE SET
                destination_id = excluded.destination_id,
                delivered_ids = excluded.delivered_ids,
                updated_at = datetime('now')",
            rusqlite::params![
                sub.requester_chat_id,
                sub.form_id,
                sub.destination_id,
                encode_ids(&sub.delivered)?,
            ],
        )
        .context("Failed to save subscription")?;
        Ok(())
    }

    /// Point an existing subscription at another chat. The delivered set is
    /// not touched. Returns `false` if (requester, form) is not bound.
    pub async fn set_destination(
        &self,
        requester_chat_id: i64,
        form_id: &str,
        destination_id: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE subscriptions SET destination_id = ?3, updated_at = datetime('now')
                 WHERE requester_chat_id = ?1 AND form_id = ?2",
                rusqlite::params![requester_chat_id, form_id, destination_id],
            )
            .context("Failed to update destination")?;
        Ok(updated > 0)
    }

    /// All subscriptions of a requester; empty if there are none.
    pub async fn get(&self, requester_chat_id: i64) -> Result<Vec<Subscription>> {
        let conn = self.conn.lock().await;
        query_subscriptions(
            &conn,
            "WHERE requester_chat_id = ?1",
            rusqlite::params![requester_chat_id],
        )
    }

    pub async fn find(&self, requester_chat_id: i64, form_id: &str) -> Result<Option<Subscription>> {
        let conn = self.conn.lock().await;
        let mut subs = query_subscriptions(
            &conn,
            "WHERE requester_chat_id = ?1 AND form_id = ?2",
            rusqlite::params![requester_chat_id, form_id],
        )?;
        Ok(subs.pop())
    }

    /// Every subscription, in a stable order.
    pub async fn list_all(&self) -> Result<Vec<Subscription>> {
        let conn = self.conn.lock().await;
        query_subscriptions(&conn, "", rusqlite::params![])
    }

    /// Delete one subscription, or all of a requester's when `form_id` is
    /// `None`. Returns the number of subscriptions removed.
    pub async fn remove(&self, requester_chat_id: i64, form_id: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = match form_id {
            Some(form_id) => conn.execute(
                "DELETE FROM subscriptions WHERE requester_chat_id = ?1 AND form_id = ?2",
                rusqlite::params![requester_chat_id, form_id],
            ),
            None => conn.execute(
                "DELETE FROM subscriptions WHERE requester_chat_id = ?1",
                rusqlite::params![requester_chat_id],
            ),
        }
        .context("Failed to delete subscription")?;
        Ok(removed)
    }

    /// Add `response_id` to the delivered set and persist it.
    ///
    /// The stored row is re-read inside the transaction so ids recorded by
    /// another writer are kept, and `sub.delivered` is refreshed from it.
    /// Returns `false` if the subscription was removed in the meantime; the
    /// row is not recreated.
    pub async fn record_delivered(&self, sub: &mut Subscription, response_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .context("Failed to begin delivered-id transaction")?;

        let Some(stored) = read_delivered(&tx, sub.requester_chat_id, &sub.form_id)? else {
            sub.delivered.insert(response_id.to_string());
            return Ok(false);
        };

        let mut ids = decode_ids(&stored)?;
        ids.insert(response_id.to_string());

        tx.execute(
            "UPDATE subscriptions SET delivered_ids = ?3, updated_at = datetime('now')
             WHERE requester_chat_id = ?1 AND form_id = ?2",
            rusqlite::params![sub.requester_chat_id, sub.form_id, encode_ids(&ids)?],
        )
        .context("Failed to update delivered ids")?;
        tx.commit().context("Failed to commit delivered ids")?;

        sub.delivered = ids;
        Ok(true)
    }
}

fn read_delivered(conn: &Connection, requester_chat_id: i64, form_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT delivered_ids FROM subscriptions
         WHERE requester_chat_id = ?1 AND form_id = ?2",
        rusqlite::params![requester_chat_id, form_id],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to read delivered ids")
}

// Takes &Connection directly (caller already holds the lock).
// Rows whose delivered ids cannot be decoded are logged and left out.
fn query_subscriptions(
    conn: &Connection,
    where_clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Subscription>> {
    let sql = format!(
        "{} {} ORDER BY requester_chat_id ASC, created_at ASC, form_id ASC",
        SELECT_COLUMNS, where_clause
    );
    let mut stmt = conn.prepare(&sql).context("Failed to prepare query")?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .context("Failed to map rows")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to collect rows")?;

    let subs = rows
        .into_iter()
        .filter_map(|(requester_chat_id, form_id, destination_id, delivered)| {
            match decode_ids(&delivered) {
                Ok(delivered) => Some(Subscription {
                    requester_chat_id,
                    form_id,
                    destination_id,
                    delivered,
                }),
                Err(e) => {
                    error!(
                        "Skipping form {} of chat {}: {:#}",
                        form_id, requester_chat_id, e
                    );
                    None
                }
            }
        })
        .collect();
    Ok(subs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sub(chat: i64, form: &str, ids: &[&str]) -> Subscription {
        let mut sub = Subscription::new(chat, form, -1001);
        sub.delivered = ids.iter().map(|s| s.to_string()).collect();
        sub
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        store.put(&make_sub(5, "f1", &["r1", "r2"])).await.unwrap();

        let subs = store.get(5).await.unwrap();
        assert_eq!(subs, vec![make_sub(5, "f1", &["r1", "r2"])]);
        assert!(store.get(6).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_overwrites_same_key() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        store.put(&make_sub(5, "f1", &["r1"])).await.unwrap();

        let mut updated = make_sub(5, "f1", &["r9"]);
        updated.destination_id = 42;
        store.put(&updated).await.unwrap();

        let subs = store.get(5).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].destination_id, 42);
        assert_eq!(subs[0].delivered, BTreeSet::from(["r9".to_string()]));
    }

    #[tokio::test]
    async fn test_set_destination_keeps_delivered() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        store.put(&make_sub(5, "f1", &["r1", "r2"])).await.unwrap();

        assert!(store.set_destination(5, "f1", 77).await.unwrap());
        assert!(!store.set_destination(5, "f2", 77).await.unwrap());

        let stored = store.find(5, "f1").await.unwrap().unwrap();
        assert_eq!(stored.destination_id, 77);
        assert_eq!(stored.delivered, make_sub(5, "f1", &["r1", "r2"]).delivered);
        assert!(store.find(5, "f2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_row_is_skipped() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        store.put(&make_sub(5, "f1", &["r1"])).await.unwrap();
        store.put(&make_sub(6, "f2", &[])).await.unwrap();
        store
            .conn
            .lock()
            .await
            .execute(
                "UPDATE subscriptions SET delivered_ids = 'not json' WHERE form_id = 'f2'",
                [],
            )
            .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all, vec![make_sub(5, "f1", &["r1"])]);

        // put repairs the row
        store.put(&make_sub(6, "f2", &["r7"])).await.unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_one_and_all() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        store.put(&make_sub(5, "f1", &[])).await.unwrap();
        store.put(&make_sub(5, "f2", &[])).await.unwrap();
        store.put(&make_sub(6, "f1", &[])).await.unwrap();

        assert_eq!(store.remove(5, Some("f1")).await.unwrap(), 1);
        assert_eq!(store.remove(5, Some("f1")).await.unwrap(), 0);
        assert_eq!(store.get(5).await.unwrap().len(), 1);

        assert_eq!(store.remove(5, None).await.unwrap(), 1);
        assert!(store.get(5).await.unwrap().is_empty());
        assert_eq!(store.get(6).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_delivered_merges_with_stored_row() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        store.put(&make_sub(5, "f1", &["r1"])).await.unwrap();

        // Two stale in-memory copies recording different ids.
        let mut a = make_sub(5, "f1", &["r1"]);
        let mut b = make_sub(5, "f1", &["r1"]);
        assert!(store.record_delivered(&mut a, "r2").await.unwrap());
        assert!(store.record_delivered(&mut b, "r3").await.unwrap());

        let stored = store.find(5, "f1").await.unwrap().unwrap();
        let expected: BTreeSet<String> = ["r1", "r2", "r3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(stored.delivered, expected);
        assert_eq!(b.delivered, expected);
    }

    #[tokio::test]
    async fn test_record_delivered_does_not_resurrect() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        let mut sub = make_sub(5, "f1", &[]);
        store.put(&sub).await.unwrap();
        store.remove(5, Some("f1")).await.unwrap();

        assert!(!store.record_delivered(&mut sub, "r1").await.unwrap());
        assert!(store.find(5, "f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delivered_set_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.db");

        let ids: Vec<String> = (0..50).map(|i| format!("resp-{}", i)).collect();
        {
            let store = SubscriptionStore::open(&path).unwrap();
            let mut sub = Subscription::new(5, "f1", -1001);
            store.put(&sub).await.unwrap();
            for id in &ids {
                store.record_delivered(&mut sub, id).await.unwrap();
            }
            // duplicate recording is a no-op
            store.record_delivered(&mut sub, &ids[0]).await.unwrap();
        }

        let store = SubscriptionStore::open(&path).unwrap();
        let sub = store.find(5, "f1").await.unwrap().unwrap();
        assert_eq!(sub.delivered, ids.into_iter().collect::<BTreeSet<_>>());
    }

    #[tokio::test]
    async fn test_list_all_spans_requesters() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        store.put(&make_sub(9, "f1", &[])).await.unwrap();
        store.put(&make_sub(3, "f2", &[])).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].requester_chat_id, 3);
    }
}
