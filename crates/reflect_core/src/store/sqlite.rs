//! SQLite-backed key-value store.
//!
//! # Invariants
//! - Batches run inside one IMMEDIATE transaction.
//! - The connection must already be migrated (`kv_entries` present).

use super::{KeyValueRead, KeyValueStore, KvOp, StoreError, StoreResult};
use log::error;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

const UPSERT_SQL: &str = "INSERT INTO kv_entries (key, value, updated_at)
     VALUES (?1, ?2, (strftime('%s', 'now') * 1000))
     ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at;";
const DELETE_SQL: &str = "DELETE FROM kv_entries WHERE key = ?1;";

/// Key-value store over the `kv_entries` table.
pub struct SqliteKvStore<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteKvStore<'conn> {
    /// Wraps a migrated connection, rejecting ones without `kv_entries`.
    pub fn try_new(conn: &'conn mut Connection) -> StoreResult<Self> {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = 'kv_entries'
            );",
            [],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(StoreError::Unavailable(
                "connection is missing table `kv_entries`; run migrations first".to_string(),
            ));
        }
        Ok(Self { conn })
    }
}

impl KeyValueRead for SqliteKvStore<'_> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, value
             FROM kv_entries
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key ASC;",
        )?;
        let mut rows = stmt.query([prefix])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push((row.get(0)?, row.get(1)?));
        }
        Ok(entries)
    }
}

impl KeyValueStore for SqliteKvStore<'_> {
    fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(UPSERT_SQL, params![key, value])?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.conn.execute(DELETE_SQL, [key])?;
        Ok(())
    }

    fn apply_batch(&mut self, ops: &[KvOp]) -> StoreResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        for op in ops {
            let result = match op {
                KvOp::Set { key, value } => tx.execute(UPSERT_SQL, params![key, value]),
                KvOp::Delete { key } => tx.execute(DELETE_SQL, [key]),
            };
            if let Err(err) = result {
                error!(
                    "event=kv_batch module=store status=error ops={} error_code=batch_op_failed error={}",
                    ops.len(),
                    err
                );
                // Dropping `tx` rolls back every op applied so far.
                return Err(err.into());
            }
        }
        tx.commit()?;
        Ok(())
    }
}
