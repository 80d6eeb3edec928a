//! Read tracking: access counters and timestamps across the base and detail tables.

use crate::codec::{id_list, now, ts};
use crate::substrate::UserMemoryStore;
use rusqlite::Connection;
use strata_types::error::{StrataError, StrataResult};
use tracing::debug;

impl UserMemoryStore {
    /// Record one access for each base record in `memory_ids` and stamp the
    /// given context rows.
    ///
    /// Each id is counted once per call even if it appears several times.
    /// No-op when both lists are empty.
    pub fn update_access_metrics(
        &self,
        memory_ids: &[String],
        context_ids: &[String],
    ) -> StrataResult<()> {
        if memory_ids.is_empty() && context_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        touch(&mut conn, &self.user_id, memory_ids, context_ids)
    }
}

/// The access-metrics cascade, on an already locked connection.
pub(crate) fn touch(
    conn: &mut Connection,
    user_id: &str,
    memory_ids: &[String],
    context_ids: &[String],
) -> StrataResult<()> {
    if memory_ids.is_empty() && context_ids.is_empty() {
        return Ok(());
    }
    let now = ts(&now());
    let memory_list = id_list(memory_ids)?;
    let context_list = id_list(context_ids)?;

    let tx = conn
        .transaction()
        .map_err(|e| StrataError::Memory(e.to_string()))?;

    if !memory_ids.is_empty() {
        // `IN` matches each row once, so repeated ids are not double counted.
        tx.execute(
            "UPDATE user_memories
                SET accessed_at = ?1, last_accessed_at = ?1, accessed_count = accessed_count + 1
              WHERE user_id = ?2 AND id IN (SELECT value FROM json_each(?3))",
            rusqlite::params![now, user_id, memory_list],
        )
        .map_err(|e| StrataError::Memory(e.to_string()))?;

        for (table, layer) in [
            ("user_memories_experiences", "experience"),
            ("user_memories_identities", "identity"),
            ("user_memories_preferences", "preference"),
        ] {
            tx.execute(
                &format!(
                    "UPDATE {table} SET accessed_at = ?1
                      WHERE user_id = ?2
                        AND user_memory_id IN (
                            SELECT id FROM user_memories
                             WHERE user_id = ?2 AND memory_layer = ?4
                               AND id IN (SELECT value FROM json_each(?3)))"
                ),
                rusqlite::params![now, user_id, memory_list, layer],
            )
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        }

        tx.execute(
            "UPDATE user_memories_contexts SET accessed_at = ?1
              WHERE user_id = ?2
                AND EXISTS (
                    SELECT 1 FROM json_each(user_memories_contexts.user_memory_ids) j
                      JOIN user_memories m ON m.id = j.value
                     WHERE m.user_id = ?2 AND m.memory_layer = 'context'
                       AND m.id IN (SELECT value FROM json_each(?3)))",
            rusqlite::params![now, user_id, memory_list],
        )
        .map_err(|e| StrataError::Memory(e.to_string()))?;
    }

    if !context_ids.is_empty() {
        tx.execute(
            "UPDATE user_memories_contexts SET accessed_at = ?1
              WHERE user_id = ?2 AND id IN (SELECT value FROM json_each(?3))",
            rusqlite::params![now, user_id, context_list],
        )
        .map_err(|e| StrataError::Memory(e.to_string()))?;
    }

    tx.commit()
        .map_err(|e| StrataError::Memory(e.to_string()))?;

    debug!(
        user_id,
        memories = memory_ids.len(),
        contexts = context_ids.len(),
        "Updated access metrics"
    );
    Ok(())
}
