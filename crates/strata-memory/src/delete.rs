//! Deletion of layer entries and base records.
//!
//! Detail rows are never deleted on their own: removing an experience,
//! identity or preference entry deletes its base record and the foreign key
//! cascade takes the row with it. Context rows are pruned by trigger.

use crate::codec::id_list;
use crate::detail::linked_ids;
use crate::substrate::UserMemoryStore;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::Layer;
use tracing::info;

impl UserMemoryStore {
    fn remove_entry(&self, layer: Layer, id: &str) -> StrataResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        let Some(memory_ids) = linked_ids(&tx, &self.user_id, layer, id)? else {
            return Ok(false);
        };

        let removed = tx
            .execute(
                "DELETE FROM user_memories WHERE user_id = ?1 AND id IN (SELECT value FROM json_each(?2))",
                rusqlite::params![self.user_id, id_list(&memory_ids)?],
            )
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        if layer == Layer::Context {
            tx.execute(
                "DELETE FROM user_memories_contexts WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, self.user_id],
            )
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| StrataError::Memory(e.to_string()))?;

        info!(user_id = %self.user_id, layer = %layer, id, removed, "Removed memory entry");
        Ok(true)
    }

    /// Delete a context entry and every base record it lists.
    pub fn remove_context_entry(&self, id: &str) -> StrataResult<bool> {
        self.remove_entry(Layer::Context, id)
    }

    /// Delete an experience entry through its base record.
    pub fn remove_experience_entry(&self, id: &str) -> StrataResult<bool> {
        self.remove_entry(Layer::Experience, id)
    }

    /// Delete an identity entry through its base record.
    pub fn remove_identity_entry(&self, id: &str) -> StrataResult<bool> {
        self.remove_entry(Layer::Identity, id)
    }

    /// Delete a preference entry through its base record.
    pub fn remove_preference_entry(&self, id: &str) -> StrataResult<bool> {
        self.remove_entry(Layer::Preference, id)
    }

    /// Delete one base record; its detail rows go with it.
    pub fn delete(&self, id: &str) -> StrataResult<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM user_memories WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, self.user_id],
            )
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        if removed > 0 {
            info!(user_id = %self.user_id, id, "Deleted memory");
        }
        Ok(removed > 0)
    }

    /// Delete every memory owned by this user. Returns the number of base
    /// records removed.
    pub fn delete_all(&self) -> StrataResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        let removed = tx
            .execute("DELETE FROM user_memories WHERE user_id = ?1", [&self.user_id])
            .map_err(|e| StrataError::Memory(e.to_string()))?;
        // Contexts with an empty id list are not reached by the trigger.
        tx.execute(
            "DELETE FROM user_memories_contexts WHERE user_id = ?1",
            [&self.user_id],
        )
        .map_err(|e| StrataError::Memory(e.to_string()))?;
        tx.commit()
            .map_err(|e| StrataError::Memory(e.to_string()))?;

        info!(user_id = %self.user_id, removed, "Deleted all memories");
        Ok(removed)
    }
}
