//! Shared fixtures for unit tests.

use crate::substrate::{MemorySubstrate, UserMemoryStore};
use strata_types::config::MemoryConfig;
use strata_types::params::NewMemory;

/// Vector size used throughout the unit tests.
pub const DIMS: usize = 3;

/// A fresh in-memory store for `user_id`.
pub fn store(user_id: &str) -> UserMemoryStore {
    MemorySubstrate::open(MemoryConfig::in_memory(DIMS))
        .unwrap()
        .for_user(user_id)
}

/// Another user's view of the same database.
pub fn sibling(store: &UserMemoryStore, user_id: &str) -> UserMemoryStore {
    UserMemoryStore::new(store.conn.clone(), user_id, (*store.config).clone())
}

/// A base payload with only a title.
pub fn new_memory(title: &str) -> NewMemory {
    NewMemory {
        title: title.to_string(),
        summary: format!("{title} summary"),
        details: format!("{title} details"),
        ..Default::default()
    }
}
