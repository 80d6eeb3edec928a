//! Connection ownership and the user-scoped store handle.

use crate::migration::{configure_connection, run_migrations};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use strata_types::config::MemoryConfig;
use strata_types::error::{StrataError, StrataResult};
use strata_types::source::SourceLookup;
use tracing::info;

/// Owns the SQLite connection and hands out per-user stores.
#[derive(Clone)]
pub struct MemorySubstrate {
    conn: Arc<Mutex<Connection>>,
    config: Arc<MemoryConfig>,
    sources: Option<Arc<dyn SourceLookup>>,
}

impl MemorySubstrate {
    /// Open (or create) the database described by `config` and migrate it.
    pub fn open(config: MemoryConfig) -> StrataResult<Self> {
        let conn = match &config.db_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(path).map_err(|e| StrataError::Memory(e.to_string()))?
            }
            None => Connection::open_in_memory().map_err(|e| StrataError::Memory(e.to_string()))?,
        };
        configure_connection(&conn).map_err(|e| StrataError::Memory(e.to_string()))?;
        run_migrations(&conn).map_err(|e| StrataError::Memory(e.to_string()))?;
        info!(
            path = %config
                .db_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            dimensions = config.embedding_dimensions,
            "Opened memory substrate"
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            sources: None,
        })
    }

    /// Open an in-memory substrate with default settings.
    pub fn open_in_memory() -> StrataResult<Self> {
        Self::open(MemoryConfig::default())
    }

    /// Attach the collaborator used to resolve memory sources.
    pub fn with_source_lookup(mut self, sources: Arc<dyn SourceLookup>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// A store that reads and writes only `user_id`'s memories.
    pub fn for_user(&self, user_id: impl Into<String>) -> UserMemoryStore {
        UserMemoryStore {
            conn: Arc::clone(&self.conn),
            user_id: user_id.into(),
            config: Arc::clone(&self.config),
            sources: self.sources.clone(),
        }
    }
}

/// User-scoped handle over the layered memory tables.
///
/// Every statement issued through this handle filters by its `user_id`, so
/// ids owned by another user behave exactly like ids that do not exist.
/// Operations are grouped by concern across the crate's modules.
#[derive(Clone)]
pub struct UserMemoryStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) user_id: String,
    pub(crate) config: Arc<MemoryConfig>,
    pub(crate) sources: Option<Arc<dyn SourceLookup>>,
}

impl UserMemoryStore {
    /// Wrap an already migrated connection.
    pub fn new(conn: Arc<Mutex<Connection>>, user_id: impl Into<String>, config: MemoryConfig) -> Self {
        Self {
            conn,
            user_id: user_id.into(),
            config: Arc::new(config),
            sources: None,
        }
    }

    /// Attach the collaborator used to resolve memory sources.
    pub fn with_source_lookup(mut self, sources: Arc<dyn SourceLookup>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Owner of every record this store touches.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub(crate) fn lock(&self) -> StrataResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StrataError::Internal(e.to_string()))
    }

    /// Reject vectors whose length differs from the configured dimensionality.
    pub(crate) fn check_vector(&self, field: &str, vector: Option<&[f32]>) -> StrataResult<()> {
        match vector {
            Some(v) if v.len() != self.config.embedding_dimensions => {
                Err(StrataError::InvalidInput(format!(
                    "{field} has {} dimensions, expected {}",
                    v.len(),
                    self.config.embedding_dimensions
                )))
            }
            _ => Ok(()),
        }
    }

    /// Run a blocking closure against a clone of this store on the blocking pool.
    pub(crate) async fn blocking<T, F>(&self, f: F) -> StrataResult<T>
    where
        T: Send + 'static,
        F: FnOnce(UserMemoryStore) -> StrataResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| StrataError::Internal(format!("spawn_blocking join failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let substrate = MemorySubstrate::open_in_memory().unwrap();
        let store = substrate.for_user("user-1");
        assert_eq!(store.user_id(), "user-1");
        let fk: i64 = store
            .lock()
            .unwrap()
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig {
            db_path: Some(dir.path().join("nested").join("memory.db")),
            ..Default::default()
        };
        let substrate = MemorySubstrate::open(config).unwrap();
        assert!(substrate.config().db_path.as_ref().unwrap().exists());
    }

    #[test]
    fn test_check_vector_dimensions() {
        let substrate = MemorySubstrate::open(MemoryConfig::in_memory(3)).unwrap();
        let store = substrate.for_user("u");
        assert!(store.check_vector("v", Some(&[1.0, 2.0, 3.0])).is_ok());
        assert!(store.check_vector("v", None).is_ok());
        let err = store.check_vector("v", Some(&[1.0])).unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }
}
