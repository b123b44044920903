use crate::error::{DbError, StoreError};
use async_trait::async_trait;
use mysql_async::{Pool, prelude::*};
use std::{collections::HashMap, io::ErrorKind, path::PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

const LOAD_SELECTOR_SQL: &str =
    "SELECT request_json FROM wiser_data_selector WHERE id = ? AND removed = 0";

/// Source of stored selector JSON, addressed by id.
#[async_trait]
pub trait SelectorStore: Send + Sync {
    async fn load(&self, id: i64) -> Result<String, StoreError>;
}

/// Reads `wiser_data_selector.request_json`.
#[derive(Clone)]
pub struct MySqlSelectorStore {
    pool: Pool,
}

impl MySqlSelectorStore {
    pub fn new(pool: Pool) -> Self {
        MySqlSelectorStore { pool }
    }
}

#[async_trait]
impl SelectorStore for MySqlSelectorStore {
    async fn load(&self, id: i64) -> Result<String, StoreError> {
        let mut conn = self.pool.get_conn().await.map_err(DbError::from)?;
        let json: Option<Option<String>> = conn
            .exec_first(LOAD_SELECTOR_SQL, (id,))
            .await
            .map_err(|source| DbError::Query {
                sql: LOAD_SELECTOR_SQL.to_string(),
                source,
            })?;

        debug!("Loaded stored selector {} from the database", id);
        json.flatten()
            .filter(|raw| !raw.trim().is_empty())
            .ok_or(StoreError::NotFound(id))
    }
}

/// Reads `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileSelectorStore {
    dir: PathBuf,
}

impl FileSelectorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSelectorStore { dir: dir.into() }
    }

    pub fn path_for(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl SelectorStore for FileSelectorStore {
    async fn load(&self, id: i64) -> Result<String, StoreError> {
        let path = self.path_for(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                debug!("Loaded stored selector {} from {}", id, path.display());
                Ok(raw)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySelectorStore {
    selectors: RwLock<HashMap<i64, String>>,
}

impl MemorySelectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selector(mut self, id: i64, json: &str) -> Self {
        self.selectors.get_mut().insert(id, json.to_string());
        self
    }

    pub async fn insert(&self, id: i64, json: &str) {
        self.selectors.write().await.insert(id, json.to_string());
    }
}

#[async_trait]
impl SelectorStore for MemorySelectorStore {
    async fn load(&self, id: i64) -> Result<String, StoreError> {
        self.selectors
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}
