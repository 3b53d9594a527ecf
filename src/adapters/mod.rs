//! Adapter capability interfaces and the live implementations.
//!
//! The core only talks to the traits declared here. `LiveAdapters` is the
//! default factory: HTTP model clients for inference, a pluggable SQL
//! connector, and a sled-backed object store for vectordb tasks.

pub mod inference;
pub mod sql;
pub mod store;

pub use inference::{HttpModelClient, InferenceAdapter, Provider};
pub use sql::{SqlAdapter, SqlConnector};
pub use store::{SledStore, StoredObject};

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::apps::args::Args;
use crate::apps::task::{Model, SqlAccess, TaskFn};
use crate::core::config::Config;
use crate::core::errors::{PipesError, Result};

/// Wraps a task function and performs the external call
pub trait Adapter: Send + Sync {
    fn process(&self, args: Args) -> Result<Value>;
}

/// Builds adapters for the dispatch branches that need one
pub trait AdapterFactory: Send + Sync {
    /// Called once per sql task; the adapter is reused afterwards
    fn sql(&self, func: TaskFn, task_id: &str, access: &SqlAccess) -> Result<Arc<dyn Adapter>>;

    /// Called on every inference dispatch
    fn inference(&self, func: TaskFn, task_id: &str, model: &Model) -> Result<Box<dyn Adapter>>;

    /// Store handle appended to vectordb task calls
    fn store(&self) -> Result<StoreHandle>;
}

/// Client handed to inference task functions
pub trait ModelClient: Send + Sync {
    fn model(&self) -> &str;
    fn call(&self, payload: Value) -> Result<Value>;
}

/// Client handed to sql task functions
pub trait SqlClient: Send + Sync {
    fn execute(&self, statement: &str, params: &[Value]) -> Result<u64>;
    fn fetch_all(&self, query: &str, params: &[Value]) -> Result<Vec<Value>>;
}

/// Blob storage handed to vectordb task functions
pub trait ObjectStore: Send + Sync {
    fn save(&self, key: &str, blob: &[u8]) -> Result<()>;
    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Objects whose key starts with `prefix` and whose content contains `query`
    fn query(&self, prefix: &str, query: &str) -> Result<Vec<StoredObject>>;
}

pub type ModelHandle = Arc<dyn ModelClient>;
pub type SqlHandle = Arc<dyn SqlClient>;
pub type StoreHandle = Arc<dyn ObjectStore>;

/// Default adapter factory
pub struct LiveAdapters {
    config: Config,
    sql_connector: Option<Arc<dyn SqlConnector>>,
    store: Mutex<Option<StoreHandle>>,
}

impl LiveAdapters {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sql_connector: None,
            store: Mutex::new(None),
        }
    }

    /// Use `connector` to open SQL clients for sql tasks
    pub fn with_sql_connector(mut self, connector: Arc<dyn SqlConnector>) -> Self {
        self.sql_connector = Some(connector);
        self
    }

    /// Hand out `store` instead of opening the configured sled database
    pub fn with_store(self, store: StoreHandle) -> Self {
        *self.store.lock() = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Default for LiveAdapters {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl AdapterFactory for LiveAdapters {
    fn sql(&self, func: TaskFn, task_id: &str, access: &SqlAccess) -> Result<Arc<dyn Adapter>> {
        let connector = self.sql_connector.as_ref().ok_or_else(|| {
            PipesError::adapter(task_id, "no SQL connector configured for sql tasks")
        })?;
        let client = connector.connect(access)?;
        debug!("SQL adapter ready for task {} (database {})", task_id, access.database);
        Ok(Arc::new(SqlAdapter::new(func, task_id, client)))
    }

    fn inference(&self, func: TaskFn, task_id: &str, model: &Model) -> Result<Box<dyn Adapter>> {
        let client = HttpModelClient::for_model(&self.config, task_id, model)?;
        Ok(Box::new(InferenceAdapter::new(func, task_id, Arc::new(client))))
    }

    fn store(&self) -> Result<StoreHandle> {
        let mut slot = self.store.lock();
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }
        let store: StoreHandle = Arc::new(SledStore::open(&self.config.store_path)?);
        *slot = Some(store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_without_connector_is_adapter_error() {
        let adapters = LiveAdapters::default();
        let func: TaskFn = Arc::new(|_args: Args| Ok(Value::Null));
        let access = SqlAccess::new("user", "pw", "db", 5432);
        let err = match adapters.sql(func, "query", &access) {
            Ok(_) => panic!("expected failure without connector"),
            Err(err) => err,
        };
        assert!(err.is_adapter_failure());
    }

    #[test]
    fn test_store_handle_is_shared() {
        let store: StoreHandle = Arc::new(SledStore::temporary().unwrap());
        let adapters = LiveAdapters::default().with_store(store);
        let first = adapters.store().unwrap();
        first.save("docs/a", b"hello").unwrap();
        let second = adapters.store().unwrap();
        assert_eq!(second.fetch("docs/a").unwrap(), Some(b"hello".to_vec()));
        assert!(Arc::ptr_eq(&first, &second));
    }
}
