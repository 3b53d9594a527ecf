use serde_json::Value;
use tracing::info;

use super::{Adapter, SqlHandle};
use crate::apps::args::{Arg, Args};
use crate::apps::task::{SqlAccess, TaskFn};
use crate::core::errors::{PipesError, Result};

/// Opens SQL clients from task credentials
pub trait SqlConnector: Send + Sync {
    fn connect(&self, access: &SqlAccess) -> Result<SqlHandle>;
}

impl<F> SqlConnector for F
where
    F: Fn(&SqlAccess) -> Result<SqlHandle> + Send + Sync,
{
    fn connect(&self, access: &SqlAccess) -> Result<SqlHandle> {
        self(access)
    }
}

/// Calls the task function with a SQL client appended to its arguments
pub struct SqlAdapter {
    func: TaskFn,
    task_id: String,
    client: SqlHandle,
}

impl SqlAdapter {
    pub fn new(func: TaskFn, task_id: &str, client: SqlHandle) -> Self {
        Self {
            func,
            task_id: task_id.to_string(),
            client,
        }
    }
}

impl Adapter for SqlAdapter {
    fn process(&self, mut args: Args) -> Result<Value> {
        info!("SQL task {}", self.task_id);
        args.push(Arg::Sql(self.client.clone()));
        (self.func)(args).map_err(|e| PipesError::from_task_failure(&self.task_id, e))
    }
}
