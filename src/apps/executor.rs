//! Task execution strategies.
//!
//! The context holds exactly one executor. Live traffic goes through
//! `RealTaskExecutor`; schema derivation swaps in `SchemaExecutor`, which
//! never touches an adapter.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use super::args::Args;
use super::events::{Event, EventHandler};
use super::task::Task;
use crate::adapters::AdapterFactory;
use crate::core::errors::Result;

pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, task: &Arc<Task>, args: Args) -> Result<Value>;
}

/// Dispatches through the task's adapter and reports task events
pub struct RealTaskExecutor {
    events: Arc<EventHandler>,
    adapters: Arc<dyn AdapterFactory>,
}

impl RealTaskExecutor {
    pub fn new(events: Arc<EventHandler>, adapters: Arc<dyn AdapterFactory>) -> Self {
        Self { events, adapters }
    }
}

impl TaskExecutor for RealTaskExecutor {
    fn name(&self) -> &str {
        "real"
    }

    fn execute(&self, task: &Arc<Task>, args: Args) -> Result<Value> {
        let mut event = Event::task(task.id(), args.to_json());
        self.events.task_event(&event);

        let result = task.process(self.adapters.as_ref(), args);
        match &result {
            Ok(output) => {
                event.set_output(output.clone());
            }
            Err(e) => {
                error!("Task {} failed ({}): {}", task.id(), e.category(), e);
                event.set_error(e.to_string());
            }
        }
        self.events.task_event(&event);
        result
    }
}

/// Records call structure and returns the task id as a stand-in result
#[derive(Debug, Default)]
pub struct SchemaExecutor;

impl SchemaExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl TaskExecutor for SchemaExecutor {
    fn name(&self) -> &str {
        "schema"
    }

    fn execute(&self, task: &Arc<Task>, args: Args) -> Result<Value> {
        let sources = args.string_values();
        debug!("Tracing {} from {:?}", task.id(), sources);
        task.called_from(sources);
        Ok(Value::String(task.id().to_string()))
    }
}
