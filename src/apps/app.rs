//! App entity: an HTTP entry point composing tasks.

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

use super::context::{Context, ContextInner};
use super::events::{AppSummary, TaskSummary};
use super::task::Task;
use crate::core::errors::{PipesError, Result};

/// Function wrapped by an app
pub type AppFn = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// Reserved id of the placeholder app replaced by the first real registration
pub const PLACEHOLDER_APP_ID: &str = "temporal";

pub const DEFAULT_METHOD: &str = "POST";

/// Declaration of an app, consumed by `Context::register_app`
pub struct AppSpec {
    id: String,
    path: String,
    method: String,
    parameters: Option<Vec<String>>,
    func: AppFn,
}

impl AppSpec {
    pub fn new<F>(id: impl Into<String>, path: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            path: path.into(),
            method: DEFAULT_METHOD.to_string(),
            parameters: None,
            func: Arc::new(func),
        }
    }

    pub fn with_method(mut self, method: impl AsRef<str>) -> Self {
        self.method = method.as_ref().trim().to_ascii_uppercase();
        self
    }

    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = Some(parameters.into_iter().map(Into::into).collect());
        self
    }
}

pub struct App {
    id: String,
    path: String,
    method: String,
    parameters: Option<Vec<String>>,
    func: AppFn,
    tasks: Mutex<Vec<Arc<Task>>>,
    return_source: Mutex<Option<Value>>,
}

impl App {
    pub fn from_spec(spec: AppSpec) -> Self {
        Self {
            id: spec.id,
            path: spec.path,
            method: spec.method,
            parameters: spec.parameters,
            func: spec.func,
            tasks: Mutex::new(Vec::new()),
            return_source: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn parameters(&self) -> Option<&[String]> {
        self.parameters.as_deref()
    }

    /// Tasks invoked while this app was active, in first-call order
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.lock().clone()
    }

    /// Append `task` unless a task with the same id is already listed
    pub fn add_task(&self, task: &Arc<Task>) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.iter().any(|t| t.id() == task.id()) {
            return false;
        }
        tasks.push(task.clone());
        true
    }

    pub fn return_source(&self) -> Option<Value> {
        self.return_source.lock().clone()
    }

    pub(crate) fn set_return_source(&self, value: Value) {
        *self.return_source.lock() = Some(value);
    }

    /// Forget traced structure so a new build starts clean
    pub(crate) fn reset_trace(&self) {
        self.tasks.lock().clear();
        *self.return_source.lock() = None;
    }

    pub(crate) fn call(&self, input: Value) -> Result<Value> {
        (self.func)(input).map_err(|e| PipesError::from_app_failure(&self.id, e))
    }

    pub fn summary(&self) -> AppSummary {
        AppSummary {
            id: self.id.clone(),
            path: self.path.clone(),
            method: self.method.clone(),
            tasks: self
                .tasks()
                .iter()
                .map(|t| TaskSummary {
                    id: t.id().to_string(),
                    task_type: t.task_type().to_string(),
                    model: t.model().map(str::to_string),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Invocation handle returned by `Context::register_app`
#[derive(Clone)]
pub struct AppHandle {
    app: Arc<App>,
    context: Weak<ContextInner>,
}

impl AppHandle {
    pub(crate) fn new(app: Arc<App>, context: Weak<ContextInner>) -> Self {
        Self { app, context }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub fn id(&self) -> &str {
        self.app.id()
    }

    /// Run the app with the context's request bookkeeping
    pub fn invoke(&self, input: impl Into<Value>) -> Result<Value> {
        let inner = self.context.upgrade().ok_or_else(|| {
            PipesError::internal(format!("context of app {} was dropped", self.app.id()))
        })?;
        Context::from_inner(inner).run_app(&self.app, input.into())
    }
}

impl fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AppHandle").field(&self.app.id()).finish()
    }
}
