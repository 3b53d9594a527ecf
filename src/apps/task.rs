//! Task entity and type/model dispatch.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::args::{Arg, Args};
use super::context::{Context, ContextInner};
use crate::adapters::{Adapter, AdapterFactory};
use crate::core::errors::{PipesError, Result};

/// Function wrapped by a task
pub type TaskFn = Arc<dyn Fn(Args) -> anyhow::Result<Value> + Send + Sync>;

/// Declared structural category of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Compute,
    Inference,
    Sql,
    #[serde(rename = "vectordb")]
    VectorDb,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Compute => "compute",
            TaskType::Inference => "inference",
            TaskType::Sql => "sql",
            TaskType::VectorDb => "vectordb",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = PipesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compute" => Ok(TaskType::Compute),
            "inference" => Ok(TaskType::Inference),
            "sql" => Ok(TaskType::Sql),
            "vectordb" => Ok(TaskType::VectorDb),
            other => Err(PipesError::configuration_field(
                format!("unknown task type '{other}'"),
                "type",
            )),
        }
    }
}

/// Model hint of an inference task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Model {
    Bloom,
    Gpt35,
    Gpt3,
    StableDiffusion,
    /// Any other name, served by the generic external-model adapter
    External(String),
}

impl Model {
    /// Parse a model name; empty names mean "no model"
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "" => None,
            "bloom" => Some(Model::Bloom),
            "gpt-3.5" => Some(Model::Gpt35),
            "gpt-3" => Some(Model::Gpt3),
            "stable-diffusion" => Some(Model::StableDiffusion),
            other => Some(Model::External(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Model::Bloom => "bloom",
            Model::Gpt35 => "gpt-3.5",
            Model::Gpt3 => "gpt-3",
            Model::StableDiffusion => "stable-diffusion",
            Model::External(name) => name,
        }
    }
}

/// Dispatch decision derived from a task's type and model.
///
/// Precedence: sql, then vectordb, then any model, then plain compute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Sql,
    VectorStore,
    Inference(Model),
    Compute,
}

/// Credentials for sql tasks
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlAccess {
    pub username: String,
    pub password: String,
    pub database: String,
    pub port: u16,
}

impl SqlAccess {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            database: database.into(),
            port,
        }
    }
}

impl fmt::Debug for SqlAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlAccess")
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("port", &self.port)
            .finish()
    }
}

/// Declaration of a task, consumed by `Context::register_task`
pub struct TaskSpec {
    name: String,
    id: Option<String>,
    task_type: TaskType,
    model: Option<String>,
    sql_access: Option<SqlAccess>,
    func: TaskFn,
}

impl TaskSpec {
    pub fn new<F>(name: impl Into<String>, task_type: TaskType, func: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            id: None,
            task_type,
            model: None,
            sql_access: None,
            func: Arc::new(func),
        }
    }

    pub fn compute<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, TaskType::Compute, func)
    }

    pub fn inference<F>(name: impl Into<String>, model: impl Into<String>, func: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, TaskType::Inference, func).with_model(model)
    }

    pub fn sql<F>(name: impl Into<String>, access: SqlAccess, func: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, TaskType::Sql, func).with_sql(access)
    }

    pub fn vectordb<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, TaskType::VectorDb, func)
    }

    /// Override the id, which otherwise defaults to the name
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sql(mut self, access: SqlAccess) -> Self {
        self.sql_access = Some(access);
        self
    }
}

/// A registered unit of work
pub struct Task {
    id: String,
    name: String,
    task_type: TaskType,
    model: Option<String>,
    sql_access: Option<SqlAccess>,
    func: TaskFn,
    sources: Mutex<Vec<String>>,
    sql: Mutex<Option<Arc<dyn Adapter>>>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: spec.id.unwrap_or_else(|| spec.name.clone()),
            name: spec.name,
            task_type: spec.task_type,
            model: spec.model,
            sql_access: spec.sql_access,
            func: spec.func,
            sources: Mutex::new(Vec::new()),
            sql: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn sql_access(&self) -> Option<&SqlAccess> {
        self.sql_access.as_ref()
    }

    pub fn route(&self) -> Route {
        match self.task_type {
            TaskType::Sql => Route::Sql,
            TaskType::VectorDb => Route::VectorStore,
            TaskType::Compute | TaskType::Inference => {
                match self.model.as_deref().and_then(Model::parse) {
                    Some(model) => Route::Inference(model),
                    None => Route::Compute,
                }
            }
        }
    }

    /// Dispatch a call according to `route()`
    pub fn process(&self, adapters: &dyn AdapterFactory, mut args: Args) -> Result<Value> {
        info!("Task type '{}' Model ID {:?}", self.task_type, self.model);

        match self.route() {
            Route::Sql => {
                let access = self.sql_access.as_ref().ok_or_else(|| {
                    PipesError::configuration_field(
                        format!("task {} of type sql has no sql access", self.id),
                        "sql_access",
                    )
                })?;
                let adapter = {
                    let mut slot = self.sql.lock();
                    match slot.as_ref() {
                        Some(adapter) => adapter.clone(),
                        None => {
                            let adapter = adapters.sql(self.func.clone(), &self.id, access)?;
                            *slot = Some(adapter.clone());
                            adapter
                        }
                    }
                };
                adapter.process(args)
            }
            Route::VectorStore => {
                debug!("Accessing vector store for task {}", self.id);
                args.push(Arg::Store(adapters.store()?));
                self.call_direct(args)
            }
            Route::Inference(model) => {
                let adapter = adapters.inference(self.func.clone(), &self.id, &model)?;
                adapter.process(args)
            }
            Route::Compute => {
                debug!("Compute task {}", self.id);
                self.call_direct(args)
            }
        }
    }

    fn call_direct(&self, args: Args) -> Result<Value> {
        (self.func)(args).map_err(|e| PipesError::from_task_failure(&self.id, e))
    }

    /// Record upstream ids feeding this task, keeping first-seen order
    pub fn called_from<I, S>(&self, sources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = self.sources.lock();
        for source in sources {
            let source = source.into();
            if !current.contains(&source) {
                current.push(source);
            }
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }

    pub(crate) fn clear_sources(&self) {
        self.sources.lock().clear();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.task_type)
            .field("model", &self.model)
            .field("sql_access", &self.sql_access)
            .finish()
    }
}

/// Invocation handle returned by `Context::register_task`
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<Task>,
    context: Weak<ContextInner>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>, context: Weak<ContextInner>) -> Self {
        Self { task, context }
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn id(&self) -> &str {
        self.task.id()
    }

    /// Invoke the task through the context's installed executor
    pub fn call(&self, args: impl Into<Args>) -> Result<Value> {
        let inner = self.context.upgrade().ok_or_else(|| {
            PipesError::internal(format!("context of task {} was dropped", self.task.id()))
        })?;
        let context = Context::from_inner(inner);
        context.assign_to_active_app(&self.task);
        context.executor().execute(&self.task, args.into())
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.task.id()).finish()
    }
}
