//! Registry of apps and tasks, active-app tracking and executor swapping.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::app::{App, AppHandle, AppSpec, PLACEHOLDER_APP_ID};
use super::events::{AppSummary, Event, EventHandler, EventSink};
use super::executor::{RealTaskExecutor, TaskExecutor};
use super::task::{Task, TaskHandle, TaskSpec};
use crate::adapters::{AdapterFactory, LiveAdapters};
use crate::core::config::Config;
use crate::core::errors::{PipesError, Result};

lazy_static::lazy_static! {
    static ref GLOBAL_CONTEXT: Context = Context::new();
}

thread_local! {
    // Apps whose function is running on this thread, innermost last, tagged by context
    static CALL_STACK: RefCell<Vec<(usize, Arc<App>)>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct ContextInner {
    apps: RwLock<Vec<Arc<App>>>,
    tasks: RwLock<Vec<Arc<Task>>>,
    active_app: Mutex<Option<usize>>,
    executor: RwLock<Arc<dyn TaskExecutor>>,
    events: Arc<EventHandler>,
    adapters: Arc<dyn AdapterFactory>,
}

/// Shared registry handle; clones point at the same registry
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Context with live adapters built from the default configuration
    pub fn new() -> Self {
        Self::with_adapters(Arc::new(LiveAdapters::default()))
    }

    pub fn from_config(config: Config) -> Self {
        Self::with_adapters(Arc::new(LiveAdapters::new(config)))
    }

    pub fn with_adapters(adapters: Arc<dyn AdapterFactory>) -> Self {
        let events = Arc::new(EventHandler::new());
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(RealTaskExecutor::new(events.clone(), adapters.clone()));
        Self {
            inner: Arc::new(ContextInner {
                apps: RwLock::new(Vec::new()),
                tasks: RwLock::new(Vec::new()),
                active_app: Mutex::new(None),
                executor: RwLock::new(executor),
                events,
                adapters,
            }),
        }
    }

    /// Process-wide context, created on first use
    pub fn global() -> Context {
        GLOBAL_CONTEXT.clone()
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    /// Register an app. A lone placeholder app is replaced instead of kept.
    pub fn add_app(&self, app: Arc<App>) -> Result<()> {
        {
            let mut apps = self.inner.apps.write();
            let index = if apps.len() == 1 && apps[0].id() == PLACEHOLDER_APP_ID {
                debug!("Replacing placeholder app with {}", app.id());
                apps[0] = app.clone();
                0
            } else {
                if apps.iter().any(|a| a.id() == app.id()) {
                    return Err(PipesError::configuration_field(
                        format!("app '{}' is already registered", app.id()),
                        "id",
                    ));
                }
                apps.push(app.clone());
                apps.len() - 1
            };
            *self.inner.active_app.lock() = Some(index);
        }
        info!("Registered app {} at {} {}", app.id(), app.method(), app.path());
        self.notify_apps();
        Ok(())
    }

    pub fn add_task(&self, task: Arc<Task>) {
        debug!("Registered task {} ({})", task.id(), task.task_type());
        self.inner.tasks.write().push(task);
    }

    pub fn register_task(&self, spec: TaskSpec) -> TaskHandle {
        let task = Arc::new(Task::from_spec(spec));
        self.add_task(task.clone());
        TaskHandle::new(task, Arc::downgrade(&self.inner))
    }

    pub fn register_app(&self, spec: AppSpec) -> Result<AppHandle> {
        let app = Arc::new(App::from_spec(spec));
        self.add_app(app.clone())?;
        Ok(AppHandle::new(app, Arc::downgrade(&self.inner)))
    }

    /// Attach `task` to the app running on this thread, else the registration-time active app
    pub fn assign_to_active_app(&self, task: &Arc<Task>) {
        let Some(app) = self.active_app() else {
            warn!("Task {} called outside of any app", task.id());
            return;
        };
        if app.add_task(task) {
            debug!("Task {} assigned to app {}", task.id(), app.id());
            self.notify_apps();
        }
    }

    pub fn get_task(&self, id: &str) -> Option<Arc<Task>> {
        self.inner.tasks.read().iter().find(|t| t.id() == id).cloned()
    }

    pub fn get_app(&self, id: &str) -> Option<Arc<App>> {
        self.inner.apps.read().iter().find(|a| a.id() == id).cloned()
    }

    pub fn apps(&self) -> Vec<Arc<App>> {
        self.inner.apps.read().clone()
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.inner.tasks.read().clone()
    }

    /// Mark the app with `id` active. Returns false if no such app exists.
    pub fn activate_app(&self, id: &str) -> bool {
        let index = self.inner.apps.read().iter().position(|a| a.id() == id);
        match index {
            Some(index) => {
                *self.inner.active_app.lock() = Some(index);
                true
            }
            None => false,
        }
    }

    pub fn clear_active_app(&self) {
        *self.inner.active_app.lock() = None;
    }

    /// App whose function is running on the calling thread, falling back to
    /// the app marked active by registration or `activate_app`
    pub fn active_app(&self) -> Option<Arc<App>> {
        if let Some(app) = self.calling_app() {
            return Some(app);
        }
        let index = (*self.inner.active_app.lock())?;
        self.inner.apps.read().get(index).cloned()
    }

    fn calling_app(&self) -> Option<Arc<App>> {
        let context_id = self.id();
        CALL_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|(id, _)| *id == context_id)
                .map(|(_, app)| app.clone())
        })
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Run `operation` with `app` active on the calling thread only.
    /// Concurrent requests on other threads never see it.
    fn with_app<R>(&self, app: &Arc<App>, operation: impl FnOnce() -> R) -> R {
        let _scope = AppScope::enter(self.id(), app);
        operation()
    }

    pub fn set_executor(&self, executor: Arc<dyn TaskExecutor>) {
        debug!("Installing {} executor", executor.name());
        *self.inner.executor.write() = executor;
    }

    pub fn executor(&self) -> Arc<dyn TaskExecutor> {
        self.inner.executor.read().clone()
    }

    /// Fresh live executor sharing this context's events and adapters
    pub fn live_executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::new(RealTaskExecutor::new(
            self.inner.events.clone(),
            self.inner.adapters.clone(),
        ))
    }

    pub fn event_handler(&self) -> &Arc<EventHandler> {
        &self.inner.events
    }

    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.events.set_sink(sink);
    }

    pub fn adapters(&self) -> &Arc<dyn AdapterFactory> {
        &self.inner.adapters
    }

    /// Run the app registered under `id`
    pub fn invoke_app(&self, id: &str, input: Value) -> Result<Value> {
        let app = self.get_app(id).ok_or_else(|| {
            PipesError::configuration_field(format!("unknown app '{id}'"), "id")
        })?;
        self.run_app(&app, input)
    }

    /// Run `app` with a request event around the call
    pub fn run_app(&self, app: &Arc<App>, input: Value) -> Result<Value> {
        let mut event = Event::app(app.id(), input.clone());
        self.inner.events.add_event(&event);

        let result = self.with_app(app, || app.call(input));

        match &result {
            Ok(output) => {
                event.set_output(output.clone());
            }
            Err(e) => {
                error!("App {} failed ({}): {}", app.id(), e.category(), e);
                event.set_error(e.to_string());
            }
        }
        self.inner.events.update_event(&event);
        result
    }

    /// Call `app` as the active app without request bookkeeping
    pub(crate) fn trace_app(&self, app: &Arc<App>, input: Value) -> Result<Value> {
        self.with_app(app, || app.call(input))
    }

    pub fn app_summaries(&self) -> Vec<AppSummary> {
        self.apps().iter().map(|a| a.summary()).collect()
    }

    pub fn apps_json(&self) -> Value {
        serde_json::to_value(self.app_summaries()).unwrap_or(Value::Null)
    }

    fn notify_apps(&self) {
        self.inner.events.on_change(self.app_summaries());
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("apps", &self.inner.apps.read().len())
            .field("tasks", &self.inner.tasks.read().len())
            .field("active_app", &*self.inner.active_app.lock())
            .field("executor", &self.executor().name())
            .finish()
    }
}

/// Pops the calling thread's app scope on drop
struct AppScope {
    context_id: usize,
}

impl AppScope {
    fn enter(context_id: usize, app: &Arc<App>) -> Self {
        CALL_STACK.with(|stack| stack.borrow_mut().push((context_id, app.clone())));
        Self { context_id }
    }
}

impl Drop for AppScope {
    fn drop(&mut self) {
        CALL_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|(id, _)| *id == self.context_id) {
                stack.remove(pos);
            }
        });
    }
}
