//! Task and app registration, dispatch and schema derivation.

pub mod app;
pub mod args;
pub mod build;
pub mod context;
pub mod events;
pub mod executor;
pub mod task;

pub use app::{App, AppFn, AppHandle, AppSpec, PLACEHOLDER_APP_ID};
pub use args::{Arg, Args};
pub use build::{build, derive_schema, persist_schema, validate_project, BuildOutput, ProjectConfig, Schema};
pub use context::Context;
pub use events::{
    AppSummary, BufferingEventSink, Event, EventHandler, EventKind, EventSink, EventStatus,
    Notification, TaskSummary,
};
pub use executor::{RealTaskExecutor, SchemaExecutor, TaskExecutor};
pub use task::{Model, Route, SqlAccess, Task, TaskFn, TaskHandle, TaskSpec, TaskType};
