//! Lifecycle events for app requests and task calls.
//!
//! The `EventHandler` forwards notifications to an optional `EventSink`,
//! typically a live dashboard channel.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    InProgress,
    Completed,
    Error,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    App,
    Task,
}

/// Progress of one app request or task call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// App or task id
    pub id: String,
    pub request_id: Uuid,
    pub kind: EventKind,
    pub status: EventStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    fn new(kind: EventKind, id: &str, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            request_id: Uuid::new_v4(),
            kind,
            status: EventStatus::InProgress,
            input,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn app(app_id: &str, input: Value) -> Self {
        Self::new(EventKind::App, app_id, input)
    }

    pub fn task(task_id: &str, input: Value) -> Self {
        Self::new(EventKind::Task, task_id, input)
    }

    /// Complete the event. Returns false if it had already finished.
    pub fn set_output(&mut self, output: Value) -> bool {
        if self.status.is_terminal() {
            warn!("Event {} already {:?}, output ignored", self.id, self.status);
            return false;
        }
        self.output = Some(output);
        self.status = EventStatus::Completed;
        self.updated_at = Utc::now();
        true
    }

    /// Fail the event. Returns false if it had already finished.
    pub fn set_error(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            warn!("Event {} already {:?}, error ignored", self.id, self.status);
            return false;
        }
        self.error = Some(error.into());
        self.status = EventStatus::Error;
        self.updated_at = Utc::now();
        true
    }
}

/// Summary of a task inside an app, as pushed to sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub model: Option<String>,
}

/// Summary of an app, as pushed to sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSummary {
    pub id: String,
    pub path: String,
    pub method: String,
    pub tasks: Vec<TaskSummary>,
}

/// Payload delivered to an `EventSink`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Notification {
    /// Full app registry after a change
    Apps(Vec<AppSummary>),
    AddRequest(Event),
    UpdateRequest(Event),
    Task(Event),
}

impl Notification {
    /// Value of the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            Notification::Apps(_) => "apps",
            Notification::AddRequest(_) => "add_request",
            Notification::UpdateRequest(_) => "update_request",
            Notification::Task(_) => "task",
        }
    }
}

/// Receiver of notifications
pub trait EventSink: Send + Sync {
    fn emit(&self, notification: &Notification);
}

impl<F> EventSink for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn emit(&self, notification: &Notification) {
        self(notification)
    }
}

/// A buffering event sink that collects notifications
#[derive(Clone, Default)]
pub struct BufferingEventSink {
    events: Arc<RwLock<Vec<Notification>>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_events(&self) -> Vec<Notification> {
        self.events.read().clone()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, notification: &Notification) {
        self.events.write().push(notification.clone());
    }
}

/// Forwards lifecycle notifications to the configured sink
#[derive(Default)]
pub struct EventHandler {
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

impl EventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.sink.write() = None;
    }

    fn emit(&self, notification: Notification) {
        // Clone the sink out so a sink calling back into the handler cannot deadlock
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.emit(&notification);
        }
    }

    pub fn on_change(&self, apps: Vec<AppSummary>) {
        self.emit(Notification::Apps(apps));
    }

    pub fn add_event(&self, event: &Event) {
        self.emit(Notification::AddRequest(event.clone()));
    }

    pub fn update_event(&self, event: &Event) {
        self.emit(Notification::UpdateRequest(event.clone()));
    }

    pub fn task_event(&self, event: &Event) {
        self.emit(Notification::Task(event.clone()));
    }
}
