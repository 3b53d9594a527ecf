// Ambient infrastructure
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod logging;
}

pub mod adapters; // Capability interfaces and live adapters
pub mod apps;     // Task/app registry, dispatch and schema derivation
pub mod server;   // Local HTTP surface

// Re-exports for convenience
pub use adapters::{
    Adapter, AdapterFactory, LiveAdapters, ModelClient, ObjectStore, SledStore, SqlClient,
    SqlConnector,
};
pub use apps::{
    build, derive_schema, AppHandle, AppSpec, Args, BuildOutput, Context, EventSink,
    Notification, Schema, SqlAccess, TaskHandle, TaskSpec, TaskType,
};
pub use core::config::Config;
pub use core::errors::{PipesError, Result};
pub use core::logging::init_logging;
