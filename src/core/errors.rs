use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the smartpipes library
#[derive(Debug, Error)]
pub enum PipesError {
    /// Invalid registration, credentials or project layout
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Failure raised by an external adapter (inference, SQL, storage)
    #[error("Adapter error in task {task_id}: {message}")]
    Adapter {
        task_id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Failure raised by a task's own function
    #[error("Task error: {task_id} - {message}")]
    Task {
        task_id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Failure raised by an app's own function
    #[error("App error: {app_id} - {message}")]
    App {
        app_id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: BoxError,
    },

    #[error("Storage operation failed: {operation}")]
    Storage {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PipesError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an adapter error
    pub fn adapter<S: Into<String>, M: Into<String>>(task_id: S, message: M) -> Self {
        Self::Adapter {
            task_id: task_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an adapter error with source
    pub fn adapter_with_source<S, M, E>(task_id: S, message: M, source: E) -> Self
    where
        S: Into<String>,
        M: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Adapter {
            task_id: task_id.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    pub fn storage<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        operation: S,
        source: E,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Convert a failure returned by a task function.
    ///
    /// A `PipesError` raised further down (a model client, a nested task) is
    /// recovered as-is so it keeps its category.
    pub fn from_task_failure(task_id: &str, err: anyhow::Error) -> Self {
        match err.downcast::<PipesError>() {
            Ok(inner) => inner,
            Err(err) => Self::Task {
                task_id: task_id.to_string(),
                message: err.to_string(),
                source: Some(err.into()),
            },
        }
    }

    /// Convert a failure returned by an app function.
    pub fn from_app_failure(app_id: &str, err: anyhow::Error) -> Self {
        match err.downcast::<PipesError>() {
            Ok(inner) => inner,
            Err(err) => Self::App {
                app_id: app_id.to_string(),
                message: err.to_string(),
                source: Some(err.into()),
            },
        }
    }

    /// Whether this error came from an external adapter
    pub fn is_adapter_failure(&self) -> bool {
        matches!(self, Self::Adapter { .. })
    }

    /// Get error category for logging and HTTP mapping
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Adapter { .. } => "adapter",
            Self::Task { .. } => "task",
            Self::App { .. } => "app",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::Storage { .. } => "storage",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PipesError>;

impl From<std::io::Error> for PipesError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for PipesError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<toml::de::Error> for PipesError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization("toml", err)
    }
}

impl From<sled::Error> for PipesError {
    fn from(err: sled::Error) -> Self {
        Self::storage("sled_operation", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PipesError::configuration("missing sql access");
        assert!(matches!(err, PipesError::Configuration { .. }));
        assert_eq!(err.category(), "configuration");
        assert!(!err.is_adapter_failure());

        let err = PipesError::adapter("bloom-call", "provider returned 500");
        assert!(err.is_adapter_failure());
        assert_eq!(
            err.to_string(),
            "Adapter error in task bloom-call: provider returned 500"
        );
    }

    #[test]
    fn test_task_failure_keeps_inner_category() {
        let inner = PipesError::adapter("gpt", "timeout");
        let err = PipesError::from_task_failure("gpt", anyhow::Error::new(inner));
        assert!(err.is_adapter_failure());

        let err = PipesError::from_task_failure("to_int", anyhow::anyhow!("not a number"));
        match err {
            PipesError::Task { task_id, message, .. } => {
                assert_eq!(task_id, "to_int");
                assert_eq!(message, "not a number");
            }
            other => panic!("Expected task error, got {other:?}"),
        }
    }

    #[test]
    fn test_app_failure_wraps_plain_errors() {
        let err = PipesError::from_app_failure("convert", anyhow::anyhow!("boom"));
        assert_eq!(err.category(), "app");
    }
}
