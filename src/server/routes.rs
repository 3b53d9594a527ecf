//! One route per registered app, plus the health check

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, on, MethodFilter},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::events::{events_handler, BroadcastEventSink, EVENTS_PATH};
use super::middleware::require_token;
use crate::apps::Context;
use crate::core::config::ServerConfig;
use crate::core::errors::{PipesError, Result};

pub const HEALTH_MESSAGE: &str = "Smartpipes is up";

#[derive(Clone)]
pub struct ServerState {
    pub ctx: Context,
    pub api_token: Option<Arc<str>>,
    pub events: BroadcastEventSink,
}

/// HTTP-facing error
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    Pipes(PipesError),
    Internal(String),
}

impl From<PipesError> for ApiError {
    fn from(err: PipesError) -> Self {
        Self::Pipes(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "missing or invalid bearer token".to_string(),
            ),
            Self::NotFound(path) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("no app serves {path}"),
            ),
            Self::Pipes(err) if err.is_adapter_failure() => {
                (StatusCode::BAD_GATEWAY, "ADAPTER_ERROR", err.to_string())
            }
            Self::Pipes(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                match err.category() {
                    "configuration" => "CONFIGURATION_ERROR",
                    "task" => "TASK_ERROR",
                    "app" => "APP_ERROR",
                    _ => "INTERNAL_ERROR",
                },
                err.to_string(),
            ),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = json!({
            "error": message,
            "error_code": error_code,
        });
        (status, Json(body)).into_response()
    }
}

/// Build the router for every app registered in `ctx`.
/// Installs a broadcast sink on `ctx` that feeds the event stream.
pub fn create_router(ctx: Context, config: &ServerConfig) -> Result<Router> {
    let events = BroadcastEventSink::default();
    ctx.set_event_sink(Arc::new(events.clone()));
    let state = ServerState {
        ctx: ctx.clone(),
        api_token: config.api_token.as_deref().map(Arc::from),
        events,
    };

    let mut apps: Router<ServerState> = Router::new().route(EVENTS_PATH, get(events_handler));
    let mut seen = HashSet::from([(EVENTS_PATH.to_string(), Method::GET)]);
    for app in ctx.apps() {
        let method = Method::from_bytes(app.method().as_bytes()).map_err(|_| {
            PipesError::configuration_field(
                format!("app {} has invalid method {}", app.id(), app.method()),
                "method",
            )
        })?;
        let filter = MethodFilter::try_from(method.clone()).map_err(|_| {
            PipesError::configuration_field(
                format!("app {} uses unsupported method {}", app.id(), method),
                "method",
            )
        })?;
        if !app.path().starts_with('/') {
            return Err(PipesError::configuration_field(
                format!("app {} path {} must start with '/'", app.id(), app.path()),
                "path",
            ));
        }
        if (app.path() == "/" && method == Method::GET)
            || !seen.insert((app.path().to_string(), method.clone()))
        {
            return Err(PipesError::configuration_field(
                format!("{} {} is already routed", method, app.path()),
                "path",
            ));
        }

        debug!("Routing {} {} to app {}", method, app.path(), app.id());
        let app_id = app.id().to_string();
        apps = apps.route(
            app.path(),
            on(filter, move |State(state): State<ServerState>, body: Bytes| {
                let app_id = app_id.clone();
                async move { invoke_handler(state, app_id, body).await }
            }),
        );
    }

    let apps = apps.route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Ok(Router::<ServerState>::new()
        .route("/", get(health_handler))
        .merge(apps)
        .fallback(not_found_handler)
        .with_state(state))
}

/// GET / - health check
async fn health_handler() -> &'static str {
    HEALTH_MESSAGE
}

async fn not_found_handler(uri: axum::http::Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

async fn invoke_handler(
    state: ServerState,
    app_id: String,
    body: Bytes,
) -> std::result::Result<Json<Value>, ApiError> {
    let input = parse_body(&body);
    let ctx = state.ctx.clone();
    let result = tokio::task::spawn_blocking(move || ctx.invoke_app(&app_id, input))
        .await
        .map_err(|e| ApiError::Internal(format!("app invocation aborted: {e}")))?;
    Ok(Json(json!({ "result": result? })))
}

/// JSON body, `null` when empty, a plain string otherwise
pub fn parse_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(b"  \n"), Value::Null);
        assert_eq!(parse_body(b"\"10\""), json!("10"));
        assert_eq!(parse_body(br#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(parse_body(b"10 degrees"), json!("10 degrees"));
    }

    #[test]
    fn test_error_status_mapping() {
        let adapter = ApiError::from(PipesError::adapter("t", "upstream down")).into_response();
        assert_eq!(adapter.status(), StatusCode::BAD_GATEWAY);

        let task = ApiError::from(PipesError::configuration("bad")).into_response();
        assert_eq!(task.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(ApiError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::NotFound("/x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_invalid_routes_are_configuration_errors() {
        let ctx = Context::new();
        ctx.register_app(crate::apps::AppSpec::new("bad", "nope", |v| Ok(v)))
            .unwrap();
        let err = create_router(ctx, &ServerConfig::default()).unwrap_err();
        assert_eq!(err.category(), "configuration");

        let ctx = Context::new();
        ctx.register_app(
            crate::apps::AppSpec::new("stream", EVENTS_PATH, |v| Ok(v)).with_method("GET"),
        )
        .unwrap();
        let err = create_router(ctx, &ServerConfig::default()).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
