//! Schema derivation and the `build/schema.json` artifact.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::app::App;
use super::context::Context;
use super::executor::SchemaExecutor;
use crate::core::errors::{PipesError, Result};

/// Input every app receives while being traced
pub const ENTRY_POINT: &str = "entry_point";
/// Key of the returned value inside an app's io map
pub const RETURNS_KEY: &str = "returns";
pub const PROJECT_FILE: &str = "Cargo.toml";
pub const BUILD_DIR: &str = "build";
pub const SCHEMA_FILE: &str = "schema.json";

/// Project identity read from the manifest's `[package.metadata.smartpipes]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub main: String,
}

#[derive(Deserialize)]
struct Manifest {
    package: Option<Package>,
}

#[derive(Deserialize)]
struct Package {
    name: Option<String>,
    metadata: Option<Metadata>,
}

#[derive(Deserialize)]
struct Metadata {
    smartpipes: Option<SmartpipesMetadata>,
}

#[derive(Deserialize)]
struct SmartpipesMetadata {
    main: Option<String>,
}

/// Check the project marker and source directory under `root`
pub fn validate_project(root: &Path) -> Result<ProjectConfig> {
    let manifest_path = root.join(PROJECT_FILE);
    if !manifest_path.is_file() {
        return Err(PipesError::configuration(format!(
            "no {} found in {}",
            PROJECT_FILE,
            root.display()
        )));
    }
    let raw = std::fs::read_to_string(&manifest_path)
        .map_err(|e| PipesError::io("read project manifest", e))?;
    let manifest: Manifest = toml::from_str(&raw)?;

    let package = manifest.package.ok_or_else(|| {
        PipesError::configuration_field("project manifest has no [package] table", "package")
    })?;
    let name = package
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| PipesError::configuration_field("project has no name", "package.name"))?;
    let main = package
        .metadata
        .and_then(|m| m.smartpipes)
        .and_then(|s| s.main)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| {
            PipesError::configuration_field(
                "project declares no entry module",
                "package.metadata.smartpipes.main",
            )
        })?;

    if !root.join("src").is_dir() {
        return Err(PipesError::configuration(format!(
            "source directory {} does not exist",
            root.join("src").display()
        )));
    }

    Ok(ProjectConfig { name, main })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSchema {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub model: Option<String>,
}

/// Which tasks each source feeds, in first-seen order, plus the shape the app returned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Io {
    #[serde(flatten)]
    pub sources: IndexMap<String, Vec<String>>,
    pub returns: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSchema {
    pub id: String,
    pub entry_point: EntryPoint,
    pub tasks: Vec<TaskSchema>,
    pub io: Io,
}

impl AppSchema {
    fn from_app(app: &App) -> Result<Self> {
        let tasks = app.tasks();
        let mut io = Io {
            returns: app.return_source().unwrap_or(Value::Null),
            ..Io::default()
        };
        for task in &tasks {
            for source in task.sources() {
                if source == RETURNS_KEY {
                    return Err(PipesError::configuration_field(
                        format!(
                            "app {} feeds task {} from a source named '{RETURNS_KEY}', which collides with its return value",
                            app.id(),
                            task.id()
                        ),
                        "id",
                    ));
                }
                let fed = io.sources.entry(source).or_default();
                if !fed.iter().any(|id| id == task.id()) {
                    fed.push(task.id().to_string());
                }
            }
        }

        Ok(Self {
            id: app.id().to_string(),
            entry_point: EntryPoint {
                kind: "API".into(),
                path: app.path().to_string(),
                method: app.method().to_string(),
            },
            tasks: tasks
                .iter()
                .map(|t| TaskSchema {
                    id: t.id().to_string(),
                    name: t.name().to_string(),
                    task_type: t.task_type().to_string(),
                    model: t.model().map(str::to_string),
                })
                .collect(),
            io,
        })
    }
}

/// Apps keyed by id, in registration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub apps: IndexMap<String, AppSchema>,
}

/// Puts the live executor back however tracing ends
struct SchemaExecutorGuard<'a> {
    ctx: &'a Context,
}

impl<'a> SchemaExecutorGuard<'a> {
    fn install(ctx: &'a Context) -> Self {
        ctx.set_executor(Arc::new(SchemaExecutor::new()));
        Self { ctx }
    }
}

impl Drop for SchemaExecutorGuard<'_> {
    fn drop(&mut self) {
        self.ctx.set_executor(self.ctx.live_executor());
    }
}

/// Trace every app once with the schema executor installed
pub fn derive_schema(ctx: &Context) -> Result<Schema> {
    ctx.clear_active_app();
    let apps = ctx.apps();
    for app in &apps {
        app.reset_trace();
    }
    for task in ctx.tasks() {
        task.clear_sources();
    }

    let _guard = SchemaExecutorGuard::install(ctx);
    let mut schema = Schema::default();
    for app in &apps {
        debug!("Tracing app {}", app.id());
        let returned = ctx.trace_app(app, Value::String(ENTRY_POINT.to_string()))?;
        app.set_return_source(returned);
        schema.apps.insert(app.id().to_string(), AppSchema::from_app(app)?);
    }
    Ok(schema)
}

/// Write `schema` as pretty JSON under `<root>/build`
pub fn persist_schema(root: &Path, schema: &Schema) -> Result<PathBuf> {
    let dir = root.join(BUILD_DIR);
    std::fs::create_dir_all(&dir).map_err(|e| PipesError::io("create build directory", e))?;
    let path = dir.join(SCHEMA_FILE);
    let mut json = serde_json::to_string_pretty(schema)?;
    json.push('\n');
    std::fs::write(&path, json).map_err(|e| PipesError::io("write schema", e))?;
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub schema: Schema,
    pub project: ProjectConfig,
    pub path: PathBuf,
}

/// Validate the project at `root`, derive the schema and persist it
pub fn build(ctx: &Context, root: &Path) -> Result<BuildOutput> {
    info!("smartpipes {}", env!("CARGO_PKG_VERSION"));
    let project = validate_project(root)?;
    info!("Building {} (entry {})", project.name, project.main);

    let schema = derive_schema(ctx)?;
    let path = persist_schema(root, &schema)?;
    info!("Wrote schema for {} apps to {}", schema.apps.len(), path.display());

    Ok(BuildOutput {
        schema,
        project,
        path,
    })
}
