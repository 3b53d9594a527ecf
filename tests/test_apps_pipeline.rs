//! End-to-end tests for registration, live dispatch and schema builds

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use smartpipes::adapters::{Adapter, AdapterFactory, SledStore, StoreHandle};
use smartpipes::apps::{Model, Notification, TaskFn, PLACEHOLDER_APP_ID};
use smartpipes::{build, AppSpec, Args, Context, PipesError, Result, SqlAccess, TaskSpec};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn to_int(args: Args) -> anyhow::Result<Value> {
    let raw = args.value(0).cloned().unwrap_or_default();
    let n = match raw {
        Value::String(s) => s.trim().parse::<i64>()?,
        Value::Number(n) => n.as_i64().ok_or_else(|| anyhow::anyhow!("not an integer"))?,
        other => anyhow::bail!("cannot convert {other} to an integer"),
    };
    Ok(json!(n))
}

fn number(args: &Args, index: usize) -> anyhow::Result<f64> {
    args.value(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("argument {index} is not a number"))
}

fn multiply(args: Args) -> anyhow::Result<Value> {
    Ok(json!(number(&args, 0)? * number(&args, 1)?))
}

fn add(args: Args) -> anyhow::Result<Value> {
    Ok(json!(number(&args, 0)? + number(&args, 1)?))
}

fn register_convert(ctx: &Context) {
    let to_int_task = ctx.register_task(TaskSpec::compute("to_int", to_int));
    let multiply_task = ctx.register_task(TaskSpec::compute("multiply", multiply));
    let add_task = ctx.register_task(TaskSpec::compute("add", add));

    ctx.register_app(AppSpec::new("convert", "/convert", move |input| {
        let celsius = to_int_task.call(input)?;
        let scaled = multiply_task.call(Args::new().arg(celsius).arg(1.8))?;
        Ok(add_task.call(Args::new().arg(scaled).arg(32))?)
    }))
    .unwrap();
}

fn project_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    dir
}

fn write_project(root: &Path) {
    std::fs::write(
        root.join("Cargo.toml"),
        "[package]\nname = \"weather\"\nversion = \"0.1.0\"\n\n[package.metadata.smartpipes]\nmain = \"app\"\n",
    )
    .unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
}

#[test]
fn test_convert_matches_direct_calls() {
    let ctx = Context::new();
    register_convert(&ctx);

    let live = ctx.invoke_app("convert", json!("10")).unwrap();

    let direct = add(Args::new()
        .arg(multiply(Args::new().arg(to_int(Args::from("10")).unwrap()).arg(1.8)).unwrap())
        .arg(32))
    .unwrap();
    assert_eq!(live, direct);
    assert_eq!(live.as_f64(), Some(50.0));

    let app = ctx.get_app("convert").unwrap();
    let ids: Vec<String> = app.tasks().iter().map(|t| t.id().to_string()).collect();
    assert_eq!(ids, vec!["to_int", "multiply", "add"]);
}

#[test]
fn test_convert_schema_io_chain() {
    let ctx = Context::new();
    register_convert(&ctx);
    let dir = project_dir();

    let output = build(&ctx, dir.path()).unwrap();
    assert_eq!(output.project.name, "weather");
    assert_eq!(output.path, dir.path().join("build").join("schema.json"));

    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(&output.path).unwrap()).unwrap();
    let app = &written["apps"]["convert"];
    assert_eq!(
        app["io"],
        json!({
            "entry_point": ["to_int"],
            "to_int": ["multiply"],
            "multiply": ["add"],
            "returns": "add"
        })
    );
    assert_eq!(
        app["entry_point"],
        json!({"type": "API", "path": "/convert", "method": "POST"})
    );
    assert_eq!(
        app["tasks"][0],
        json!({"id": "to_int", "name": "to_int", "type": "compute", "model": null})
    );

    // live traffic after the build runs the real functions again
    assert_eq!(ctx.invoke_app("convert", json!("0")).unwrap().as_f64(), Some(32.0));
}

#[test]
fn test_repeated_builds_are_byte_identical() {
    let ctx = Context::new();
    register_convert(&ctx);
    let dir = project_dir();

    let first = build(&ctx, dir.path()).unwrap();
    let first_bytes = std::fs::read(&first.path).unwrap();

    ctx.invoke_app("convert", json!("21")).unwrap();

    let second = build(&ctx, dir.path()).unwrap();
    let second_bytes = std::fs::read(&second.path).unwrap();
    assert_eq!(first_bytes, second_bytes);
    assert_eq!(first.schema, second.schema);
}

#[derive(Default)]
struct CountingAdapters {
    sql: AtomicUsize,
    inference: AtomicUsize,
    store: AtomicUsize,
}

impl CountingAdapters {
    fn total(&self) -> usize {
        self.sql.load(Ordering::SeqCst)
            + self.inference.load(Ordering::SeqCst)
            + self.store.load(Ordering::SeqCst)
    }
}

struct Forward {
    func: TaskFn,
    task_id: String,
}

impl Adapter for Forward {
    fn process(&self, args: Args) -> Result<Value> {
        (self.func)(args).map_err(|e| PipesError::from_task_failure(&self.task_id, e))
    }
}

impl AdapterFactory for CountingAdapters {
    fn sql(&self, func: TaskFn, task_id: &str, _access: &SqlAccess) -> Result<Arc<dyn Adapter>> {
        self.sql.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Forward {
            func,
            task_id: task_id.to_string(),
        }))
    }

    fn inference(&self, func: TaskFn, task_id: &str, _model: &Model) -> Result<Box<dyn Adapter>> {
        self.inference.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Forward {
            func,
            task_id: task_id.to_string(),
        }))
    }

    fn store(&self) -> Result<StoreHandle> {
        self.store.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SledStore::temporary()?))
    }
}

fn register_adapter_pipeline(ctx: &Context) {
    let summarize = ctx.register_task(TaskSpec::inference("summarize", "bloom", |args| {
        Ok(json!(format!("summary of {}", args.value(0).cloned().unwrap_or_default())))
    }));
    let remember = ctx.register_task(TaskSpec::vectordb("remember", |args| {
        let store = args
            .store()
            .ok_or_else(|| anyhow::anyhow!("no store handle"))?;
        let text = args.value(0).cloned().unwrap_or_default().to_string();
        store.save("notes/latest", text.as_bytes())?;
        Ok(json!(text.len()))
    }));
    let record = ctx.register_task(
        TaskSpec::sql(
            "record",
            SqlAccess::new("pipes", "secret", "results", 5432),
            |args| Ok(json!({ "rows": args.len() })),
        )
        .with_model("bloom"),
    );

    ctx.register_app(AppSpec::new("digest", "/digest", move |input| {
        let summary = summarize.call(input)?;
        let size = remember.call(summary.clone())?;
        record.call(Args::new().arg(summary).arg(size))?;
        Ok(json!("done"))
    }))
    .unwrap();
}

#[test]
fn test_build_never_reaches_adapters() {
    let adapters = Arc::new(CountingAdapters::default());
    let ctx = Context::with_adapters(adapters.clone());
    register_adapter_pipeline(&ctx);
    let dir = project_dir();

    let output = build(&ctx, dir.path()).unwrap();
    assert_eq!(adapters.total(), 0);

    let app = &output.schema.apps["digest"];
    assert_eq!(app.io.sources["entry_point"], vec!["summarize"]);
    assert_eq!(app.io.sources["summarize"], vec!["remember", "record"]);
    assert_eq!(app.io.returns, json!("done"));
    assert_eq!(app.tasks[0].model.as_deref(), Some("bloom"));
    assert_eq!(app.tasks[2].task_type, "sql");

    assert_eq!(ctx.invoke_app("digest", json!("weather")).unwrap(), json!("done"));
    assert_eq!(adapters.inference.load(Ordering::SeqCst), 1);
    assert_eq!(adapters.store.load(Ordering::SeqCst), 1);
    // sql beats the model hint
    assert_eq!(adapters.sql.load(Ordering::SeqCst), 1);

    ctx.invoke_app("digest", json!("rain")).unwrap();
    assert_eq!(adapters.inference.load(Ordering::SeqCst), 2);
    assert_eq!(adapters.sql.load(Ordering::SeqCst), 1);
}

#[test]
fn test_executor_restored_after_failing_build() {
    let adapters = Arc::new(CountingAdapters::default());
    let ctx = Context::with_adapters(adapters.clone());
    register_convert(&ctx);
    ctx.register_app(AppSpec::new("broken", "/broken", |_| {
        Err(anyhow::anyhow!("refusing to trace"))
    }))
    .unwrap();
    let dir = project_dir();

    let err = build(&ctx, dir.path()).unwrap_err();
    assert_eq!(err.category(), "app");
    assert_eq!(ctx.executor().name(), "real");
    assert!(!dir.path().join("build").join("schema.json").exists());

    assert_eq!(ctx.invoke_app("convert", json!("100")).unwrap().as_f64(), Some(212.0));
}

#[test]
fn test_placeholder_app_is_replaced() {
    let ctx = Context::new();
    ctx.register_app(AppSpec::new(PLACEHOLDER_APP_ID, "/", |v| Ok(v)))
        .unwrap();
    register_convert(&ctx);

    let apps = ctx.apps();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].id(), "convert");
}

#[test]
fn test_sql_without_credentials_fails_before_adapters() {
    let adapters = Arc::new(CountingAdapters::default());
    let ctx = Context::with_adapters(adapters.clone());
    let task = ctx.register_task(TaskSpec::new("orphan", smartpipes::TaskType::Sql, |_| {
        Ok(Value::Null)
    }));

    let err = task.call(()).unwrap_err();
    assert!(matches!(err, PipesError::Configuration { .. }));
    assert_eq!(adapters.total(), 0);
}

#[test]
fn test_event_sink_sees_requests_and_tasks() {
    let ctx = Context::new();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let log = seen.clone();
    ctx.set_event_sink(Arc::new(move |n: &Notification| {
        let kind = serde_json::to_value(n).unwrap()["type"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        log.lock().unwrap().push(kind);
    }));
    register_convert(&ctx);
    seen.lock().unwrap().clear();

    ctx.invoke_app("convert", json!("10")).unwrap();
    let kinds = seen.lock().unwrap().clone();
    assert_eq!(kinds.first().map(String::as_str), Some("add_request"));
    assert_eq!(kinds.last().map(String::as_str), Some("update_request"));
    assert_eq!(kinds.iter().filter(|k| *k == "task").count(), 6);
}
