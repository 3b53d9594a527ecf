use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use smartpipes::{build, init_logging, AppSpec, Args, Config, Context, TaskSpec};
use std::path::Path;
use tracing::info;

fn to_int(args: Args) -> Result<Value> {
    let raw = args
        .value(0)
        .ok_or_else(|| anyhow!("Input temperature not found."))?;
    let n: i64 = match raw {
        Value::String(s) => s.trim().parse()?,
        other => other
            .as_i64()
            .ok_or_else(|| anyhow!("Failed to convert {other} to an integer."))?,
    };
    Ok(json!(n))
}

fn operand(args: &Args, index: usize) -> Result<f64> {
    args.value(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("Operand {index} is not a number."))
}

fn multiply(args: Args) -> Result<Value> {
    Ok(json!(operand(&args, 0)? * operand(&args, 1)?))
}

fn add(args: Args) -> Result<Value> {
    Ok(json!(operand(&args, 0)? + operand(&args, 1)?))
}

fn register(ctx: &Context) -> Result<()> {
    let to_int = ctx.register_task(TaskSpec::compute("to_int", to_int));
    let multiply = ctx.register_task(TaskSpec::compute("multiply", multiply));
    let add = ctx.register_task(TaskSpec::compute("add", add));

    // Celsius to Fahrenheit
    ctx.register_app(AppSpec::new("convert", "/convert", move |input| {
        let celsius = to_int.call(input)?;
        let scaled = multiply.call(Args::new().arg(celsius).arg(1.8))?;
        Ok(add.call(Args::new().arg(scaled).arg(32))?)
    }))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info");

    let config = Config::from_env()?;
    let ctx = Context::from_config(config.clone());
    register(&ctx)?;

    match std::env::args().nth(1).as_deref() {
        Some("build") => {
            let output = build(&ctx, Path::new(env!("CARGO_MANIFEST_DIR")))?;
            info!("Schema written to {}", output.path.display());
        }
        _ => smartpipes::server::start(ctx, &config).await?,
    }
    Ok(())
}
