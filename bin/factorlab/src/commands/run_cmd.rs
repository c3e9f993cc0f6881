use factorlab_core::{ExecutionResult, Fixture};
use factorlab_executor::CodeExecutor;
use std::path::Path;

use super::context::{print_json, CliContext};

/// Run a snippet file through the harness, no AI involved.
pub async fn run(ctx: &CliContext, file: &Path, code: Option<String>, date: Option<i64>, json: bool) -> anyhow::Result<()> {
    let snippet = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
    if snippet.trim().is_empty() {
        anyhow::bail!("{} is empty", file.display());
    }

    let default = &ctx.config.explore.default_fixture;
    let fixture = Fixture::new(
        code.unwrap_or_else(|| default.code.clone()),
        date.unwrap_or(default.date),
    );

    let result = ctx.harness().execute(&snippet, &fixture).await?;
    if json {
        print_json(&result)?;
    } else {
        print_result(&result);
    }
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

pub fn print_result(result: &ExecutionResult) {
    println!();
    if result.success {
        println!("✅ {} ({} ms)", result.fixture_used, result.duration_ms);
    } else {
        println!(
            "❌ {} ({} ms, {:?})",
            result.fixture_used,
            result.duration_ms,
            result.failure_kind
        );
        println!("  {}: {}", result.error_type.as_deref().unwrap_or("Error"), result.error_message());
        if let Some(tb) = &result.traceback {
            println!();
            for line in tb.lines() {
                println!("  {}", line);
            }
        }
    }

    if !result.factors.is_empty() {
        println!();
        println!("Factors:");
        for (name, value) in &result.factors {
            println!("  {:<24} {}", name, value.summary());
        }
    }
    if !result.key_variables.is_empty() {
        println!();
        println!("Key variables:");
        for (name, value) in &result.key_variables {
            println!("  {:<24} {}", name, value.summary());
        }
    }
    if !result.stdout.trim().is_empty() {
        println!();
        println!("stdout:");
        println!("{}", result.stdout.trim_end());
    }
    println!();
}
