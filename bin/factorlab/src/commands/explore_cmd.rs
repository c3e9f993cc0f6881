use factorlab_core::{Fixture, Variant};
use factorlab_explore::{CodeGenerationRequest, ExplorationView};
use std::path::Path;

use super::context::{print_json, CliContext};
use super::run_cmd::print_result;

fn print_view(comment_id: &str, view: &ExplorationView) {
    println!();
    if !view.is_generated {
        println!("(No exploration for comment {} yet)", comment_id);
        println!("Default fixture: {}", view.fixture);
        return;
    }
    println!(
        "🔬 Exploration for comment {}{}",
        comment_id,
        if view.is_modified { " (user-modified)" } else { "" }
    );
    println!("  Fixture: {}", view.fixture);
    for (i, v) in view.variants.iter().enumerate() {
        let status = match view.execution_results.get(&i) {
            Some(r) if r.success => "✓",
            Some(_) => "✗",
            None => "·",
        };
        let marker = if view.last_executed_variant == Some(i) { "*" } else { " " };
        println!("  {}[{}] {} {}", marker, i, status, v.name);
        if !v.description.is_empty() {
            println!("        {}", v.description);
        }
    }
    println!();
}

fn emit(comment_id: &str, view: &ExplorationView, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(view)
    } else {
        print_view(comment_id, view);
        Ok(())
    }
}

pub async fn show(ctx: &CliContext, comment_id: &str, json: bool) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    emit(comment_id, &service.get(comment_id)?, json)
}

pub async fn generate(
    ctx: &CliContext,
    comment_id: &str,
    text: Option<String>,
    regenerate: bool,
    json: bool,
) -> anyhow::Result<()> {
    let seed = text.as_deref().map(|t| (comment_id, t));
    let service = ctx.service(seed).await?;
    let view = if regenerate {
        service.regenerate(comment_id, text.as_deref()).await?
    } else {
        service.generate(comment_id, text.as_deref()).await?
    };
    emit(comment_id, &view, json)
}

/// Overlay from a JSON array of variants.
pub async fn save(ctx: &CliContext, comment_id: &str, file: &Path, json: bool) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
    let variants: Vec<Variant> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Failed to parse variants JSON: {}", e))?;
    let service = ctx.service(None).await?;
    emit(comment_id, &service.save_variants(comment_id, &variants)?, json)
}

pub async fn execute(
    ctx: &CliContext,
    comment_id: &str,
    variant_index: usize,
    code: Option<String>,
    date: Option<i64>,
    json: bool,
) -> anyhow::Result<()> {
    let service = ctx.service(None).await?;
    let fixture = match (code, date) {
        (None, None) => None,
        (code, date) => {
            let current = service.get(comment_id)?.fixture;
            Some(Fixture::new(code.unwrap_or(current.code), date.unwrap_or(current.date)))
        }
    };
    let result = service.execute_variant(comment_id, variant_index, fixture, None).await?;
    if json {
        print_json(&result)
    } else {
        print_result(&result);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn generate_code(
    ctx: &CliContext,
    description: String,
    pseudocode_file: &Path,
    comment_id: Option<String>,
    variant_index: Option<usize>,
    current_code_file: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let pseudocode = std::fs::read_to_string(pseudocode_file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", pseudocode_file.display(), e))?;
    let current_code = current_code_file.map(std::fs::read_to_string).transpose()?;

    let service = ctx.service(None).await?;
    let out = service
        .generate_code(&CodeGenerationRequest {
            comment_id,
            variant_index,
            description,
            pseudocode,
            current_code,
        })
        .await?;

    if json {
        return print_json(&out);
    }
    println!();
    if out.success {
        println!("✅ Code validated (fix rounds: {})", out.attempts);
    } else {
        println!("❌ Code still failing after {} fix rounds", out.attempts);
        if let Some(err) = &out.error {
            println!("  {}", err);
        }
    }
    println!();
    println!("{}", out.code);
    Ok(())
}
