use factorlab_providers::infer_provider_from_model;

use super::context::CliContext;

pub async fn run(ctx: &CliContext) -> anyhow::Result<()> {
    let paths = &ctx.paths;
    let config = &ctx.config;

    println!("factorlab status");
    println!("================");
    println!();

    let config_path = paths.config_file();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗ (defaults)" }
    );
    let db_path = config.db_path(paths);
    println!(
        "Database:  {} {}",
        db_path.display(),
        if db_path.exists() { "✓" } else { "✗ (not created yet)" }
    );

    let comments = ctx.comments_file();
    if comments.exists() {
        println!("Comments:  {} ✓", comments.display());
    }
    println!();

    println!("Model:     {}", config.ai.model);
    let provider = config
        .ai
        .provider
        .clone()
        .or_else(|| infer_provider_from_model(&config.ai.model).map(str::to_string));
    println!("Provider:  {}", provider.as_deref().unwrap_or("(inferred at runtime)"));
    println!();

    println!("Providers:");
    let mut names: Vec<&String> = config.providers.keys().collect();
    names.sort();
    for name in names {
        let status = match config.get_provider(name) {
            Some(p) if !p.api_key.is_empty() => "✓ configured",
            _ => "✗ no key",
        };
        println!("  {:<12} {}", name, status);
    }
    println!();

    let harness = ctx.harness();
    match harness.check_interpreter() {
        Ok(path) => println!("Python:    {} ✓", path.display()),
        Err(e) => println!("Python:    {} ✗ ({})", harness.python(), e),
    }
    println!(
        "Budget:    {}s alarm, {}s hard kill",
        config.executor.timeout_secs,
        harness.hard_deadline().as_secs()
    );
    println!("Data root: {}", config.executor.data_root);
    println!(
        "Fixture:   {} (variants {}, keep {} versions)",
        config.explore.default_fixture, config.explore.variant_count, config.explore.version_keep
    );

    Ok(())
}
