mod commands;

use clap::{Parser, Subcommand};
use commands::context::CliContext;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "factorlab")]
#[command(about = "Explore, validate and version AI-generated factor code", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.factorlab/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration, database and interpreter status
    Status,

    /// Generate, edit and execute exploration variants
    Explore {
        #[command(subcommand)]
        command: ExploreCommands,
    },

    /// Execute a snippet file directly through the harness
    Run {
        /// Python file defining calculate_factor(code, date)
        file: PathBuf,
        /// Instrument code (default: configured fixture)
        #[arg(long)]
        code: Option<String>,
        /// Trading date as YYYYMMDD (default: configured fixture)
        #[arg(long)]
        date: Option<i64>,
        /// Print the raw result JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage code versions
    Versions {
        #[command(subcommand)]
        command: VersionsCommands,
    },
}

#[derive(Subcommand)]
enum ExploreCommands {
    /// Show the exploration of a comment
    Show {
        comment_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Generate validated variants for a comment
    Generate {
        comment_id: String,
        /// Use this text instead of the stored comment
        #[arg(short, long)]
        text: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Regenerate with different ideas (drops edits and cached results)
    Regenerate {
        comment_id: String,
        #[arg(short, long)]
        text: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Save user-modified variants from a JSON array file
    Save {
        comment_id: String,
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Execute one variant and cache its result
    Execute {
        comment_id: String,
        variant_index: usize,
        /// Instrument code
        #[arg(long)]
        code: Option<String>,
        /// Trading date as YYYYMMDD
        #[arg(long)]
        date: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Generate code from a description and a pseudocode file
    GenerateCode {
        /// Variant description
        #[arg(short, long)]
        description: String,
        /// File holding the pseudocode
        #[arg(short, long)]
        pseudocode: PathBuf,
        /// Update this comment's live variant with the result
        #[arg(long, requires = "variant")]
        comment: Option<String>,
        #[arg(long, requires = "comment")]
        variant: Option<usize>,
        /// Reference code file
        #[arg(long)]
        current_code: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum VersionsCommands {
    /// List versions of a variant (newest first)
    List {
        comment_id: String,
        variant_index: usize,
        #[arg(long)]
        json: bool,
    },
    /// Snapshot the live variant as a new version
    Create {
        comment_id: String,
        variant_index: usize,
        #[arg(short, long)]
        note: Option<String>,
        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Protect from retention pruning
        #[arg(long)]
        important: bool,
        #[arg(long)]
        by: Option<String>,
    },
    /// Show one version
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Update note, tags or importance
    Update {
        id: i64,
        #[arg(short, long)]
        note: Option<String>,
        /// Comma-separated tags (replaces existing)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
        #[arg(long)]
        important: Option<bool>,
    },
    /// Delete one version
    Delete { id: i64 },
    /// Line diff between two versions
    Diff {
        old_id: i64,
        new_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Restore a version onto the live variant (creates a new version)
    Restore {
        id: i64,
        #[arg(long)]
        by: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Prune old, unimportant versions
    Cleanup {
        comment_id: String,
        variant_index: usize,
        /// Number of newest versions to keep (default: config)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ctx = CliContext::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Status => {
            commands::status::run(&ctx).await?;
        }
        Commands::Run { file, code, date, json } => {
            commands::run_cmd::run(&ctx, &file, code, date, json).await?;
        }
        Commands::Explore { command } => match command {
            ExploreCommands::Show { comment_id, json } => {
                commands::explore_cmd::show(&ctx, &comment_id, json).await?;
            }
            ExploreCommands::Generate { comment_id, text, json } => {
                commands::explore_cmd::generate(&ctx, &comment_id, text, false, json).await?;
            }
            ExploreCommands::Regenerate { comment_id, text, json } => {
                commands::explore_cmd::generate(&ctx, &comment_id, text, true, json).await?;
            }
            ExploreCommands::Save { comment_id, file, json } => {
                commands::explore_cmd::save(&ctx, &comment_id, &file, json).await?;
            }
            ExploreCommands::Execute {
                comment_id,
                variant_index,
                code,
                date,
                json,
            } => {
                commands::explore_cmd::execute(&ctx, &comment_id, variant_index, code, date, json).await?;
            }
            ExploreCommands::GenerateCode {
                description,
                pseudocode,
                comment,
                variant,
                current_code,
                json,
            } => {
                commands::explore_cmd::generate_code(
                    &ctx,
                    description,
                    &pseudocode,
                    comment,
                    variant,
                    current_code.as_deref(),
                    json,
                )
                .await?;
            }
        },
        Commands::Versions { command } => match command {
            VersionsCommands::List {
                comment_id,
                variant_index,
                json,
            } => {
                commands::versions_cmd::list(&ctx, &comment_id, variant_index, json).await?;
            }
            VersionsCommands::Create {
                comment_id,
                variant_index,
                note,
                tags,
                important,
                by,
            } => {
                commands::versions_cmd::create(&ctx, &comment_id, variant_index, note, tags, important, by).await?;
            }
            VersionsCommands::Show { id, json } => {
                commands::versions_cmd::show(&ctx, id, json).await?;
            }
            VersionsCommands::Update {
                id,
                note,
                tags,
                important,
            } => {
                commands::versions_cmd::update(&ctx, id, note, tags, important).await?;
            }
            VersionsCommands::Delete { id } => {
                commands::versions_cmd::delete(&ctx, id).await?;
            }
            VersionsCommands::Diff { old_id, new_id, json } => {
                commands::versions_cmd::diff(&ctx, old_id, new_id, json).await?;
            }
            VersionsCommands::Restore { id, by, json } => {
                commands::versions_cmd::restore(&ctx, id, by, json).await?;
            }
            VersionsCommands::Cleanup {
                comment_id,
                variant_index,
                keep,
            } => {
                commands::versions_cmd::cleanup(&ctx, &comment_id, variant_index, keep).await?;
            }
        },
    }

    Ok(())
}
