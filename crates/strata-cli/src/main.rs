//! Strata CLI: store, load and manage file versions declared in a manifest.
//!
//! Storage and timeouts come from the environment (see `Config::from_env`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use strata_cli::{build_scheduler, delete_report_json, init_tracing, parse_scope, report_json};
use strata_core::{Config, FileHandle, Report, ORIGINAL_VERSION};

#[derive(Parser)]
#[command(name = "strata", about = "Derive, store and manage file versions")]
struct Cli {
    /// Uploader manifest (JSON)
    #[arg(long, short)]
    manifest: PathBuf,
    /// Scope used to expand the manifest's store_dir (JSON or plain string)
    #[arg(long)]
    scope: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a local file and store all of its versions
    Store {
        /// Path to the file
        file: PathBuf,
    },
    /// Print the local path of a stored version
    Load {
        /// Stored name of the version
        name: String,
    },
    /// Delete every version of a stored file
    Delete {
        /// Stored name of the original
        name: String,
    },
    /// Re-derive every version from the stored original
    Regenerate {
        /// Stored name of the original
        name: String,
    },
    /// Copy every version of a stored file under a new name
    Copy {
        /// Stored name of the original
        name: String,
        /// New name for the copy
        new_name: String,
    },
    /// Print the URL of a stored version
    Url {
        /// Stored name of the original
        name: String,
        #[arg(long, default_value = ORIGINAL_VERSION)]
        version: String,
        /// Time-limited signed URL
        #[arg(long)]
        signed: bool,
    },
    /// Download a URL and store all of its versions
    Fetch {
        url: String,
    },
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// Print the report and exit non-zero when any version failed.
fn finish(report: &Report) -> anyhow::Result<()> {
    finish_with(report, report_json(report))
}

fn finish_with(report: &Report, output: serde_json::Value) -> anyhow::Result<()> {
    print_json(&output)?;
    if report.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;
    let scheduler = build_scheduler(&config, &cli.manifest).await?;
    tracing::debug!(
        backend = %config.storage_backend,
        uploader = %scheduler.uploader().id(),
        "Scheduler ready"
    );

    let scope = cli.scope.as_deref().map(parse_scope);
    let handle = |name: &str| -> anyhow::Result<FileHandle> {
        let mut file = FileHandle::from_name(name)?.with_uploader(scheduler.uploader().id());
        file.set_scope(scope.clone());
        Ok(file)
    };

    match cli.command {
        Commands::Store { file } => {
            let mut file = FileHandle::from_location(&file)
                .with_context(|| format!("Invalid file {}", file.display()))?;
            file.set_scope(scope.clone());
            scheduler.validate(&file)?;
            finish(&scheduler.store(file).await)?;
        }
        Commands::Load { name } => {
            let loaded = scheduler.load(handle(&name)?).await?;
            let location = loaded
                .location()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            print_json(&serde_json::json!({ "name": loaded.name(), "location": location }))?;
        }
        Commands::Delete { name } => {
            let report = scheduler.delete(&handle(&name)?).await;
            finish_with(&report, delete_report_json(&report))?;
        }
        Commands::Regenerate { name } => {
            finish(&scheduler.regenerate(handle(&name)?).await?)?;
        }
        Commands::Copy { name, new_name } => {
            let report = scheduler.copy(&handle(&name)?, &handle(&new_name)?).await?;
            finish(&report)?;
        }
        Commands::Url {
            name,
            version,
            signed,
        } => {
            let url = scheduler.url(&handle(&name)?, &version, signed).await?;
            print_json(&serde_json::json!({ "version": version, "url": url }))?;
        }
        Commands::Fetch { url } => {
            let mut file = strata_processing::download(&url, &config.download())
                .await
                .with_context(|| format!("Failed to download {}", url))?;
            file.set_scope(scope.clone());
            scheduler.validate(&file)?;

            let report = scheduler.store(file.clone()).await;
            if let Some(location) = file.location() {
                let _ = tokio::fs::remove_file(location).await;
            }
            finish(&report)?;
        }
    }

    Ok(())
}
