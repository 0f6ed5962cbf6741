use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use strata_core::{Config, Report, VersionOutcome};
use strata_processing::{CommandExecutor, ManifestUploader, TransformScheduler};
use strata_storage::create_storage;

/// Initialize tracing for CLI binaries. Logs go to stderr so stdout stays JSON.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Scheduler for the uploader declared in `manifest`, on the configured backend.
pub async fn build_scheduler(config: &Config, manifest: &Path) -> anyhow::Result<TransformScheduler> {
    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage backend")?;
    let uploader = ManifestUploader::from_path(manifest, CommandExecutor::new(config.exec()))
        .await
        .with_context(|| format!("Failed to load manifest {}", manifest.display()))?;

    Ok(TransformScheduler::new(
        Arc::new(uploader),
        storage,
        config.scheduler(),
    ))
}

/// `--scope` accepts JSON (`42`, `{"id": 7}`); anything else is taken as a string.
pub fn parse_scope(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

pub fn report_json(report: &Report) -> serde_json::Value {
    serde_json::json!({
        "ok": report.is_ok(),
        "versions": report.outcomes(),
    })
}

/// Like [`report_json`], but a version removed by `delete` (reported as
/// `Stored`) is printed as `deleted`.
pub fn delete_report_json(report: &Report) -> serde_json::Value {
    let versions: serde_json::Map<String, serde_json::Value> = report
        .outcomes()
        .iter()
        .map(|(version, outcome)| {
            let value = match outcome {
                VersionOutcome::Stored => serde_json::json!({ "status": "deleted" }),
                other => serde_json::json!(other),
            };
            (version.clone(), value)
        })
        .collect();

    serde_json::json!({
        "ok": report.is_ok(),
        "versions": versions,
    })
}
