// Copyright 2025 egafetch contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod build_info;
mod config;
mod progress;

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use egafetch_base::ReadableSize;
use egafetch_engine::{build_manifest, FileSpec, Orchestrator, StaticMetadataClient, StaticTokenProvider};
use serde::Deserialize;
use snafu::ResultExt as _;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::{build_engine_config, resolve_config_path, CliOverrides, FileConfig};

#[derive(Parser)]
#[command(
    name = "egafetch",
    about = "Byte-precise, resumable downloader for EGA data files",
    author = build_info::AUTHOR,
    version = build_info::FULL_VERSION,
    flatten_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every file listed in a manifest, resuming any in-progress job
    /// found under the job root.
    Download(DownloadArgs),
}

#[derive(clap::Args)]
struct DownloadArgs {
    /// Path to a JSON manifest: a list of `{file_id, file_name, size, url,
    /// checksum?, checksum_type?}` objects.
    #[arg(long)]
    manifest: PathBuf,

    /// Bearer token for the EGA data API. Falls back to `EGA_ACCESS_TOKEN`.
    #[arg(long, env = "EGA_ACCESS_TOKEN", hide_env_values = true)]
    token: String,

    /// Optional TOML config file. Defaults to the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory downloaded files and job state are written under.
    #[arg(long)]
    job_root: Option<PathBuf>,

    #[arg(long)]
    parallel_files: Option<usize>,

    #[arg(long)]
    parallel_chunks: Option<usize>,

    #[arg(long)]
    chunk_size: Option<ReadableSize>,

    #[arg(long)]
    max_bandwidth: Option<ReadableSize>,

    /// Grow or shrink chunk size based on observed throughput.
    #[arg(long)]
    adaptive_chunks: bool,

    /// Discard any existing job state under the job root and start over.
    #[arg(long)]
    restart: bool,

    #[arg(long)]
    max_chunk_retries: Option<usize>,

    #[arg(long)]
    max_file_retries: Option<usize>,

    /// Log level filter, e.g. `info` or `debug,reqwest=warn`.
    #[arg(long)]
    log_level: Option<String>,
}

/// One entry in the input manifest file. URL resolution (the EGA metadata
/// API) is out of this crate's scope, so the manifest carries direct URLs
/// rather than accession numbers to look up.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    file_id:       String,
    file_name:     String,
    size:          u64,
    url:           String,
    checksum:      Option<String>,
    checksum_type: Option<egafetch_engine::ChecksumType>,
}

#[derive(Debug, snafu::Snafu)]
enum CliError {
    #[snafu(display("could not read manifest {}: {source}", path.display()))]
    ReadManifest { path: PathBuf, source: std::io::Error },

    #[snafu(display("could not parse manifest {}: {source}", path.display()))]
    ParseManifest { path: PathBuf, source: serde_json::Error },

    #[snafu(display("manifest {} lists no files", path.display()))]
    EmptyManifest { path: PathBuf },

    #[snafu(display("configuration error: {source}"))]
    Config { source: config::ConfigError },

    #[snafu(display("engine error: {source}"))]
    Engine { source: egafetch_engine::EngineError },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    human_panic::setup_panic!();
    egafetch_telemetry::set_panic_hook();
    let cli = Cli::parse();

    let log_level = match &cli.command {
        Commands::Download(args) => args.log_level.clone(),
    };
    let _guards = egafetch_telemetry::init_global_logging(
        "egafetch",
        &egafetch_telemetry::LoggingOptions::builder().maybe_level(log_level).build(),
    );

    match cli.command {
        Commands::Download(args) => run_download(args).await,
    }
}

async fn run_download(args: DownloadArgs) -> Result<(), CliError> {
    let manifest_text = std::fs::read_to_string(&args.manifest).context(ReadManifestSnafu {
        path: args.manifest.clone(),
    })?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&manifest_text).context(ParseManifestSnafu {
        path: args.manifest.clone(),
    })?;
    ensure_non_empty(&entries, &args.manifest)?;

    let mut urls = HashMap::with_capacity(entries.len());
    let mut specs = Vec::with_capacity(entries.len());
    for entry in entries {
        urls.insert(entry.file_id.clone(), entry.url);
        specs.push(FileSpec {
            file_id:       entry.file_id,
            file_name:     entry.file_name,
            size:          entry.size,
            checksum:      entry.checksum,
            checksum_type: entry.checksum_type,
        });
    }

    let file_config = FileConfig::load(
        &resolve_config_path(args.config.clone()).unwrap_or_else(|| PathBuf::from("egafetch.toml")),
    )
    .context(ConfigSnafu)?;
    let overrides = CliOverrides {
        job_root: args.job_root,
        parallel_files: args.parallel_files,
        parallel_chunks: args.parallel_chunks,
        chunk_size: args.chunk_size,
        max_bandwidth: args.max_bandwidth,
        adaptive_chunks: args.adaptive_chunks,
        restart: args.restart,
        max_chunk_retries: args.max_chunk_retries,
        max_file_retries: args.max_file_retries,
    };
    let engine_config = build_engine_config(&file_config, &overrides).context(ConfigSnafu)?;

    let manifest = build_manifest(None, specs, now());
    let metadata = Arc::new(StaticMetadataClient::new(urls));
    let tokens = Arc::new(StaticTokenProvider(args.token));
    let progress = Arc::new(progress::IndicatifProgress::new());

    let orchestrator =
        Orchestrator::with_progress(engine_config, tokens, metadata, progress).context(EngineSnafu)?;

    let cancel = CancellationToken::new();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(watch_for_shutdown(cancel.clone(), shutdown_rx));

    let report = orchestrator.run(&manifest, cancel).await.context(EngineSnafu)?;
    let _ = shutdown_tx.send(());

    println!(
        "completed {} file(s), {} failed{}",
        report.completed.len(),
        report.failed.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for (file_id, message) in &report.failed {
        eprintln!("  {file_id}: {message}");
    }

    if !report.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn ensure_non_empty(entries: &[ManifestEntry], path: &std::path::Path) -> Result<(), CliError> {
    if entries.is_empty() {
        EmptyManifestSnafu { path: path.to_path_buf() }.fail()
    } else {
        Ok(())
    }
}

/// Cancels `cancel` on Ctrl-C or SIGTERM, or when `shutdown_rx` fires because
/// the run already finished on its own.
async fn watch_for_shutdown(cancel: CancellationToken, shutdown_rx: oneshot::Receiver<()>) {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::warn!("received Ctrl-C, cancelling in-flight downloads");
            cancel.cancel();
        }
        () = terminate => {
            tracing::warn!("received SIGTERM, cancelling in-flight downloads");
            cancel.cancel();
        }
        _ = shutdown_rx => {}
    }
}

/// The manifest this binary builds is rebuilt fresh on every invocation from
/// the input manifest file, so its timestamp is purely informational.
fn now() -> String { jiff::Timestamp::now().to_string() }
