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

//! Top-level entry point: takes a `Manifest`, fans its files out across a
//! bounded pool of concurrent `FileDownloader` runs, and aggregates the
//! outcome. A single `CancellationToken` ties every in-flight file and
//! chunk to the same shutdown signal.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    auth::TokenProvider,
    config::EngineConfig,
    error::EngineError,
    file_downloader::FileDownloader,
    metadata::MetadataClient,
    progress::{NullSink, ProgressSink},
    rate_limiter::RateLimiter,
    state_store::StateStore,
    types::{DownloadOutcome, FileSpec, FileStatus, Manifest},
};

/// Summary of one run across every file in a manifest.
#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<DownloadOutcome>,
    pub failed:    Vec<(String, String)>,
    pub cancelled: bool,
}

/// Owns the shared collaborators (HTTP client, token provider, metadata
/// client, rate limiter, progress sink) and config for one engine
/// invocation, and schedules files against them.
pub struct Orchestrator {
    client:         reqwest::Client,
    state_store:    Arc<StateStore>,
    token_provider: Arc<dyn TokenProvider>,
    metadata:       Arc<dyn MetadataClient>,
    rate_limiter:   Option<Arc<RateLimiter>>,
    progress:       Arc<dyn ProgressSink>,
    config:         EngineConfig,
}

impl Orchestrator {
    /// # Errors
    /// Returns an error if the HTTP client fails to build from the
    /// configured timeout and user agent.
    pub fn new(
        config: EngineConfig,
        token_provider: Arc<dyn TokenProvider>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Result<Self, EngineError> {
        Self::with_progress(config, token_provider, metadata, Arc::new(NullSink))
    }

    pub fn with_progress(
        config: EngineConfig,
        token_provider: Arc<dyn TokenProvider>,
        metadata: Arc<dyn MetadataClient>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self, EngineError> {
        // No whole-request timeout: chunk bodies can legitimately take
        // minutes for a multi-gigabyte range over a slow link, and a
        // deadline here would abort an otherwise-healthy transfer instead
        // of letting TCP keep-alives and the chunk retry loop do their
        // job. Only the connect phase is bounded.
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|source| EngineError::Network { source })?;
        let rate_limiter = config.max_bandwidth.map(|cap| Arc::new(RateLimiter::new(cap.as_bytes())));
        let state_store = Arc::new(StateStore::new(&config.job_root));

        Ok(Self {
            client,
            state_store,
            token_provider,
            metadata,
            rate_limiter,
            progress,
            config,
        })
    }

    /// Runs every file in `manifest` to completion (or failure), persisting
    /// the manifest and wiping any existing job state first if
    /// `EngineConfig::restart` is set.
    pub async fn run(&self, manifest: &Manifest, cancel: CancellationToken) -> Result<RunReport, EngineError> {
        self.state_store.ensure_dirs().await?;
        if self.config.restart {
            self.state_store.reset().await?;
            self.state_store.ensure_dirs().await?;
        }
        self.state_store.save_manifest(manifest).await?;

        info!(
            files = manifest.files.len(),
            parallel_files = self.config.parallel_files,
            parallel_chunks = self.config.parallel_chunks,
            "starting download run"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.parallel_files.max(1)));
        let mut join_set = tokio::task::JoinSet::new();
        let mut report = RunReport::default();

        // A file already `Complete` on disk must never consume a download
        // slot, so its state is checked before the semaphore permit is
        // acquired rather than inside the spawned task.
        for spec in manifest.files.clone() {
            if let Some(state) = self.state_store.load_file_state(&spec.file_id).await? {
                if state.status == FileStatus::Complete {
                    self.progress.file_skipped(&spec.file_id, &spec.file_name);
                    report.completed.push(DownloadOutcome {
                        file_id:   state.file_id,
                        file_name: state.file_name,
                        size:      state.size,
                        checksum:  state.checksum_expected,
                    });
                    continue;
                }
            }

            let semaphore = Arc::clone(&semaphore);
            let downloader = self.build_file_downloader();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
                let result = downloader.run(&spec, cancel).await;
                (spec.file_id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (file_id, result) = joined.map_err(|_| EngineError::Cancelled)?;
            match result {
                Ok(outcome) => report.completed.push(outcome),
                Err(e) if e.is_cancellation() => {
                    report.cancelled = true;
                    report.failed.push((file_id, e.to_string()));
                }
                Err(e) => report.failed.push((file_id, e.to_string())),
            }
        }
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "download run finished"
        );
        Ok(report)
    }

    fn build_file_downloader(&self) -> FileDownloader {
        FileDownloader::new(
            self.client.clone(),
            Arc::clone(&self.state_store),
            Arc::clone(&self.token_provider),
            Arc::clone(&self.metadata),
            self.rate_limiter.clone(),
            Arc::clone(&self.progress),
            self.config.clone(),
        )
    }
}

/// Resolves a set of `FileSpec`s into a fresh `Manifest`, stamping both
/// timestamps with the same value since it's being created now.
#[must_use]
pub fn build_manifest(dataset_id: Option<String>, files: Vec<FileSpec>, created_at: String) -> Manifest {
    Manifest {
        dataset_id,
        files,
        created_at: created_at.clone(),
        updated_at: created_at,
    }
}
