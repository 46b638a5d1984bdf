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

//! Drives one file through its state machine: plan chunks, download them
//! (bounded by `parallel_chunks`), merge, verify, and land on `Complete` or
//! `Failed`. Everything here operates on a single file; fanning this out
//! across many files concurrently is the orchestrator's job.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    auth::TokenProvider,
    chunk_downloader::ChunkDownloader,
    config::{EngineConfig, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE},
    error::{EngineError, FileFailedSnafu},
    merge,
    metadata::MetadataClient,
    planning,
    progress::ProgressSink,
    rate_limiter::RateLimiter,
    state_store::StateStore,
    types::{ChecksumType, ChunkStatus, DownloadOutcome, FileSpec, FileState, FileStatus},
};

/// Number of most-recent per-chunk throughput samples averaged to decide
/// whether to rescale the chunk plan. Only meaningful when
/// `EngineConfig::adaptive_chunks` is set.
const ADAPTIVE_WINDOW: usize = 3;
/// Mean throughput above which the next chunk size grows.
const ADAPTIVE_FAST_MBPS: f64 = 50.0;
/// Mean throughput below which the next chunk size shrinks.
const ADAPTIVE_SLOW_MBPS: f64 = 10.0;
const ADAPTIVE_GROW_FACTOR: f64 = 1.5;
const ADAPTIVE_SHRINK_FACTOR: f64 = 0.5;

pub struct FileDownloader {
    client:         reqwest::Client,
    state_store:    Arc<StateStore>,
    token_provider: Arc<dyn TokenProvider>,
    metadata:       Arc<dyn MetadataClient>,
    rate_limiter:   Option<Arc<RateLimiter>>,
    progress:       Arc<dyn ProgressSink>,
    config:         EngineConfig,
}

impl FileDownloader {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        state_store: Arc<StateStore>,
        token_provider: Arc<dyn TokenProvider>,
        metadata: Arc<dyn MetadataClient>,
        rate_limiter: Option<Arc<RateLimiter>>,
        progress: Arc<dyn ProgressSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            client,
            state_store,
            token_provider,
            metadata,
            rate_limiter,
            progress,
            config,
        }
    }

    pub async fn run(&self, spec: &FileSpec, cancel: CancellationToken) -> Result<DownloadOutcome, EngineError> {
        info!(file_id = %spec.file_id, file_name = %spec.file_name, size = spec.size, "starting file download");
        let mut state = self
            .state_store
            .load_file_state(&spec.file_id)
            .await?
            .unwrap_or_else(|| FileState::new(spec));

        if state.download_url.is_none() {
            let (url, expires) = self.metadata.resolve_download_url(&spec.file_id).await?;
            state.download_url = Some(url);
            state.url_expires_at = expires;
        }
        if state.started_at.is_none() {
            state.started_at = Some(now());
        }
        self.state_store.save_file_state(&state).await?;
        self.progress.file_started(&spec.file_id, &spec.file_name, spec.size);

        // Chunks already `Complete` from a prior run of this process never
        // pass back through the chunk downloader's progress callback, so
        // their bytes are seeded here instead of being silently dropped
        // from the resumed total.
        let resumed_bytes: u64 = state
            .chunks
            .iter()
            .filter(|chunk| chunk.status == ChunkStatus::Complete)
            .map(|chunk| chunk.bytes_downloaded)
            .sum();
        if resumed_bytes > 0 {
            self.progress.bytes_advanced(&spec.file_id, resumed_bytes);
        }

        let chunks_dir = self.state_store.chunks_dir(&spec.file_id);
        tokio::fs::create_dir_all(&chunks_dir)
            .await
            .map_err(|source| EngineError::FileIo { source })?;

        let shared = Arc::new(Mutex::new(state));

        loop {
            let status = shared.lock().await.status;
            self.progress.file_status_changed(&spec.file_id, status);
            match status {
                FileStatus::Pending | FileStatus::Chunking => {
                    self.plan(&shared).await?;
                }
                FileStatus::Downloading => {
                    let result = self.download_all_chunks(&shared, &chunks_dir, &cancel).await;
                    self.advance_after_download_pass(&shared, result).await?;
                }
                FileStatus::Merging => {
                    self.merge_and_advance(&shared, &chunks_dir, spec).await?;
                }
                FileStatus::Verifying => {
                    self.verify_and_advance(&shared, &chunks_dir, spec).await?;
                }
                FileStatus::Complete => {
                    let final_state = shared.lock().await.clone();
                    info!(file_id = %spec.file_id, "file download complete");
                    self.progress.file_finished(&spec.file_id, None);
                    return Ok(DownloadOutcome {
                        file_id:   final_state.file_id,
                        file_name: final_state.file_name,
                        size:      final_state.size,
                        checksum:  final_state.checksum_expected,
                    });
                }
                FileStatus::Failed => {
                    let final_state = shared.lock().await;
                    let message = final_state.error.clone().unwrap_or_default();
                    warn!(file_id = %spec.file_id, error = %message, "file download failed");
                    self.progress.file_finished(&spec.file_id, Some(&message));
                    return FileFailedSnafu {
                        file_id: spec.file_id.clone(),
                        retries: final_state.retry_count as usize,
                    }
                    .fail();
                }
            }
        }
    }

    async fn plan(&self, shared: &Arc<Mutex<FileState>>) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = shared.lock().await;
            if state.chunks.is_empty() {
                state.chunk_size = self.config.chunk_size.as_bytes();
                state.chunks = planning::plan_chunks(state.size, state.chunk_size);
            }
            state.status = FileStatus::Downloading;
            state.clone()
        };
        self.state_store.save_file_state(&snapshot).await
    }

    /// Dispatches every still-incomplete chunk through the bounded
    /// per-file worker pool. Returns the MB/s throughput observed for each
    /// chunk that actually transferred bytes (in completion order), used
    /// by adaptive chunk sizing; chunks resumed from an already-complete
    /// part-file contribute no sample since nothing was timed.
    async fn download_all_chunks(
        &self,
        shared: &Arc<Mutex<FileState>>,
        chunks_dir: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<f64>, EngineError> {
        let (download_url, pending_indices) = {
            let state = shared.lock().await;
            let url = state.download_url.clone().expect("resolved before entering Downloading");
            let indices: Vec<usize> = state
                .chunks
                .iter()
                .enumerate()
                .filter(|(_, c)| c.status != ChunkStatus::Complete)
                .map(|(i, _)| i)
                .collect();
            (url, indices)
        };

        let semaphore = Arc::new(Semaphore::new(self.config.parallel_chunks.max(1)));
        let downloader = Arc::new(ChunkDownloader::new(self.client.clone(), self.config.max_chunk_retries));
        let mut join_set = tokio::task::JoinSet::new();

        for index in pending_indices {
            let semaphore = Arc::clone(&semaphore);
            let downloader = Arc::clone(&downloader);
            let download_url = download_url.clone();
            let token_provider = Arc::clone(&self.token_provider);
            let rate_limiter = self.rate_limiter.clone();
            let progress = Arc::clone(&self.progress);
            let chunks_dir = chunks_dir.to_path_buf();
            let shared = Arc::clone(shared);
            let state_store = Arc::clone(&self.state_store);
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
                downloader
                    .run(
                        &download_url,
                        &token_provider,
                        rate_limiter.as_ref(),
                        &progress,
                        &chunks_dir,
                        &shared,
                        &state_store,
                        index,
                        &cancel,
                    )
                    .await
            });
        }

        let mut first_error = None;
        let mut throughput_samples = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined.map_err(|_| EngineError::Cancelled)?;
            match outcome {
                Ok(sample) => throughput_samples.extend(sample),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    if first_error.as_ref().is_some_and(EngineError::is_cancellation) {
                        cancel.cancel();
                    }
                }
            }
        }
        first_error.map_or(Ok(throughput_samples), Err)
    }

    async fn advance_after_download_pass(
        &self,
        shared: &Arc<Mutex<FileState>>,
        result: Result<Vec<f64>, EngineError>,
    ) -> Result<(), EngineError> {
        match result {
            Ok(samples) => {
                if self.config.adaptive_chunks {
                    self.maybe_rechunk_tail(shared, &samples).await;
                }
                let snapshot = {
                    let mut state = shared.lock().await;
                    if state.all_chunks_complete() {
                        state.status = FileStatus::Merging;
                    }
                    state.clone()
                };
                self.state_store.save_file_state(&snapshot).await
            }
            Err(e) if e.is_cancellation() => {
                let snapshot = shared.lock().await.clone();
                self.state_store.save_file_state(&snapshot).await?;
                Err(e)
            }
            Err(e) => {
                let snapshot = {
                    let mut state = shared.lock().await;
                    state.error = Some(e.to_string());
                    if (state.retry_count as usize) < self.config.max_file_retries {
                        state.retry_count += 1;
                        state.status = FileStatus::Downloading;
                        for chunk in &mut state.chunks {
                            if chunk.status == ChunkStatus::Failed {
                                chunk.status = ChunkStatus::Pending;
                                chunk.bytes_downloaded = 0;
                            }
                        }
                    } else {
                        state.status = FileStatus::Failed;
                    }
                    state.clone()
                };
                self.state_store.save_file_state(&snapshot).await
            }
        }
    }

    /// Rescales the still-pending tail of the chunk plan based on the mean
    /// of the last `ADAPTIVE_WINDOW` chunk throughputs observed in the pass
    /// that just finished: faster than `ADAPTIVE_FAST_MBPS` grows the next
    /// chunk size, slower than `ADAPTIVE_SLOW_MBPS` shrinks it. Chunks
    /// already on disk are never touched; only the plan for bytes not yet
    /// fetched changes.
    async fn maybe_rechunk_tail(&self, shared: &Arc<Mutex<FileState>>, samples: &[f64]) {
        if samples.is_empty() {
            return;
        }
        let window = &samples[samples.len().saturating_sub(ADAPTIVE_WINDOW)..];
        let mean_mbps = window.iter().sum::<f64>() / window.len() as f64;

        let mut state = shared.lock().await;
        let current_size = state.chunk_size.max(1);
        let new_size = if mean_mbps > ADAPTIVE_FAST_MBPS {
            egafetch_base::ReadableSize(current_size).scale(ADAPTIVE_GROW_FACTOR).as_bytes()
        } else if mean_mbps < ADAPTIVE_SLOW_MBPS {
            egafetch_base::ReadableSize(current_size).scale(ADAPTIVE_SHRINK_FACTOR).as_bytes()
        } else {
            current_size
        };
        let new_size = egafetch_base::ReadableSize(new_size)
            .clamp_to(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
            .as_bytes();
        if new_size != current_size {
            debug!(file_id = %state.file_id, from = current_size, to = new_size, mean_mbps, "rechunking pending tail");
            state.chunk_size = new_size;
            planning::rechunk_pending_tail(&mut state.chunks, new_size);
        }
    }

    async fn merge_and_advance(
        &self,
        shared: &Arc<Mutex<FileState>>,
        chunks_dir: &std::path::Path,
        spec: &FileSpec,
    ) -> Result<(), EngineError> {
        let state = shared.lock().await.clone();
        let output_path = self.config.job_root.join(&spec.file_name);
        let (_total, digest) = merge::merge_chunks(&state, chunks_dir, &output_path).await?;

        let mut state = shared.lock().await;
        state.status = FileStatus::Verifying;
        state.merge_digest = Some(digest);
        let snapshot = state.clone();
        drop(state);
        self.state_store.save_file_state(&snapshot).await
    }

    async fn verify_and_advance(
        &self,
        shared: &Arc<Mutex<FileState>>,
        chunks_dir: &std::path::Path,
        spec: &FileSpec,
    ) -> Result<(), EngineError> {
        let digest = shared.lock().await.merge_digest.clone().unwrap_or_default();
        let verification = {
            let state = shared.lock().await;
            merge::verify_checksum(&state, &digest)
        };

        match verification {
            Ok(()) => {
                let output_path = self.config.job_root.join(&spec.file_name);
                let checksum_type = shared.lock().await.checksum_type.unwrap_or(ChecksumType::Sha256);
                merge::write_checksum_sidecar(&output_path, checksum_type, &digest, &spec.file_name).await?;
                self.state_store.clear_chunks(&spec.file_id).await?;
                let snapshot = {
                    let mut state = shared.lock().await;
                    state.status = FileStatus::Complete;
                    state.error = None;
                    state.merge_digest = None;
                    state.completed_at = Some(now());
                    state.clone()
                };
                self.state_store.save_file_state(&snapshot).await
            }
            Err(e) => {
                let will_retry = shared.lock().await.retry_count as usize + 1 <= self.config.max_file_retries;
                if will_retry {
                    // A checksum mismatch means the merged bytes are wrong
                    // somewhere in the part-file set, but not which one; every
                    // part-file is discarded so the chunk downloader's
                    // resume fast-path (`existing == expected` -> already
                    // complete) can't paper over whichever one was corrupt.
                    let indices: Vec<usize> = shared.lock().await.chunks.iter().map(|c| c.index).collect();
                    for index in indices {
                        let _ = tokio::fs::remove_file(chunks_dir.join(format!("{index:03}.part"))).await;
                    }
                }
                let snapshot = {
                    let mut state = shared.lock().await;
                    state.error = Some(e.to_string());
                    if will_retry {
                        state.retry_count += 1;
                        state.status = FileStatus::Downloading;
                        for chunk in &mut state.chunks {
                            chunk.status = ChunkStatus::Pending;
                            chunk.bytes_downloaded = 0;
                        }
                    } else {
                        state.status = FileStatus::Failed;
                    }
                    state.clone()
                };
                self.state_store.save_file_state(&snapshot).await
            }
        }
    }
}

fn now() -> String { jiff::Timestamp::now().to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_rfc3339_shaped() {
        let ts = now();
        assert!(ts.contains('T'));
        assert!(ts.ends_with('Z') || ts.contains('+'));
    }
}
