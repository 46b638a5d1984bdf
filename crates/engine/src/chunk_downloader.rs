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

//! Fetches a single chunk's byte range, resuming from whatever part-file
//! bytes are already on disk, and owns the chunk's retry loop end to end:
//! every attempt's outcome is folded back into the shared `FileState` and
//! persisted before the next attempt (or before bubbling the error up).

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use backon::{Backoff, BackoffBuilder as _, ExponentialBuilder};
use futures::StreamExt as _;
use snafu::ResultExt as _;
use tokio::{io::AsyncWriteExt as _, sync::Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    auth::TokenProvider,
    error::{EngineError, FileIoSnafu, HttpSnafu, NetworkSnafu},
    progress::ProgressSink,
    rate_limiter::RateLimiter,
    state_store::StateStore,
    types::{ChunkStatus, FileState},
};

const READ_BUF_SIZE: usize = 32 * 1024;
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Fetches one chunk of one file over HTTP, retrying on transport and
/// server errors.
pub struct ChunkDownloader {
    client:      reqwest::Client,
    max_retries: usize,
}

impl ChunkDownloader {
    #[must_use]
    pub const fn new(client: reqwest::Client, max_retries: usize) -> Self { Self { client, max_retries } }

    /// Runs the full retry loop for chunk `index` of `file_state`,
    /// persisting after every completion or failed attempt. Returns once
    /// the chunk reaches `Complete` (carrying the transfer's throughput in
    /// MB/s, if an actual network fetch happened rather than a
    /// resume-from-already-complete fast path), or once retries are
    /// exhausted / a non-retryable error is hit, in which case the last
    /// error is returned.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        download_url: &str,
        token_provider: &Arc<dyn TokenProvider>,
        rate_limiter: Option<&Arc<RateLimiter>>,
        progress: &Arc<dyn ProgressSink>,
        chunks_dir: &Path,
        file_state: &Arc<Mutex<FileState>>,
        state_store: &StateStore,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, EngineError> {
        let (file_id, start, end) = {
            let state = file_state.lock().await;
            let chunk = &state.chunks[index];
            (state.file_id.clone(), chunk.start, chunk.end)
        };
        let part_path = chunks_dir.join(format!("{index:03}.part"));
        let attempts_total = self.max_retries + 1;
        let mut backoff = exponential_backoff();

        for attempt in 1..=attempts_total {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let outcome = self
                .try_once(
                    download_url,
                    token_provider,
                    rate_limiter,
                    progress,
                    &file_id,
                    &part_path,
                    start,
                    end,
                    cancel,
                )
                .await;

            match outcome {
                Ok((total_written, throughput_mbps)) => {
                    self.mark_complete(file_state, state_store, index, total_written).await?;
                    return Ok(throughput_mbps);
                }
                Err(e) => {
                    if e.is_cancellation() {
                        return Err(e);
                    }
                    self.mark_failed(file_state, state_store, index).await?;
                    let retryable = e.is_retryable();
                    if !retryable || attempt == attempts_total {
                        return Err(e);
                    }
                    let delay = backoff.next().unwrap_or(MAX_DELAY) + jitter();
                    warn!(file_id = %file_id, chunk = index, attempt, ?delay, "chunk attempt failed, retrying");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                }
            }
        }
        unreachable!("loop always returns by the last attempt")
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_once(
        &self,
        download_url: &str,
        token_provider: &Arc<dyn TokenProvider>,
        rate_limiter: Option<&Arc<RateLimiter>>,
        progress: &Arc<dyn ProgressSink>,
        file_id: &str,
        part_path: &PathBuf,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<(u64, Option<f64>), EngineError> {
        let expected = end - start;
        if expected == 0 {
            tokio::fs::File::create(part_path).await.context(FileIoSnafu)?;
            return Ok((0, None));
        }

        let existing = tokio::fs::metadata(part_path).await.map(|m| m.len()).unwrap_or(0).min(expected);
        if existing == expected {
            progress.bytes_advanced(file_id, existing);
            return Ok((existing, None));
        }

        let token = token_provider.token().await?;
        let range_start = start + existing;
        let response = self
            .client
            .get(download_url)
            .header(reqwest::header::RANGE, format!("bytes={range_start}-{}", end - 1))
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .context(NetworkSnafu)?;

        let status = response.status();
        let (mut file, mut already_written) = if status == reqwest::StatusCode::PARTIAL_CONTENT {
            let file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(part_path)
                .await
                .context(FileIoSnafu)?;
            (file, existing)
        } else if status == reqwest::StatusCode::OK {
            token_provider.invalidate().await;
            let file = tokio::fs::File::create(part_path).await.context(FileIoSnafu)?;
            (file, 0)
        } else {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                token_provider.invalidate().await;
            }
            let url = download_url.to_string();
            let body = response.text().await.unwrap_or_default();
            return HttpSnafu {
                status: status.as_u16(),
                url,
                body,
            }
            .fail();
        };

        let transfer_started = Instant::now();
        let mut bytes_this_attempt = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(next) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let bytes = next.context(NetworkSnafu)?;
            if let Some(limiter) = rate_limiter {
                limiter.acquire(bytes.len() as u64, cancel).await?;
            }
            for slice in bytes.chunks(READ_BUF_SIZE) {
                file.write_all(slice).await.context(FileIoSnafu)?;
            }
            already_written += bytes.len() as u64;
            bytes_this_attempt += bytes.len() as u64;
            progress.bytes_advanced(file_id, bytes.len() as u64);
        }
        file.flush().await.context(FileIoSnafu)?;

        let elapsed = transfer_started.elapsed().as_secs_f64();
        let throughput_mbps =
            (bytes_this_attempt > 0 && elapsed > 0.0).then(|| (bytes_this_attempt as f64 / elapsed) / (1024.0 * 1024.0));
        Ok((already_written, throughput_mbps))
    }

    async fn mark_complete(
        &self,
        file_state: &Arc<Mutex<FileState>>,
        state_store: &StateStore,
        index: usize,
        bytes_downloaded: u64,
    ) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = file_state.lock().await;
            let chunk = &mut state.chunks[index];
            chunk.status = ChunkStatus::Complete;
            chunk.bytes_downloaded = bytes_downloaded;
            state.clone()
        };
        state_store.save_file_state(&snapshot).await
    }

    async fn mark_failed(
        &self,
        file_state: &Arc<Mutex<FileState>>,
        state_store: &StateStore,
        index: usize,
    ) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = file_state.lock().await;
            let chunk = &mut state.chunks[index];
            chunk.status = ChunkStatus::Failed;
            chunk.retry_count += 1;
            state.clone()
        };
        state_store.save_file_state(&snapshot).await
    }
}

/// Builds the retry-delay sequence: doubling from `BASE_DELAY`, capped at
/// `MAX_DELAY`. Jitter is added separately at the call site, since `backon`'s
/// own jitter support ties to the `rand` feature we'd rather not pull in
/// just for this.
fn exponential_backoff() -> impl Backoff {
    ExponentialBuilder::default()
        .with_min_delay(BASE_DELAY)
        .with_max_delay(MAX_DELAY)
        .without_max_times()
        .build()
}

/// Up to a second of jitter, so that simultaneous chunk failures across a
/// file don't all retry in lockstep.
fn jitter() -> Duration { Duration::from_millis(rand::random::<u64>() % 1000) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = exponential_backoff();
        let first = backoff.next().unwrap();
        let mut last = first;
        for delay in backoff.by_ref().take(20) {
            last = delay;
        }
        assert!(first <= Duration::from_secs(1));
        assert!(last <= MAX_DELAY);
    }
}
