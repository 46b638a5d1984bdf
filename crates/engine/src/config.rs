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

use std::path::PathBuf;

use bon::Builder;
use egafetch_base::ReadableSize;
use smart_default::SmartDefault;

/// The minimum chunk size the adaptive sizer will shrink to.
pub const MIN_CHUNK_SIZE: ReadableSize = ReadableSize::mb(8);
/// The maximum chunk size the adaptive sizer will grow to.
pub const MAX_CHUNK_SIZE: ReadableSize = ReadableSize::mb(256);

/// Tunables for one engine run. Defaults match what a single, well-behaved
/// `egafetch download` invocation should use against the EGA data API
/// without any flags.
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct EngineConfig {
    /// Where files, the `.egafetch` job directory, and part-files live.
    #[default(_code = "std::env::current_dir().unwrap_or_else(|_| PathBuf::from(\".\"))")]
    pub job_root: PathBuf,

    /// Number of files downloaded concurrently.
    #[default(4)]
    pub parallel_files: usize,

    /// Number of chunks downloaded concurrently per file.
    #[default(8)]
    pub parallel_chunks: usize,

    /// Target chunk size for newly planned files.
    #[default(ReadableSize::mb(64))]
    pub chunk_size: ReadableSize,

    /// Aggregate bandwidth cap shared by every chunk worker across every
    /// file, or `None` for no cap.
    #[default(None)]
    pub max_bandwidth: Option<ReadableSize>,

    /// Grow or shrink `chunk_size` based on observed per-chunk throughput.
    #[default(false)]
    pub adaptive_chunks: bool,

    /// Discard any existing job state and start every file from scratch.
    #[default(false)]
    pub restart: bool,

    /// Retries per chunk before the owning file is marked failed.
    #[default(5)]
    pub max_chunk_retries: usize,

    /// Retries per file (a full re-pass over its still-incomplete chunks)
    /// before giving up on it for good.
    #[default(3)]
    pub max_file_retries: usize,

    /// Connect timeout for the streaming HTTP client. Chunk body reads are
    /// never subject to a deadline; the engine relies on TCP keep-alives
    /// and its own retry loop instead.
    #[default(std::time::Duration::from_secs(30))]
    pub request_timeout: std::time::Duration,

    /// `User-Agent` sent with every request.
    #[default(concat!("egafetch/", env!("CARGO_PKG_VERSION")).to_string())]
    pub user_agent: String,
}

impl EngineConfig {
    #[must_use]
    pub fn job_dir(&self) -> PathBuf { self.job_root.join(".egafetch") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::builder().build();
        assert_eq!(config.parallel_files, 4);
        assert_eq!(config.parallel_chunks, 8);
        assert_eq!(config.chunk_size, ReadableSize::mb(64));
        assert!(config.max_bandwidth.is_none());
        assert!(!config.adaptive_chunks);
        assert_eq!(config.max_chunk_retries, 5);
        assert_eq!(config.max_file_retries, 3);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = EngineConfig::builder()
            .parallel_files(1)
            .chunk_size(ReadableSize::mb(16))
            .max_bandwidth(ReadableSize::mb(100))
            .build();
        assert_eq!(config.parallel_files, 1);
        assert_eq!(config.chunk_size, ReadableSize::mb(16));
        assert_eq!(config.max_bandwidth, Some(ReadableSize::mb(100)));
    }
}
