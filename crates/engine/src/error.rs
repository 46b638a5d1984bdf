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

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EngineError {
    #[snafu(display("network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("HTTP {status} from {url}"))]
    Http {
        status: u16,
        url:    String,
        body:   String,
    },

    #[snafu(display("checksum mismatch: expected {expected}, got {actual}"))]
    ChecksumMismatch { expected: String, actual: String },

    #[snafu(display("file I/O error: {source}"))]
    FileIo { source: std::io::Error },

    #[snafu(display("state file corrupted at {}", path.display()))]
    StateCorrupted { path: PathBuf },

    #[snafu(display("chunk {index} missing on disk"))]
    ChunkMissing { index: usize },

    #[snafu(display("chunk {index} failed after {retries} attempts: {message}"))]
    ChunkFailed {
        index:   usize,
        retries: usize,
        message: String,
    },

    #[snafu(display("file {file_id} failed after {retries} retries"))]
    FileFailed { file_id: String, retries: usize },

    #[snafu(display("download cancelled"))]
    Cancelled,

    #[snafu(display("access token unavailable: {message}"))]
    AuthUnavailable { message: String },

    #[snafu(display("metadata unavailable: {message}"))]
    MetadataUnavailable { message: String },
}

impl EngineError {
    /// Classify this error per the engine's retry taxonomy.
    ///
    /// Transport and server-side (5xx/429) errors are retryable; everything
    /// else (client errors, checksum mismatches, cancellation, local I/O) is
    /// not. Transport is checked ahead of cancellation on purpose: some
    /// underlying HTTP stacks fold a connect-timeout into a
    /// deadline-exceeded-shaped error, and classifying cancellation first
    /// would silently disable retries on a plain dial timeout.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Cancelled
            | Self::ChecksumMismatch { .. }
            | Self::FileIo { .. }
            | Self::StateCorrupted { .. }
            | Self::ChunkMissing { .. }
            | Self::ChunkFailed { .. }
            | Self::FileFailed { .. }
            | Self::AuthUnavailable { .. }
            | Self::MetadataUnavailable { .. } => false,
        }
    }

    #[must_use]
    pub const fn is_cancellation(&self) -> bool { matches!(self, Self::Cancelled) }
}
