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

//! The on-disk data model: the job manifest, per-file state, and per-chunk
//! state. These types round-trip through JSON exactly as written to
//! `.egafetch/manifest.json` and `.egafetch/state/<file_id>.json`, so field
//! names and the shape of the enums are part of the on-disk contract.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// The checksum algorithm a server advertises for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Md5,
    Sha256,
}

/// One file to be fetched, as handed to the engine by whatever resolves EGA
/// dataset metadata into concrete download targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSpec {
    pub file_id:       String,
    pub file_name:     String,
    pub size:          u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<ChecksumType>,
}

/// The full set of files a single invocation is responsible for, plus
/// bookkeeping shared across the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    pub files:      Vec<FileSpec>,
    pub created_at: String,
    pub updated_at: String,
}

/// Status of a single chunk. Transitions: `Pending -> Downloading ->
/// Complete`, or `Downloading -> Failed -> Downloading` on a retryable
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Downloading,
    Complete,
    Failed,
}

/// A contiguous, half-open byte range `[start, end)` of a file, tracked as
/// its own unit of retry and resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkState {
    pub index:            usize,
    pub start:             u64,
    pub end:               u64,
    pub status:            ChunkStatus,
    #[serde(default)]
    pub bytes_downloaded: u64,
    #[serde(default)]
    pub retry_count:       u32,
}

impl ChunkState {
    #[must_use]
    pub const fn len(&self) -> u64 { self.end - self.start }

    #[must_use]
    pub const fn is_empty(&self) -> bool { self.start == self.end }

    #[must_use]
    pub const fn remaining(&self) -> u64 { self.len().saturating_sub(self.bytes_downloaded) }
}

/// Status of a single file. Mirrors the pipeline stages it passes through:
/// planning its chunks, downloading them, merging the parts, verifying the
/// whole, and finally resting at `Complete` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Chunking,
    Downloading,
    Merging,
    Verifying,
    Complete,
    Failed,
}

/// Persisted state for one file, written to
/// `.egafetch/state/<file_id>.json` after every status transition and
/// after every chunk completion or failure. Unknown fields are tolerated on
/// read so the schema can grow without breaking resume of jobs started by
/// an older version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub file_id:            String,
    pub file_name:           String,
    pub status:              FileStatus,
    pub size:                u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type:      Option<ChecksumType>,
    pub chunk_size:          u64,
    #[serde(default)]
    pub chunks:              Vec<ChunkState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url:       Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_expires_at:     Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:               Option<String>,
    /// Digest computed while merging part-files, held here so a crash
    /// between `Merging` and `Verifying` can resume straight into
    /// verification instead of re-merging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_digest:        Option<String>,
    #[serde(default)]
    pub retry_count:         u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at:          Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at:        Option<String>,
}

impl FileState {
    #[must_use]
    pub fn new(spec: &FileSpec) -> Self {
        Self {
            file_id:          spec.file_id.clone(),
            file_name:        spec.file_name.clone(),
            status:           FileStatus::Pending,
            size:             spec.size,
            checksum_expected: spec.checksum.clone(),
            checksum_type:    spec.checksum_type,
            chunk_size:       0,
            chunks:           Vec::new(),
            download_url:     None,
            url_expires_at:   None,
            error:            None,
            merge_digest:     None,
            retry_count:      0,
            started_at:       None,
            completed_at:     None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool { matches!(self.status, FileStatus::Complete | FileStatus::Failed) }

    #[must_use]
    pub fn bytes_downloaded(&self) -> u64 { self.chunks.iter().map(|c| c.bytes_downloaded).sum() }

    #[must_use]
    pub fn all_chunks_complete(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.status == ChunkStatus::Complete)
    }
}

/// Outcome of a completed file download, returned up through the
/// orchestrator to the caller.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub file_id:   String,
    pub file_name: String,
    pub size:      u64,
    pub checksum:  Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_len_and_remaining() {
        let chunk = ChunkState {
            index:            0,
            start:            0,
            end:              1024,
            status:           ChunkStatus::Downloading,
            bytes_downloaded: 100,
            retry_count:      0,
        };
        assert_eq!(chunk.len(), 1024);
        assert_eq!(chunk.remaining(), 924);
    }

    #[test]
    fn file_state_rejects_incomplete_chunks_as_complete() {
        let spec = FileSpec {
            file_id:       "EGAF001".into(),
            file_name:     "sample.bam".into(),
            size:          2048,
            checksum:      None,
            checksum_type: None,
        };
        let mut state = FileState::new(&spec);
        assert!(!state.all_chunks_complete());
        state.chunks.push(ChunkState {
            index:            0,
            start:            0,
            end:              2048,
            status:           ChunkStatus::Downloading,
            bytes_downloaded: 2048,
            retry_count:      0,
        });
        assert!(!state.all_chunks_complete());
        state.chunks[0].status = ChunkStatus::Complete;
        assert!(state.all_chunks_complete());
    }

    #[test]
    fn status_round_trips_lowercase() {
        let json = serde_json::to_string(&FileStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
        let back: FileStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FileStatus::Downloading);
    }
}
