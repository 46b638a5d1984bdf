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

//! A byte-precise, resumable, chunked HTTP download engine for EGA data
//! files: it schedules a set of files across a bounded worker pool, splits
//! each into byte-range chunks fetched by a second bounded pool, persists
//! progress after every transition so a killed process picks up where it
//! left off, and merges and verifies the result.
//!
//! Token acquisition, EGA metadata resolution, and any user interface are
//! out of scope: this crate only needs a [`TokenProvider`] and a
//! [`MetadataClient`] to drive against, and emits progress through a
//! [`ProgressSink`].

pub mod auth;
pub mod checksum;
pub mod chunk_downloader;
pub mod config;
pub mod error;
pub mod file_downloader;
pub mod merge;
pub mod metadata;
pub mod orchestrator;
pub mod planning;
pub mod progress;
pub mod rate_limiter;
pub mod state_store;
pub mod types;

pub use auth::{CachingTokenProvider, StaticTokenProvider, TokenProvider};
pub use checksum::Hasher;
pub use config::EngineConfig;
pub use error::EngineError;
pub use file_downloader::FileDownloader;
pub use metadata::{MetadataClient, StaticMetadataClient};
pub use orchestrator::{build_manifest, Orchestrator, RunReport};
pub use progress::{NullSink, ProgressSink};
pub use rate_limiter::RateLimiter;
pub use state_store::StateStore;
pub use types::{
    ChecksumType, ChunkState, ChunkStatus, DownloadOutcome, FileSpec, FileState, FileStatus, Manifest,
};
