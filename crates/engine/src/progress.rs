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

//! Progress reporting is an observer the engine calls into, never a
//! dependency it carries an opinion about. A CLI wires up a bar renderer;
//! a test wires up nothing.

use crate::types::FileStatus;

/// Sink for progress events emitted during a download run. Every method has
/// a default no-op body so implementors only override what they render.
pub trait ProgressSink: Send + Sync {
    /// A file entered the pipeline; `total` is its size in bytes.
    fn file_started(&self, file_id: &str, file_name: &str, total: u64) { let _ = (file_id, file_name, total); }

    /// `delta` additional bytes have landed on disk for `file_id` since the
    /// last call. Called from chunk workers, so implementations must be
    /// safe to call from multiple tasks concurrently.
    fn bytes_advanced(&self, file_id: &str, delta: u64) { let _ = (file_id, delta); }

    /// `file_id` transitioned to `status`.
    fn file_status_changed(&self, file_id: &str, status: FileStatus) { let _ = (file_id, status); }

    /// `file_id` reached a terminal state; `error` is set iff it failed.
    fn file_finished(&self, file_id: &str, error: Option<&str>) { let _ = (file_id, error); }

    /// `file_id` was already `Complete` on disk when the run started, so
    /// the orchestrator never gave it a download slot.
    fn file_skipped(&self, file_id: &str, file_name: &str) { let _ = (file_id, file_name); }
}

/// A `ProgressSink` that discards every event, used by tests and by
/// library callers that don't want progress output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {}
