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

//! Everything the engine persists to disk lives under `<job_root>/.egafetch`:
//! the job manifest, one state file per file, and a scratch directory of
//! part-files. Every write here goes temp-file-then-rename so a crash mid
//! write can never leave a half-written JSON document behind.

use std::path::{Path, PathBuf};

use snafu::ResultExt as _;

use crate::{
    error::{EngineError, FileIoSnafu, StateCorruptedSnafu},
    types::{FileState, Manifest},
};

const MANIFEST_FILE: &str = "manifest.json";
const STATE_DIR: &str = "state";
const CHUNKS_DIR: &str = "chunks";

/// Owns the `.egafetch` job directory for one `job_root`.
#[derive(Debug, Clone)]
pub struct StateStore {
    job_dir: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(job_root: impl AsRef<Path>) -> Self {
        Self {
            job_dir: job_root.as_ref().join(".egafetch"),
        }
    }

    pub async fn ensure_dirs(&self) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.job_dir).await.context(FileIoSnafu)?;
        tokio::fs::create_dir_all(self.state_dir()).await.context(FileIoSnafu)?;
        tokio::fs::create_dir_all(self.chunks_root()).await.context(FileIoSnafu)?;
        set_dir_permissions(&self.job_dir).await?;
        Ok(())
    }

    /// Remove the entire job directory, discarding all persisted progress.
    pub async fn reset(&self) -> Result<(), EngineError> {
        if tokio::fs::try_exists(&self.job_dir).await.context(FileIoSnafu)? {
            tokio::fs::remove_dir_all(&self.job_dir).await.context(FileIoSnafu)?;
        }
        Ok(())
    }

    fn state_dir(&self) -> PathBuf { self.job_dir.join(STATE_DIR) }

    fn manifest_path(&self) -> PathBuf { self.job_dir.join(MANIFEST_FILE) }

    fn state_path(&self, file_id: &str) -> PathBuf { self.state_dir().join(format!("{file_id}.json")) }

    /// Root directory holding one subdirectory of part-files per file.
    #[must_use]
    pub fn chunks_root(&self) -> PathBuf { self.job_dir.join(CHUNKS_DIR) }

    /// Directory holding `<index:03>.part` files for one file.
    #[must_use]
    pub fn chunks_dir(&self, file_id: &str) -> PathBuf { self.chunks_root().join(file_id) }

    pub async fn save_manifest(&self, manifest: &Manifest) -> Result<(), EngineError> {
        let json = serde_json::to_vec_pretty(manifest).expect("Manifest serializes infallibly");
        write_atomic(&self.manifest_path(), &json).await
    }

    pub async fn load_manifest(&self) -> Result<Option<Manifest>, EngineError> {
        let path = self.manifest_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| StateCorruptedSnafu { path }.build()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::FileIo { source: e }),
        }
    }

    pub async fn save_file_state(&self, state: &FileState) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(self.state_dir()).await.context(FileIoSnafu)?;
        let json = serde_json::to_vec_pretty(state).expect("FileState serializes infallibly");
        write_atomic(&self.state_path(&state.file_id), &json).await
    }

    pub async fn load_file_state(&self, file_id: &str) -> Result<Option<FileState>, EngineError> {
        let path = self.state_path(file_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| StateCorruptedSnafu { path }.build()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::FileIo { source: e }),
        }
    }

    pub async fn delete_file_state(&self, file_id: &str) -> Result<(), EngineError> {
        match tokio::fs::remove_file(self.state_path(file_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::FileIo { source: e }),
        }
    }

    /// All file states currently persisted, in no particular order.
    pub async fn list_file_states(&self) -> Result<Vec<FileState>, EngineError> {
        let dir = self.state_dir();
        if !tokio::fs::try_exists(&dir).await.context(FileIoSnafu)? {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await.context(FileIoSnafu)?;
        while let Some(entry) = entries.next_entry().await.context(FileIoSnafu)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await.context(FileIoSnafu)?;
            let state: FileState =
                serde_json::from_slice(&bytes).map_err(|_| StateCorruptedSnafu { path }.build())?;
            out.push(state);
        }
        Ok(out)
    }

    /// Remove the scratch part-files for one file once it has merged
    /// successfully.
    pub async fn clear_chunks(&self, file_id: &str) -> Result<(), EngineError> {
        let dir = self.chunks_dir(file_id);
        if tokio::fs::try_exists(&dir).await.context(FileIoSnafu)? {
            tokio::fs::remove_dir_all(&dir).await.context(FileIoSnafu)?;
        }
        Ok(())
    }
}

/// Write `contents` to `path` by writing a randomized `.tmp-*` sibling in
/// the same directory, flushing and fsyncing it, then renaming it onto
/// `path`. A reader never observes a partially written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), EngineError> {
    use tokio::io::AsyncWriteExt as _;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_name = format!(".tmp-{:016x}", rand::random::<u64>());
    let tmp_path = dir.join(tmp_name);

    let result: Result<(), EngineError> = async {
        let mut file = tokio::fs::File::create(&tmp_path).await.context(FileIoSnafu)?;
        file.write_all(contents).await.context(FileIoSnafu)?;
        file.flush().await.context(FileIoSnafu)?;
        file.sync_all().await.context(FileIoSnafu)?;
        set_file_permissions(&tmp_path).await?;
        tokio::fs::rename(&tmp_path, path).await.context(FileIoSnafu)?;
        Ok(())
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

#[cfg(unix)]
async fn set_file_permissions(path: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt as _;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .context(FileIoSnafu)
}

#[cfg(not(unix))]
async fn set_file_permissions(_path: &Path) -> Result<(), EngineError> { Ok(()) }

#[cfg(unix)]
async fn set_dir_permissions(path: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt as _;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .context(FileIoSnafu)
}

#[cfg(not(unix))]
async fn set_dir_permissions(_path: &Path) -> Result<(), EngineError> { Ok(()) }

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::FileSpec;

    #[tokio::test]
    async fn manifest_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_dirs().await.unwrap();

        let manifest = Manifest {
            dataset_id: Some("EGAD001".into()),
            files:      vec![FileSpec {
                file_id:       "EGAF001".into(),
                file_name:     "sample.bam".into(),
                size:          1024,
                checksum:      None,
                checksum_type: None,
            }],
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        store.save_manifest(&manifest).await.unwrap();

        let loaded = store.load_manifest().await.unwrap().unwrap();
        assert_eq!(loaded.dataset_id, manifest.dataset_id);
        assert_eq!(loaded.files.len(), 1);
    }

    #[tokio::test]
    async fn missing_manifest_is_none_not_error() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_state_round_trips_and_lists() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_dirs().await.unwrap();

        let spec = FileSpec {
            file_id:       "EGAF001".into(),
            file_name:     "sample.bam".into(),
            size:          2048,
            checksum:      None,
            checksum_type: None,
        };
        let state = FileState::new(&spec);
        store.save_file_state(&state).await.unwrap();

        let loaded = store.load_file_state("EGAF001").await.unwrap().unwrap();
        assert_eq!(loaded.file_id, "EGAF001");

        let all = store.list_file_states().await.unwrap();
        assert_eq!(all.len(), 1);

        store.delete_file_state("EGAF001").await.unwrap();
        assert!(store.load_file_state("EGAF001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_state_file_is_reported_not_panicked() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_dirs().await.unwrap();
        tokio::fs::write(store.state_path("broken"), b"not json").await.unwrap();

        let result = store.load_file_state("broken").await;
        assert!(matches!(result, Err(EngineError::StateCorrupted { .. })));
    }

    #[tokio::test]
    async fn reset_removes_job_dir() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_dirs().await.unwrap();
        store.reset().await.unwrap();
        assert!(!tokio::fs::try_exists(dir.path().join(".egafetch")).await.unwrap());
    }
}
