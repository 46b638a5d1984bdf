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

//! Stitches a file's completed part-files into the final output, hashing
//! the bytes as they stream through so verification costs no second pass
//! over the file.

use std::path::{Path, PathBuf};

use snafu::{ensure, ResultExt as _};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

use crate::{
    checksum::Hasher,
    error::{ChecksumMismatchSnafu, ChunkMissingSnafu, EngineError, FileIoSnafu},
    state_store::write_atomic,
    types::{ChecksumType, ChunkState, ChunkStatus, FileState},
};

const COPY_BUF_SIZE: usize = 256 * 1024;

/// Concatenates `state`'s completed part-files (in index order) into
/// `output_path` via a temp-file-then-rename, returning the digest of the
/// merged bytes computed with `checksum_type` (defaulting to sha256 if the
/// file carries no expected checksum type).
pub async fn merge_chunks(
    state: &FileState,
    chunks_dir: &Path,
    output_path: &Path,
) -> Result<(u64, String), EngineError> {
    ensure!(state.all_chunks_complete(), ChunkMissingSnafu { index: first_incomplete(&state.chunks) });

    let checksum_type = state.checksum_type.unwrap_or(ChecksumType::Sha256);
    let mut hasher = Hasher::new(checksum_type);
    let mut total: u64 = 0;

    let dir = output_path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(".tmp-{:016x}", rand::random::<u64>()));

    let result: Result<(), EngineError> = async {
        let mut out = tokio::fs::File::create(&tmp_path).await.context(FileIoSnafu)?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];

        for chunk in &state.chunks {
            let part_path = part_file_path(chunks_dir, chunk);
            let mut part = tokio::fs::File::open(&part_path)
                .await
                .map_err(|_| ChunkMissingSnafu { index: chunk.index }.build())?;
            loop {
                let n = part.read(&mut buf).await.context(FileIoSnafu)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n]).await.context(FileIoSnafu)?;
                total += n as u64;
            }
        }
        out.flush().await.context(FileIoSnafu)?;
        out.sync_all().await.context(FileIoSnafu)?;
        Ok(())
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        result?;
    }

    set_output_permissions(&tmp_path).await?;
    tokio::fs::rename(&tmp_path, output_path).await.context(FileIoSnafu)?;
    Ok((total, hasher.finalize_hex()))
}

/// Verifies `actual` against the file's expected checksum, if one was
/// supplied. Files with no expected checksum are considered verified by
/// definition (nothing to compare against).
pub fn verify_checksum(state: &FileState, actual: &str) -> Result<(), EngineError> {
    let Some(expected) = state.checksum_expected.as_deref() else {
        return Ok(());
    };
    ensure!(
        expected.eq_ignore_ascii_case(actual),
        ChecksumMismatchSnafu {
            expected: expected.to_string(),
            actual:   actual.to_string(),
        }
    );
    Ok(())
}

/// Writes a `<output>.md5` sidecar file containing the MD5 of the merged
/// output in canonical `md5sum` form (`<hex>  <basename>\n`), regardless of
/// which algorithm verification used: if `digest` wasn't already computed
/// as MD5, the output file is re-read and hashed with MD5 here.
pub async fn write_checksum_sidecar(
    output_path: &Path,
    checksum_type: ChecksumType,
    digest: &str,
    file_name: &str,
) -> Result<(), EngineError> {
    let md5_hex = if checksum_type == ChecksumType::Md5 {
        digest.to_string()
    } else {
        md5_of_file(output_path).await?
    };

    let mut sidecar_path = output_path.as_os_str().to_os_string();
    sidecar_path.push(".md5");
    let contents = format!("{md5_hex}  {file_name}\n");
    write_atomic(Path::new(&sidecar_path), contents.as_bytes()).await
}

async fn md5_of_file(path: &Path) -> Result<String, EngineError> {
    let mut file = tokio::fs::File::open(path).await.context(FileIoSnafu)?;
    let mut hasher = Hasher::new(ChecksumType::Md5);
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await.context(FileIoSnafu)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

fn part_file_path(chunks_dir: &Path, chunk: &ChunkState) -> PathBuf {
    chunks_dir.join(format!("{:03}.part", chunk.index))
}

fn first_incomplete(chunks: &[ChunkState]) -> usize {
    chunks
        .iter()
        .find(|c| c.status != ChunkStatus::Complete)
        .map_or(usize::MAX, |c| c.index)
}

#[cfg(unix)]
async fn set_output_permissions(path: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt as _;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .context(FileIoSnafu)
}

#[cfg(not(unix))]
async fn set_output_permissions(_path: &Path) -> Result<(), EngineError> { Ok(()) }

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::FileSpec;

    async fn write_part(dir: &Path, index: usize, contents: &[u8]) {
        tokio::fs::write(dir.join(format!("{index:03}.part")), contents).await.unwrap();
    }

    fn complete_chunk(index: usize, start: u64, end: u64) -> ChunkState {
        ChunkState {
            index,
            start,
            end,
            status: ChunkStatus::Complete,
            bytes_downloaded: end - start,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn merges_in_index_order_and_hashes() {
        let chunks_dir = TempDir::new().unwrap();
        write_part(chunks_dir.path(), 0, b"hello ").await;
        write_part(chunks_dir.path(), 1, b"world").await;

        let spec = FileSpec {
            file_id:       "EGAF001".into(),
            file_name:     "greeting.txt".into(),
            size:          11,
            checksum:      None,
            checksum_type: Some(ChecksumType::Sha256),
        };
        let mut state = FileState::new(&spec);
        state.chunks = vec![complete_chunk(0, 0, 6), complete_chunk(1, 6, 11)];

        let out_dir = TempDir::new().unwrap();
        let output_path = out_dir.path().join("greeting.txt");
        let (total, digest) = merge_chunks(&state, chunks_dir.path(), &output_path).await.unwrap();

        assert_eq!(total, 11);
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde"
        );
        let merged = tokio::fs::read(&output_path).await.unwrap();
        assert_eq!(merged, b"hello world");
    }

    #[tokio::test]
    async fn refuses_to_merge_incomplete_chunks() {
        let chunks_dir = TempDir::new().unwrap();
        let spec = FileSpec {
            file_id:       "EGAF001".into(),
            file_name:     "f.bin".into(),
            size:          10,
            checksum:      None,
            checksum_type: None,
        };
        let mut state = FileState::new(&spec);
        state.chunks = vec![ChunkState {
            index:            0,
            start:            0,
            end:              10,
            status:           ChunkStatus::Downloading,
            bytes_downloaded: 4,
            retry_count:      0,
        }];

        let out_dir = TempDir::new().unwrap();
        let result = merge_chunks(&state, chunks_dir.path(), &out_dir.path().join("f.bin")).await;
        assert!(matches!(result, Err(EngineError::ChunkMissing { index: 0 })));
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let spec = FileSpec {
            file_id:       "EGAF001".into(),
            file_name:     "f.bin".into(),
            size:          10,
            checksum:      Some("deadbeef".into()),
            checksum_type: Some(ChecksumType::Sha256),
        };
        let state = FileState::new(&spec);
        assert!(verify_checksum(&state, "cafebabe").is_err());
        assert!(verify_checksum(&state, "DEADBEEF").is_ok());
    }

    #[test]
    fn no_expected_checksum_always_verifies() {
        let spec = FileSpec {
            file_id:       "EGAF001".into(),
            file_name:     "f.bin".into(),
            size:          10,
            checksum:      None,
            checksum_type: None,
        };
        let state = FileState::new(&spec);
        assert!(verify_checksum(&state, "anything").is_ok());
    }
}
