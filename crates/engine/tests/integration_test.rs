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

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_test::TestServer;
use egafetch_engine::{
    build_manifest, ChunkStatus, EngineConfig, FileSpec, FileStatus, Orchestrator, StaticMetadataClient,
    StaticTokenProvider,
};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct AppState {
    content:       Arc<Vec<u8>>,
    accept_ranges: bool,
    flaky_until:   Option<Arc<std::sync::atomic::AtomicUsize>>,
}

async fn handle_get(headers: HeaderMap, State(state): State<AppState>) -> Response {
    if let Some(flaky) = state.flaky_until.as_ref() {
        let attempt = flaky.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if attempt == 0 {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let total_len = state.content.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, total_len));

    if state.accept_ranges {
        if let Some((start, end)) = range {
            let slice = &state.content[start..=end];
            let mut out = HeaderMap::new();
            out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            out.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{total_len}")).unwrap(),
            );
            return (StatusCode::PARTIAL_CONTENT, out, Bytes::copy_from_slice(slice)).into_response();
        }
    }

    (StatusCode::OK, Bytes::copy_from_slice(&state.content)).into_response()
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let value = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = value.split_once('-')?;
    let start: usize = start_str.parse().ok()?;
    let end: usize = end_str.parse().ok()?;
    (start <= end && end < total).then_some((start, end))
}

fn start_server(state: AppState) -> TestServer {
    let app = Router::new().route("/file", get(handle_get)).with_state(state);
    TestServer::builder().http_transport().build(app).expect("test server starts")
}

fn file_url(server: &TestServer) -> String {
    let base = server.server_address().expect("server has an http address").to_string();
    if base.ends_with('/') {
        format!("{base}file")
    } else {
        format!("{base}/file")
    }
}

fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn test_config(job_root: &std::path::Path) -> EngineConfig {
    EngineConfig::builder()
        .job_root(job_root.to_path_buf())
        .parallel_files(2)
        .parallel_chunks(4)
        .chunk_size(egafetch_base::ReadableSize::kb(4))
        .max_chunk_retries(2)
        .max_file_retries(1)
        .build()
}

fn single_file_manifest(file_id: &str, file_name: &str, content: &[u8], with_checksum: bool) -> egafetch_engine::Manifest {
    let spec = FileSpec {
        file_id:       file_id.to_string(),
        file_name:     file_name.to_string(),
        size:          content.len() as u64,
        checksum:      with_checksum.then(|| sha256_hex(content)),
        checksum_type: with_checksum.then_some(egafetch_engine::ChecksumType::Sha256),
    };
    build_manifest(None, vec![spec], "2026-01-01T00:00:00Z".to_string())
}

#[tokio::test]
async fn fresh_download_merges_chunks_and_verifies_checksum() {
    let content = b"egafetch-integration-test-payload-".repeat(500);
    let server = start_server(AppState {
        content:       Arc::new(content.clone()),
        accept_ranges: true,
        flaky_until:   None,
    });
    let url = file_url(&server);

    let job_root = TempDir::new().unwrap();
    let manifest = single_file_manifest("EGAF001", "payload.bin", &content, true);

    let mut urls = HashMap::new();
    urls.insert("EGAF001".to_string(), url);
    let metadata = Arc::new(StaticMetadataClient::new(urls));
    let tokens = Arc::new(StaticTokenProvider("tok".to_string()));

    let orchestrator = Orchestrator::new(test_config(job_root.path()), tokens, metadata).unwrap();
    let report = orchestrator.run(&manifest, CancellationToken::new()).await.unwrap();

    assert_eq!(report.completed.len(), 1);
    assert!(report.failed.is_empty());

    let downloaded = tokio::fs::read(job_root.path().join("payload.bin")).await.unwrap();
    assert_eq!(downloaded, content);

    let sidecar = tokio::fs::read_to_string(job_root.path().join("payload.sha256")).await.unwrap();
    assert!(sidecar.contains(&sha256_hex(&content)));
}

#[tokio::test]
async fn resume_skips_chunks_already_marked_complete() {
    let content = b"resume-test-content-chunk-body-".repeat(600);
    let server = start_server(AppState {
        content:       Arc::new(content.clone()),
        accept_ranges: true,
        flaky_until:   None,
    });
    let url = file_url(&server);

    let job_root = TempDir::new().unwrap();
    let manifest = single_file_manifest("EGAF002", "resume.bin", &content, false);

    let store = egafetch_engine::StateStore::new(job_root.path());
    store.ensure_dirs().await.unwrap();

    let spec = &manifest.files[0];
    let mut state = egafetch_engine::FileState::new(spec);
    state.status = FileStatus::Downloading;
    state.chunk_size = 4096;
    state.chunks = egafetch_engine::planning::plan_chunks(content.len() as u64, 4096);
    state.download_url = Some(url.clone());

    // Pre-complete the first chunk on disk, as if a prior run got this far.
    let chunks_dir = store.chunks_dir(&spec.file_id);
    tokio::fs::create_dir_all(&chunks_dir).await.unwrap();
    let first = &state.chunks[0];
    tokio::fs::write(
        chunks_dir.join("000.part"),
        &content[first.start as usize..first.end as usize],
    )
    .await
    .unwrap();
    state.chunks[0].status = ChunkStatus::Complete;
    state.chunks[0].bytes_downloaded = first.end - first.start;
    store.save_file_state(&state).await.unwrap();

    let mut urls = HashMap::new();
    urls.insert("EGAF002".to_string(), url);
    let metadata = Arc::new(StaticMetadataClient::new(urls));
    let tokens = Arc::new(StaticTokenProvider("tok".to_string()));

    let orchestrator = Orchestrator::new(test_config(job_root.path()), tokens, metadata).unwrap();
    let report = orchestrator.run(&manifest, CancellationToken::new()).await.unwrap();

    assert_eq!(report.completed.len(), 1);
    let downloaded = tokio::fs::read(job_root.path().join("resume.bin")).await.unwrap();
    assert_eq!(downloaded, content);
}

#[tokio::test]
async fn server_ignoring_range_still_completes_via_full_body() {
    let content = b"no-range-support-".repeat(800);
    let server = start_server(AppState {
        content:       Arc::new(content.clone()),
        accept_ranges: false,
        flaky_until:   None,
    });
    let url = file_url(&server);

    let job_root = TempDir::new().unwrap();
    let mut config = test_config(job_root.path());
    config.parallel_chunks = 1;
    config.chunk_size = egafetch_base::ReadableSize(content.len() as u64);
    let manifest = single_file_manifest("EGAF003", "whole.bin", &content, false);

    let mut urls = HashMap::new();
    urls.insert("EGAF003".to_string(), url);
    let metadata = Arc::new(StaticMetadataClient::new(urls));
    let tokens = Arc::new(StaticTokenProvider("tok".to_string()));

    let orchestrator = Orchestrator::new(config, tokens, metadata).unwrap();
    let report = orchestrator.run(&manifest, CancellationToken::new()).await.unwrap();

    assert_eq!(report.completed.len(), 1);
    let downloaded = tokio::fs::read(job_root.path().join("whole.bin")).await.unwrap();
    assert_eq!(downloaded, content);
}

#[tokio::test]
async fn checksum_mismatch_fails_the_file() {
    let content = b"checksum-mismatch-test-".repeat(300);
    let server = start_server(AppState {
        content:       Arc::new(content.clone()),
        accept_ranges: true,
        flaky_until:   None,
    });
    let url = file_url(&server);

    let job_root = TempDir::new().unwrap();
    let spec = FileSpec {
        file_id:       "EGAF004".to_string(),
        file_name:     "bad.bin".to_string(),
        size:          content.len() as u64,
        checksum:      Some("0".repeat(64)),
        checksum_type: Some(egafetch_engine::ChecksumType::Sha256),
    };
    let manifest = build_manifest(None, vec![spec], "2026-01-01T00:00:00Z".to_string());

    let mut urls = HashMap::new();
    urls.insert("EGAF004".to_string(), url);
    let metadata = Arc::new(StaticMetadataClient::new(urls));
    let tokens = Arc::new(StaticTokenProvider("tok".to_string()));

    let orchestrator = Orchestrator::new(test_config(job_root.path()), tokens, metadata).unwrap();
    let report = orchestrator.run(&manifest, CancellationToken::new()).await.unwrap();

    assert!(report.completed.is_empty());
    assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn cancellation_stops_the_run() {
    let content = b"cancel-me-".repeat(5000);
    let server = start_server(AppState {
        content:       Arc::new(content.clone()),
        accept_ranges: true,
        flaky_until:   None,
    });
    let url = file_url(&server);

    let job_root = TempDir::new().unwrap();
    let manifest = single_file_manifest("EGAF005", "cancelled.bin", &content, false);

    let mut urls = HashMap::new();
    urls.insert("EGAF005".to_string(), url);
    let metadata = Arc::new(StaticMetadataClient::new(urls));
    let tokens = Arc::new(StaticTokenProvider("tok".to_string()));

    let mut config = test_config(job_root.path());
    config.chunk_size = egafetch_base::ReadableSize(64);
    config.parallel_chunks = 1;

    let orchestrator = Orchestrator::new(config, tokens, metadata).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = orchestrator.run(&manifest, cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(report.completed.is_empty());
}
