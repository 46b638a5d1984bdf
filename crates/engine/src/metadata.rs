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

//! Resolving an EGA dataset or file accession into a signed download URL is
//! out of scope here too: it belongs to a client for the EGA metadata API.
//! The engine only needs a fresh, directly fetchable URL per file.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{EngineError, MetadataUnavailableSnafu};

/// Resolves a file to a URL the engine can issue ranged GETs against.
/// Implementations decide how long a returned URL stays valid; the engine
/// resolves once per file (caching the result in `FileState.download_url`)
/// and reuses it for every chunk and every retry of that file.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Returns the direct download URL for `file_id`, and optionally an
    /// ISO-8601 timestamp past which it should be considered stale.
    async fn resolve_download_url(&self, file_id: &str) -> Result<(String, Option<String>), EngineError>;
}

/// A `MetadataClient` backed by a fixed `file_id -> url` table, for tests
/// and for callers who already have direct URLs in hand (e.g. from a
/// manifest exported by an out-of-band listing step).
#[derive(Debug, Default, Clone)]
pub struct StaticMetadataClient {
    urls: HashMap<String, String>,
}

impl StaticMetadataClient {
    #[must_use]
    pub fn new(urls: HashMap<String, String>) -> Self { Self { urls } }
}

#[async_trait]
impl MetadataClient for StaticMetadataClient {
    async fn resolve_download_url(&self, file_id: &str) -> Result<(String, Option<String>), EngineError> {
        self.urls
            .get(file_id)
            .cloned()
            .map(|url| (url, None))
            .ok_or_else(|| {
                MetadataUnavailableSnafu {
                    message: format!("no URL registered for file {file_id}"),
                }
                .build()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_registered_file() {
        let mut urls = HashMap::new();
        urls.insert("EGAF001".to_string(), "https://example.org/EGAF001".to_string());
        let client = StaticMetadataClient::new(urls);
        let (url, expires) = client.resolve_download_url("EGAF001").await.unwrap();
        assert_eq!(url, "https://example.org/EGAF001");
        assert!(expires.is_none());
    }

    #[tokio::test]
    async fn unknown_file_errors() {
        let client = StaticMetadataClient::default();
        assert!(client.resolve_download_url("missing").await.is_err());
    }
}
