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

//! Token acquisition is out of scope for this engine: the OAuth2 dance
//! against EGA's identity provider lives elsewhere. The engine only needs
//! something that hands back a bearer token on demand and can be told a
//! token it was given has gone stale.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AuthUnavailableSnafu, EngineError};

/// Supplies bearer tokens for authenticated requests against the EGA data
/// API. Implementations are responsible for their own refresh timing;
/// the engine only calls `token()` before each request attempt and
/// `invalidate()` after a `401`.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, EngineError>;

    /// The token last handed out was rejected by the server; drop any
    /// cached copy so the next `token()` call fetches a fresh one.
    async fn invalidate(&self) {}
}

/// A `TokenProvider` that refreshes through a caller-supplied closure and
/// caches the result until `invalidate()` is called.
pub struct CachingTokenProvider<F> {
    refresh: F,
    cached:  Mutex<Option<String>>,
}

impl<F> CachingTokenProvider<F>
where
    F: Fn() -> Result<String, EngineError> + Send + Sync,
{
    pub const fn new(refresh: F) -> Self {
        Self {
            refresh,
            cached: Mutex::const_new(None),
        }
    }
}

#[async_trait]
impl<F> TokenProvider for CachingTokenProvider<F>
where
    F: Fn() -> Result<String, EngineError> + Send + Sync,
{
    async fn token(&self) -> Result<String, EngineError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let fresh = (self.refresh)().map_err(|_| {
            AuthUnavailableSnafu {
                message: "token refresh callback failed".to_string(),
            }
            .build()
        })?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    async fn invalidate(&self) { *self.cached.lock().await = None; }
}

/// A `TokenProvider` backed by a single static token, useful for tests and
/// for callers who already hold a valid bearer token out of band.
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, EngineError> { Ok(self.0.clone()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caching_provider_reuses_token_until_invalidated() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = AtomicUsize::new(0);
        let provider = CachingTokenProvider::new(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("tok".to_string())
        });

        assert_eq!(provider.token().await.unwrap(), "tok");
        assert_eq!(provider.token().await.unwrap(), "tok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        provider.invalidate().await;
        assert_eq!(provider.token().await.unwrap(), "tok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn static_provider_always_returns_same_token() {
        let provider = StaticTokenProvider("abc".to_string());
        assert_eq!(provider.token().await.unwrap(), "abc");
    }
}
