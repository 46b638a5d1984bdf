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

//! Version banner assembled from `shadow-rs`'s build-time constants.

use const_format::concatcp;

shadow_rs::shadow!(build);

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Whether this binary was built from an official tagged release rather
/// than a dev checkout, mirrored from the environment at build time.
#[must_use]
pub fn is_official_release() -> bool { option_env!("EGAFETCH_RELEASE").is_some() }

pub const FULL_VERSION: &str = concatcp!(build::PKG_VERSION, " (", build::SHORT_COMMIT, ")");
