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

use std::{fmt, str::FromStr};

use derive_more::{Add, AddAssign, Sub};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// A byte count with `K`/`M`/`G` suffix parsing, used for `chunk_size` and
/// `max_bandwidth` in the configuration surface.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Add, AddAssign, Sub, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReadableSize(pub u64);

impl ReadableSize {
    #[must_use]
    pub const fn b(bytes: u64) -> Self { Self(bytes) }

    #[must_use]
    pub const fn kb(count: u64) -> Self { Self(count * KB) }

    #[must_use]
    pub const fn mb(count: u64) -> Self { Self(count * MB) }

    #[must_use]
    pub const fn gb(count: u64) -> Self { Self(count * GB) }

    #[must_use]
    pub const fn as_bytes(self) -> u64 { self.0 }

    /// Scale by a floating-point factor, used by the adaptive chunk-sizing
    /// rule (`current * 1.5`, `current * 0.5`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn scale(self, factor: f64) -> Self {
        let scaled = (self.0 as f64 * factor).round();
        Self(scaled.max(0.0) as u64)
    }

    #[must_use]
    pub const fn clamp_to(self, min: Self, max: Self) -> Self {
        if self.0 < min.0 {
            min
        } else if self.0 > max.0 {
            max
        } else {
            self
        }
    }
}

impl fmt::Display for ReadableSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes >= GB && bytes % GB == 0 {
            write!(f, "{}G", bytes / GB)
        } else if bytes >= MB && bytes % MB == 0 {
            write!(f, "{}M", bytes / MB)
        } else if bytes >= KB && bytes % KB == 0 {
            write!(f, "{}K", bytes / KB)
        } else {
            write!(f, "{bytes}")
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("invalid size string {value:?}: {reason}"))]
pub struct ParseReadableSizeError {
    value:  String,
    reason: String,
}

impl FromStr for ReadableSize {
    type Err = ParseReadableSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || ParseReadableSizeError {
            value:  s.to_string(),
            reason: "expected a number optionally followed by K, M or G".to_string(),
        };

        let (digits, multiplier) = match trimmed.chars().last() {
            Some(c @ ('k' | 'K')) => (&trimmed[..trimmed.len() - c.len_utf8()], KB),
            Some(c @ ('m' | 'M')) => (&trimmed[..trimmed.len() - c.len_utf8()], MB),
            Some(c @ ('g' | 'G')) => (&trimmed[..trimmed.len() - c.len_utf8()], GB),
            Some(_) => (trimmed, 1),
            None => return Err(invalid()),
        };

        let value: f64 = digits.trim().parse().map_err(|_| invalid())?;
        if value < 0.0 {
            return Err(invalid());
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bytes = (value * multiplier as f64).round() as u64;
        Ok(Self(bytes))
    }
}
