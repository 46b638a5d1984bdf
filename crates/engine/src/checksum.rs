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

//! The checksum primitive the merge step hashes against while it streams
//! part-files together. Computation only; wire-level fetching of the
//! expected digest belongs to whatever resolves `FileSpec`.

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::types::ChecksumType;

/// A running digest over a byte stream, picked by `ChecksumType`.
pub enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    #[must_use]
    pub fn new(kind: ChecksumType) -> Self {
        match kind {
            ChecksumType::Md5 => Self::Md5(Md5::new()),
            ChecksumType::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Md5(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
        }
    }

    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex(&h.finalize()),
            Self::Sha256(h) => hex(&h.finalize()),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_vector() {
        let mut hasher = Hasher::new(ChecksumType::Md5);
        hasher.update(b"hello world");
        assert_eq!(hasher.finalize_hex(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn sha256_matches_known_vector() {
        let mut hasher = Hasher::new(ChecksumType::Sha256);
        hasher.update(b"hello world");
        assert_eq!(
            hasher.finalize_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde"
        );
    }

    #[test]
    fn update_can_be_called_in_pieces() {
        let mut whole = Hasher::new(ChecksumType::Sha256);
        whole.update(b"hello world");

        let mut split = Hasher::new(ChecksumType::Sha256);
        split.update(b"hello ");
        split.update(b"world");

        assert_eq!(whole.finalize_hex(), split.finalize_hex());
    }
}
