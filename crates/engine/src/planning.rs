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

//! Splitting a file's byte range into chunks, and re-splitting the
//! still-pending tail of that range when adaptive sizing decides the
//! target chunk size should change mid-flight.

use crate::types::{ChunkState, ChunkStatus};

/// Partitions `[0, size)` into half-open `[start, end)` ranges of at most
/// `chunk_size` bytes each, all `Pending`. The final chunk absorbs any
/// remainder smaller than `chunk_size`. A zero-byte file yields a single
/// empty chunk so the pipeline has something to mark `Complete`.
#[must_use]
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<ChunkState> {
    if size == 0 {
        return vec![ChunkState {
            index:            0,
            start:            0,
            end:              0,
            status:           ChunkStatus::Pending,
            bytes_downloaded: 0,
            retry_count:      0,
        }];
    }

    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(size.div_ceil(chunk_size) as usize);
    let mut start = 0u64;
    let mut index = 0usize;
    while start < size {
        let end = (start + chunk_size).min(size);
        chunks.push(ChunkState {
            index,
            start,
            end,
            status: ChunkStatus::Pending,
            bytes_downloaded: 0,
            retry_count: 0,
        });
        start = end;
        index += 1;
    }
    chunks
}

/// Re-splits the contiguous run of still-`Pending` chunks at the tail of
/// `chunks` using `new_chunk_size`, leaving every `Downloading`,
/// `Complete`, or `Failed` chunk untouched. Used by adaptive chunk sizing:
/// completed part-files are never invalidated, only the plan for work not
/// yet started.
pub fn rechunk_pending_tail(chunks: &mut Vec<ChunkState>, new_chunk_size: u64) {
    let first_pending = chunks.iter().position(|c| c.status == ChunkStatus::Pending);
    let Some(first_pending) = first_pending else { return };

    // Only the tail run starting at `first_pending` is guaranteed to be an
    // untouched, contiguous byte range; anything interleaved (a retried
    // chunk ahead of it) is left alone by definition of "still pending".
    let range_start = chunks[first_pending].start;
    let range_end = chunks.last().map_or(range_start, |c| c.end);
    let next_index = chunks.iter().map(|c| c.index).max().map_or(0, |m| m + 1);

    chunks.truncate(first_pending);
    let mut start = range_start;
    let mut index = next_index;
    while start < range_end {
        let end = (start + new_chunk_size.max(1)).min(range_end);
        chunks.push(ChunkState {
            index,
            start,
            end,
            status: ChunkStatus::Pending,
            bytes_downloaded: 0,
            retry_count: 0,
        });
        start = end;
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_splits_evenly() {
        let chunks = plan_chunks(200, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 100));
        assert_eq!((chunks[1].start, chunks[1].end), (100, 200));
    }

    #[test]
    fn remainder_becomes_final_short_chunk() {
        let chunks = plan_chunks(250, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[2].start, chunks[2].end), (200, 250));
    }

    #[test]
    fn zero_byte_file_gets_one_empty_chunk() {
        let chunks = plan_chunks(0, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 0));
    }

    #[test]
    fn rechunk_tail_preserves_completed_chunks() {
        let mut chunks = plan_chunks(300, 100);
        chunks[0].status = ChunkStatus::Complete;
        chunks[0].bytes_downloaded = 100;

        rechunk_pending_tail(&mut chunks, 50);

        assert_eq!(chunks[0].status, ChunkStatus::Complete);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 100);

        let pending: Vec<_> = chunks.iter().filter(|c| c.status == ChunkStatus::Pending).collect();
        assert_eq!(pending.len(), 4);
        assert_eq!(pending[0].start, 100);
        assert_eq!(pending.last().unwrap().end, 300);
    }

    #[test]
    fn rechunk_with_no_pending_chunks_is_a_no_op() {
        let mut chunks = plan_chunks(100, 100);
        chunks[0].status = ChunkStatus::Complete;
        let before = chunks.clone();
        rechunk_pending_tail(&mut chunks, 10);
        assert_eq!(chunks.len(), before.len());
    }
}
