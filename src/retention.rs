#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Buffers kept alive on purpose to build memory pressure.

use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stride at which freshly allocated chunks are written so the OS commits real pages.
pub const PAGE_STRIDE: usize = 4096;

#[derive(Debug)]
pub struct RetainedChunk {
    data: Box<[u8]>,
}

impl RetainedChunk {
    fn allocate(size: usize, touch_pages: bool) -> Self {
        let mut data = vec![0u8; size].into_boxed_slice();
        if touch_pages {
            for i in (0..size).step_by(PAGE_STRIDE) {
                data[i] = 1;
            }
        }
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outcome of [`RetentionStore::realize`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Realized {
    pub bytes: u64,
    pub chunks: usize,
    /// The chunk cap stopped the allocation before `bytes` reached the request.
    pub capped: bool,
}

/// Outcome of [`RetentionStore::evict_random`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Evicted {
    pub bytes: u64,
    pub chunks: usize,
}

/// Owns every retained chunk plus a short window of the most recent ones.
///
/// The recent window only holds extra handles for churn visibility. Dropping a
/// handle from it never releases the chunk from `retained`.
#[derive(Debug)]
pub struct RetentionStore {
    retained: Vec<Arc<RetainedChunk>>,
    recent: VecDeque<Arc<RetainedChunk>>,
    retained_bytes: u64,
    chunk_bytes: usize,
    max_chunks: usize,
    recent_capacity: usize,
    touch_pages: bool,
}

impl RetentionStore {
    pub fn new(chunk_bytes: usize, max_chunks: usize, recent_capacity: usize, touch_pages: bool) -> Self {
        Self {
            retained: Vec::new(),
            recent: VecDeque::with_capacity(recent_capacity.min(1024)),
            retained_bytes: 0,
            chunk_bytes: chunk_bytes.max(1),
            max_chunks,
            recent_capacity,
            touch_pages,
        }
    }

    /// Allocate `bytes` as chunks of at most `chunk_bytes`, stopping at the chunk cap.
    pub fn realize(&mut self, bytes: u64) -> Realized {
        let mut out = Realized::default();
        let mut remaining = bytes;
        while remaining > 0 {
            if self.retained.len() >= self.max_chunks {
                out.capped = true;
                warn!(
                    retained_chunks = self.retained.len(),
                    unallocated_bytes = remaining,
                    "retained chunk cap reached; allocation stopped early"
                );
                break;
            }
            let size = usize::try_from(remaining).map_or(self.chunk_bytes, |r| r.min(self.chunk_bytes));
            let chunk = Arc::new(RetainedChunk::allocate(size, self.touch_pages));
            self.remember(Arc::clone(&chunk));
            self.retained.push(chunk);
            self.retained_bytes += size as u64;
            remaining -= size as u64;
            out.bytes += size as u64;
            out.chunks += 1;
        }
        debug!(
            requested = bytes,
            allocated = out.bytes,
            chunks = out.chunks,
            retained_chunks = self.retained.len(),
            "realized allocation"
        );
        out
    }

    fn remember(&mut self, chunk: Arc<RetainedChunk>) {
        if self.recent_capacity == 0 {
            return;
        }
        self.recent.push_back(chunk);
        while self.recent.len() > self.recent_capacity {
            self.recent.pop_front();
        }
    }

    /// Drop uniformly random chunks until at least `target_bytes` are gone or nothing is left.
    ///
    /// Removal swaps with the last element, so insertion order is not preserved.
    pub fn evict_random<R: Rng>(&mut self, target_bytes: u64, rng: &mut R) -> Evicted {
        let mut out = Evicted::default();
        while out.bytes < target_bytes && !self.retained.is_empty() {
            let idx = rng.random_range(0..self.retained.len());
            let removed = self.retained.swap_remove(idx);
            let size = removed.len() as u64;
            self.retained_bytes -= size;
            out.bytes += size;
            out.chunks += 1;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    pub fn retained_bytes(&self) -> u64 {
        self.retained_bytes
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }
}
