//! FIFO of byte chunks with per-chunk read cursors.
//!
//! Chunks are stored as [`Bytes`] and consumed with [`Buf::advance`], so a
//! partially read chunk keeps its position without being recopied.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};

/// Ordered queue of byte chunks.
///
/// Invariant: `queued_bytes()` equals the sum of the remaining bytes of
/// every chunk in the queue. Empty chunks are never stored.
#[derive(Debug, Default)]
pub struct ByteQueue {
    chunks: VecDeque<Bytes>,
    queued: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk at the tail. Empty chunks are ignored.
    ///
    /// Returns the number of bytes enqueued.
    pub fn push(&mut self, chunk: Bytes) -> usize {
        let len = chunk.len();
        if len > 0 {
            self.queued += len;
            self.chunks.push_back(chunk);
        }
        len
    }

    /// Copy up to `dst.len()` bytes from the head chunk into `dst`.
    ///
    /// Never crosses a chunk boundary: a read returns at most the head
    /// chunk's remaining bytes. The head is removed once fully drained.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let Some(head) = self.chunks.front_mut() else {
            return 0;
        };

        let n = dst.len().min(head.len());
        dst[..n].copy_from_slice(&head[..n]);
        head.advance(n);

        if head.is_empty() {
            self.chunks.pop_front();
        }
        self.queued -= n;
        n
    }

    /// Drop every queued chunk. Returns the number of bytes discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.queued;
        self.chunks.clear();
        self.queued = 0;
        discarded
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
