//! Per-session transfer buffers.
//!
//! A session leases its chunk buffer when it starts and the lease hands it
//! back when the session ends. Consecutive sessions reuse one allocation
//! without ever sharing it while they run.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Idle chunk buffers waiting for the next session.
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    chunk_len: usize,
    capacity: usize,
}

impl BufferPool {
    /// Creates a pool of `chunk_len`-byte buffers that keeps at most
    /// `capacity` of them idle.
    pub fn new(chunk_len: usize, capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            chunk_len,
            capacity,
        }
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Leases a zeroed buffer, allocating one when none is idle.
    pub fn lease(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.chunk_len]);

        PooledBuffer {
            buffer,
            pool: Arc::clone(self),
        }
    }

    fn reclaim(&self, mut buffer: Vec<u8>) {
        if buffer.len() != self.chunk_len {
            return;
        }

        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            buffer.fill(0);
            idle.push(buffer);
        }
    }

    /// Number of buffers currently idle.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.reclaim(std::mem::take(&mut self.buffer));
    }
}
