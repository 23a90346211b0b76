//! # Buffer Pool Module
//!
//! Buffer riutilizzabili per l'ingestione degli upload e l'encoding delle immagini.
//!
//! ## Responsabilità:
//! - Evita allocazioni ripetute per ogni upload
//! - Garantisce che un buffer sia posseduto da un solo chiamante alla volta
//! - Il pool è una dipendenza iniettata (`Arc<dyn BufferPool>`), mai uno stato globale
//!
//! ## Implementazioni:
//! - `SharedBufferPool`: mantiene fino a `max_idle` buffer inattivi dietro un `Mutex`
//! - `NoopBufferPool`: alloca sempre, scarta al rilascio. Comportamento identico,
//!   il pool è solo un'ottimizzazione
//!
//! ## Esempio:
//! ```rust
//! use catalog_image_optimizer::buffer_pool::{BufferPool, PooledBuffer, SharedBufferPool};
//! use std::sync::Arc;
//!
//! let pool: Arc<dyn BufferPool> = Arc::new(SharedBufferPool::new(4, 1024));
//! let mut buf = PooledBuffer::acquire(&pool);
//! buf.extend_from_slice(b"bytes");
//! drop(buf); // torna nel pool, svuotato
//! assert_eq!(PooledBuffer::acquire(&pool).len(), 0);
//! ```

use crate::config::Config;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Source of reusable byte buffers.
///
/// `acquire` must return an empty buffer. Buffers handed to `release` are owned
/// by the pool again; implementations may keep or drop them.
pub trait BufferPool: Send + Sync {
    fn acquire(&self) -> Vec<u8>;
    fn release(&self, buffer: Vec<u8>);
}

/// Pool that keeps a bounded number of idle buffers for reuse
#[derive(Debug)]
pub struct SharedBufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    buffer_capacity: usize,
    /// Buffers grown beyond this are dropped instead of retained
    max_retained_capacity: usize,
}

impl SharedBufferPool {
    /// Creates a pool keeping at most `max_idle` buffers, each new buffer
    /// starting with `buffer_capacity` bytes reserved.
    pub fn new(max_idle: usize, buffer_capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            buffer_capacity,
            max_retained_capacity: 64 * 1024 * 1024,
        }
    }

    /// Pool sized by `pool_max_idle` / `pool_buffer_capacity`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pool_max_idle, config.pool_buffer_capacity)
    }

    /// Overrides the capacity ceiling above which released buffers are dropped
    pub fn with_max_retained_capacity(mut self, bytes: usize) -> Self {
        self.max_retained_capacity = bytes;
        self
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            idle: self.lock_idle().len(),
            max_idle: self.max_idle,
            buffer_capacity: self.buffer_capacity,
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        // Un panic con il lock preso non lascia buffer in stato incoerente:
        // ogni buffer viene comunque svuotato in acquire.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SharedBufferPool {
    fn default() -> Self {
        Self::new(16, 512 * 1024)
    }
}

impl BufferPool for SharedBufferPool {
    fn acquire(&self) -> Vec<u8> {
        match self.lock_idle().pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer
            }
            None => Vec::with_capacity(self.buffer_capacity),
        }
    }

    fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > self.max_retained_capacity {
            debug!(
                capacity = buffer.capacity(),
                "Dropping oversized buffer instead of pooling it"
            );
            return;
        }

        buffer.clear();
        let mut idle = self.lock_idle();
        if idle.len() < self.max_idle {
            idle.push(buffer);
        }
    }
}

/// Pool that never reuses anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBufferPool;

impl BufferPool for NoopBufferPool {
    fn acquire(&self) -> Vec<u8> {
        Vec::new()
    }

    fn release(&self, _buffer: Vec<u8>) {}
}

/// Buffer pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub idle: usize,
    pub max_idle: usize,
    pub buffer_capacity: usize,
}

/// Buffer borrowed from a pool, returned to it on drop
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<dyn BufferPool>,
}

impl PooledBuffer {
    pub fn acquire(pool: &Arc<dyn BufferPool>) -> Self {
        let mut buffer = pool.acquire();
        // Il contratto di acquire vale anche per pool scritti male
        buffer.clear();
        Self {
            buffer,
            pool: Arc::clone(pool),
        }
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
