//! Process-wide packet buffer pool hooks.
//!
//! Downstream RTP machinery acquires and returns buffers through free
//! functions so it never needs to know which allocator is behind them. The
//! entry point installs an adapter once, before `Bridge::start`.

use std::sync::{Arc, OnceLock};

/// Allocator adapter installed at startup.
pub trait BufferPool: Send + Sync {
    /// Acquire a buffer of at least `len` bytes.
    fn acquire(&self, len: usize) -> Vec<u8>;

    /// Return a buffer to the pool.
    fn release(&self, buffer: Vec<u8>);
}

/// Plain heap allocator, used when nothing fancier is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapBufferPool;

impl BufferPool for HeapBufferPool {
    fn acquire(&self, len: usize) -> Vec<u8> {
        vec![0; len]
    }

    fn release(&self, buffer: Vec<u8>) {
        drop(buffer);
    }
}

static POOL: OnceLock<Arc<dyn BufferPool>> = OnceLock::new();

/// Install the process-wide buffer pool. Returns `false` if a pool was
/// already installed (the first installation wins).
pub fn install(pool: Arc<dyn BufferPool>) -> bool {
    POOL.set(pool).is_ok()
}

/// Acquire a buffer from the installed pool, falling back to the heap when
/// none has been installed yet.
#[must_use]
pub fn acquire(len: usize) -> Vec<u8> {
    match POOL.get() {
        Some(pool) => pool.acquire(len),
        None => HeapBufferPool.acquire(len),
    }
}

/// Return a buffer to the installed pool.
pub fn release(buffer: Vec<u8>) {
    match POOL.get() {
        Some(pool) => pool.release(buffer),
        None => HeapBufferPool.release(buffer),
    }
}
