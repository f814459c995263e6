//! Scoped buffer allocation.
//!
//! Buffers release their accounting when dropped, so a per-call scratch
//! allocation is freed at scope end and a packed weight buffer lives as long
//! as its last `Arc` holder.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{KoreError, Result};

/// Allocation capability handed to kernels.
pub trait Allocator: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate `nbytes` of zero-filled, f32-aligned memory.
    fn alloc(&self, nbytes: usize) -> Result<Buffer>;
}

/// Live/peak byte counters shared between an allocator and its buffers.
#[derive(Debug, Default)]
pub struct AllocStats {
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    num_allocs: AtomicUsize,
}

impl AllocStats {
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Acquire)
    }

    pub fn num_allocs(&self) -> usize {
        self.num_allocs.load(Ordering::Acquire)
    }

    fn record_alloc(&self, nbytes: usize) {
        let live = self.live_bytes.fetch_add(nbytes, Ordering::AcqRel) + nbytes;
        self.peak_bytes.fetch_max(live, Ordering::AcqRel);
        self.num_allocs.fetch_add(1, Ordering::AcqRel);
    }

    fn record_free(&self, nbytes: usize) {
        self.live_bytes.fetch_sub(nbytes, Ordering::AcqRel);
    }
}

/// An owned allocation. Storage is f32 words; `len_bytes` is the requested
/// size, rounded up to whole words.
pub struct Buffer {
    data: Vec<f32>,
    stats: Option<Arc<AllocStats>>,
}

impl Buffer {
    /// A buffer that is not tracked by any allocator.
    pub fn untracked(nbytes: usize) -> Self {
        Self {
            data: vec![0.0; words_for(nbytes)],
            stats: None,
        }
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    pub fn len_f32(&self) -> usize {
        self.data.len()
    }

    pub fn as_f32(&self) -> &[f32] {
        &self.data
    }

    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(stats) = &self.stats {
            stats.record_free(self.len_bytes());
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len_bytes", &self.len_bytes())
            .finish()
    }
}

fn words_for(nbytes: usize) -> usize {
    nbytes.div_ceil(std::mem::size_of::<f32>())
}

/// Host allocator with optional capacity limit.
#[derive(Debug, Clone)]
pub struct CpuAllocator {
    stats: Arc<AllocStats>,
    limit: Option<usize>,
}

impl CpuAllocator {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(AllocStats::default()),
            limit: None,
        }
    }

    /// Allocator that refuses to hold more than `limit` live bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            stats: Arc::new(AllocStats::default()),
            limit: Some(limit),
        }
    }

    pub fn stats(&self) -> &AllocStats {
        &self.stats
    }
}

impl Default for CpuAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for CpuAllocator {
    fn name(&self) -> &str {
        "cpu"
    }

    fn alloc(&self, nbytes: usize) -> Result<Buffer> {
        let rounded = words_for(nbytes) * std::mem::size_of::<f32>();
        if let Some(limit) = self.limit {
            let live = self.stats.live_bytes();
            if live + rounded > limit {
                return Err(KoreError::StorageError(format!(
                    "allocator '{}' exhausted: {} live + {} requested > {} limit",
                    self.name(),
                    live,
                    rounded,
                    limit
                )));
            }
        }
        self.stats.record_alloc(rounded);
        tracing::trace!(nbytes = rounded, "cpu alloc");
        Ok(Buffer {
            data: vec![0.0; rounded / std::mem::size_of::<f32>()],
            stats: Some(Arc::clone(&self.stats)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_zeroed_and_rounded() {
        let alloc = CpuAllocator::new();
        let buf = alloc.alloc(10).unwrap();
        assert_eq!(buf.len_bytes(), 12);
        assert_eq!(buf.len_f32(), 3);
        assert!(buf.as_f32().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_release_on_drop() {
        let alloc = CpuAllocator::new();
        {
            let _a = alloc.alloc(64).unwrap();
            let _b = alloc.alloc(32).unwrap();
            assert_eq!(alloc.stats().live_bytes(), 96);
        }
        assert_eq!(alloc.stats().live_bytes(), 0);
        assert_eq!(alloc.stats().peak_bytes(), 96);
        assert_eq!(alloc.stats().num_allocs(), 2);
    }

    #[test]
    fn test_shared_buffer_outlives_allocator_handle() {
        let alloc = CpuAllocator::new();
        let buf = Arc::new(alloc.alloc(16).unwrap());
        let other = Arc::clone(&buf);
        drop(buf);
        assert_eq!(alloc.stats().live_bytes(), 16);
        drop(other);
        assert_eq!(alloc.stats().live_bytes(), 0);
    }

    #[test]
    fn test_limit() {
        let alloc = CpuAllocator::with_limit(64);
        let _a = alloc.alloc(48).unwrap();
        assert!(matches!(alloc.alloc(32), Err(KoreError::StorageError(_))));
        assert!(alloc.alloc(16).is_ok());
    }

    #[test]
    fn test_fill_zero() {
        let mut buf = Buffer::untracked(8);
        buf.as_f32_mut().copy_from_slice(&[1.0, 2.0]);
        buf.fill_zero();
        assert_eq!(buf.as_f32(), &[0.0, 0.0]);
    }
}
