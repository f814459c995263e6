//! Pre-packed projection weights.
//!
//! Each of the Q, K, V slots is packed into one buffer of `num_heads` blocks;
//! block `h` is the backend-packed `input_hidden_size x head_size` column
//! block of head `h`. Buffers are immutable after packing and shared through
//! `Arc`, so a kernel and a [`PrePackCache`] can hold the same memory.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use kore_core::{Allocator, Buffer, KoreError, Result, Shape};
use kore_kernels::{GemmBackend, Transpose};
use parking_lot::Mutex;

/// One packed Q, K or V slot.
#[derive(Debug, Clone)]
pub struct PackedSlot {
    buffer: Arc<Buffer>,
    /// f32 words per head block.
    block_len: usize,
    head_size: usize,
}

impl PackedSlot {
    pub fn head_size(&self) -> usize {
        self.head_size
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Packed weights of `head`.
    pub fn block(&self, head: usize) -> &[f32] {
        &self.buffer.as_f32()[head * self.block_len..(head + 1) * self.block_len]
    }
}

/// Packed Q/K/V weights together with the shape they were packed from.
#[derive(Debug, Clone)]
pub struct PackedWeights {
    slots: [PackedSlot; 3],
    weight_shape: Shape,
    num_heads: usize,
}

impl PackedWeights {
    pub fn slot(&self, qkv: usize) -> &PackedSlot {
        &self.slots[qkv]
    }

    /// Shape of the original weight tensor, which is not needed again once
    /// packed.
    pub fn weight_shape(&self) -> &Shape {
        &self.weight_shape
    }

    pub fn input_hidden_size(&self) -> usize {
        self.weight_shape.dims()[0]
    }

    pub fn head_sizes(&self) -> [usize; 3] {
        [self.slots[0].head_size, self.slots[1].head_size, self.slots[2].head_size]
    }

    /// Swap in externally owned buffers after checking they can hold this
    /// layout.
    pub(crate) fn adopt(&mut self, buffers: [Arc<Buffer>; 3]) -> Result<()> {
        for (slot, buffer) in self.slots.iter().zip(&buffers) {
            let needed = slot.block_len * self.num_heads;
            if buffer.len_f32() < needed {
                return Err(KoreError::StorageError(format!(
                    "shared pre-packed buffer holds {} bytes, layout needs {}",
                    buffer.len_bytes(),
                    needed * std::mem::size_of::<f32>()
                )));
            }
        }
        for (slot, buffer) in self.slots.iter_mut().zip(buffers) {
            slot.buffer = buffer;
        }
        Ok(())
    }
}

/// Packed buffers handed out for sharing across kernel instances.
#[derive(Debug, Default, Clone)]
pub struct PrePackedWeights {
    pub buffers: Vec<Arc<Buffer>>,
    /// Byte size of each buffer.
    pub buffer_sizes: Vec<usize>,
}

/// Pack the merged weight matrix `weights` (`D x D_t`) slot by slot.
///
/// Returns `Ok(None)` when the backend cannot pack some slot; any buffer
/// allocated for earlier slots is released before returning.
pub(crate) fn pack_weights(
    backend: &dyn GemmBackend,
    alloc: &dyn Allocator,
    weights: &[f32],
    weight_shape: &Shape,
    hidden_sizes: [usize; 3],
    num_heads: usize,
) -> Result<Option<PackedWeights>> {
    let input_hidden_size = weight_shape.dims()[0];
    let ldb = weight_shape.dims()[1];

    let mut slots = Vec::with_capacity(3);
    let mut column = 0;
    for hidden_size in hidden_sizes {
        let head_size = hidden_size / num_heads;
        let block_bytes = backend.packed_b_size(head_size, input_hidden_size);
        if block_bytes == 0 {
            tracing::debug!(head_size, input_hidden_size, "backend cannot pack slot, keeping generic path");
            return Ok(None);
        }
        let block_len = block_bytes.div_ceil(std::mem::size_of::<f32>());

        let mut buffer = alloc.alloc(block_bytes * num_heads)?;
        buffer.fill_zero();
        for (head, dst) in buffer.as_f32_mut().chunks_mut(block_len).take(num_heads).enumerate() {
            let src = &weights[column + head * head_size..];
            backend.pack_b(Transpose::No, head_size, input_hidden_size, src, ldb, dst);
        }
        column += hidden_size;

        slots.push(PackedSlot {
            buffer: Arc::new(buffer),
            block_len,
            head_size,
        });
    }

    let slots: [PackedSlot; 3] = match slots.try_into() {
        Ok(slots) => slots,
        Err(_) => return Ok(None),
    };
    Ok(Some(PackedWeights {
        slots,
        weight_shape: weight_shape.clone(),
        num_heads,
    }))
}

/// Content-addressed store of packed buffers shared by kernels built from the
/// same weights.
#[derive(Debug, Default)]
pub struct PrePackCache {
    entries: Mutex<HashMap<u64, Arc<Buffer>>>,
}

impl PrePackCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Canonical copy of `buffer`: an equal buffer already in the cache, or
    /// `buffer` itself after inserting it.
    pub fn intern(&self, buffer: Arc<Buffer>) -> Arc<Buffer> {
        let key = content_hash(&buffer);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(existing) if existing.as_f32() == buffer.as_f32() => {
                tracing::trace!(key, "pre-packed buffer shared");
                Arc::clone(existing)
            }
            Some(_) => buffer,
            None => {
                entries.insert(key, Arc::clone(&buffer));
                buffer
            }
        }
    }

    /// Intern every buffer of a pre-pack result.
    pub fn intern_all(&self, prepacked: PrePackedWeights) -> Vec<Arc<Buffer>> {
        prepacked.buffers.into_iter().map(|b| self.intern(b)).collect()
    }
}

fn content_hash(buffer: &Buffer) -> u64 {
    let mut hasher = DefaultHasher::new();
    buffer.len_bytes().hash(&mut hasher);
    for v in buffer.as_f32() {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}
