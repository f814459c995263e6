//! Q, K, V projection.
//!
//! `out[b, h, s, :] = x[b, s, :] @ W[:, head block] + bias[head block]` for
//! each of the three slots, where `x` is `input` for Q (and for K/V with
//! merged weights) and `key`/`value` otherwise. Work is split into
//! `3 * B * N` independent units, each owning one `seq x head_size` block of
//! the output.

use kore_core::{Allocator, Buffer, Result};
use kore_kernels::{try_parallel_for, DisjointSlots, GemmBackend, ParallelFor, Transpose};

use crate::check::AttentionParameters;
use crate::pack::PackedWeights;

/// One `(batch, head, slot)` work unit of the projection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionUnit {
    pub batch: usize,
    pub head: usize,
    /// 0 = Q, 1 = K, 2 = V.
    pub qkv: usize,
}

impl ProjectionUnit {
    /// Decompose a flat loop index. The slot varies fastest, then the head,
    /// then the batch.
    pub fn from_index(index: usize, num_heads: usize) -> Self {
        Self {
            batch: index / 3 / num_heads,
            head: index / 3 % num_heads,
            qkv: index % 3,
        }
    }
}

/// Weight operand of the projection.
#[derive(Debug, Clone, Copy)]
pub enum ProjectionWeights<'a> {
    /// One `D x D_t` matrix holding Q, K and V columns side by side.
    Merged(&'a [f32]),
    /// `D x D_q`, `D x D_k`, `D x D_v`.
    Separate { q: &'a [f32], k: &'a [f32], v: &'a [f32] },
    /// Per-head pre-packed blocks of a merged matrix.
    Packed(&'a PackedWeights),
}

/// Activations and bias fed to [`project`].
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInputs<'a> {
    /// (B, S, D)
    pub input: &'a [f32],
    /// (B, L, D), separate weights only.
    pub key: Option<&'a [f32]>,
    /// (B, L, D), separate weights only.
    pub value: Option<&'a [f32]>,
    /// (D_q + D_k + D_v)
    pub bias: &'a [f32],
    pub weights: ProjectionWeights<'a>,
}

/// Projected Q, K, V in one allocation. Slot `x` is laid out
/// `(B, N, seq_x, head_size_x)`.
#[derive(Debug)]
pub struct QkvBuffer {
    buffer: Buffer,
    offsets: [usize; 3],
    lens: [usize; 3],
    head_sizes: [usize; 3],
    seq_lens: [usize; 3],
}

impl QkvBuffer {
    pub fn q(&self) -> &[f32] {
        self.slot(0)
    }

    pub fn k(&self) -> &[f32] {
        self.slot(1)
    }

    pub fn v(&self) -> &[f32] {
        self.slot(2)
    }

    pub fn slot(&self, qkv: usize) -> &[f32] {
        &self.buffer.as_f32()[self.offsets[qkv]..self.offsets[qkv] + self.lens[qkv]]
    }

    pub fn head_size(&self, qkv: usize) -> usize {
        self.head_sizes[qkv]
    }

    pub fn seq_len(&self, qkv: usize) -> usize {
        self.seq_lens[qkv]
    }

    /// `seq x head_size` block of one `(batch, head)` in slot `qkv`.
    pub fn block(&self, qkv: usize, batch: usize, head: usize, num_heads: usize) -> &[f32] {
        let block_len = self.seq_lens[qkv] * self.head_sizes[qkv];
        let start = (batch * num_heads + head) * block_len;
        &self.slot(qkv)[start..start + block_len]
    }
}

/// Run the projection loop and return the filled QKV buffer.
pub fn project(
    backend: &dyn GemmBackend,
    params: &AttentionParameters,
    inputs: &ProjectionInputs<'_>,
    alloc: &dyn Allocator,
    pool: Option<&dyn ParallelFor>,
) -> Result<QkvBuffer> {
    let batch_size = params.batch_size;
    let num_heads = params.num_heads;
    let input_hidden_size = params.input_hidden_size;
    let head_sizes = params.head_sizes();
    let hidden_sizes = params.hidden_sizes();
    let seq_lens = [
        params.sequence_length,
        params.kv_sequence_length,
        params.kv_sequence_length,
    ];

    let lens: [usize; 3] = std::array::from_fn(|x| batch_size * seq_lens[x] * hidden_sizes[x]);
    let offsets = [0, lens[0], lens[0] + lens[1]];
    let total_len = lens.iter().sum::<usize>();
    let mut buffer = alloc.alloc(total_len * std::mem::size_of::<f32>())?;

    let loop_len = 3 * batch_size * num_heads;
    {
        let data = &mut buffer.as_f32_mut()[..total_len];
        let (q, rest) = data.split_at_mut(lens[0]);
        let (k, v) = rest.split_at_mut(lens[1]);
        let mut blocks = [
            split_blocks(q, seq_lens[0] * head_sizes[0], batch_size * num_heads).into_iter(),
            split_blocks(k, seq_lens[1] * head_sizes[1], batch_size * num_heads).into_iter(),
            split_blocks(v, seq_lens[2] * head_sizes[2], batch_size * num_heads).into_iter(),
        ];
        // Unit `i` visits (batch, head) pairs in order within each slot.
        let regions: Vec<&mut [f32]> = (0..loop_len).filter_map(|i| blocks[i % 3].next()).collect();
        let slots = DisjointSlots::new(regions);

        let cost = (params.sequence_length * head_sizes[0] * input_hidden_size) as f64;
        tracing::trace!(loop_len, cost, "qkv projection");
        try_parallel_for(pool, loop_len, cost, &|range| {
            for i in range {
                let unit = ProjectionUnit::from_index(i, num_heads);
                slots.with(i, |dest| project_unit(backend, params, inputs, unit, dest));
            }
        });
    }

    Ok(QkvBuffer {
        buffer,
        offsets,
        lens,
        head_sizes,
        seq_lens,
    })
}

pub(crate) fn split_blocks(region: &mut [f32], block_len: usize, count: usize) -> Vec<&mut [f32]> {
    if block_len == 0 {
        return (0..count).map(|_| Default::default()).collect();
    }
    region.chunks_mut(block_len).take(count).collect()
}

fn project_unit(
    backend: &dyn GemmBackend,
    params: &AttentionParameters,
    inputs: &ProjectionInputs<'_>,
    unit: ProjectionUnit,
    dest: &mut [f32],
) {
    let ProjectionUnit { batch, head, qkv } = unit;
    let head_size = params.head_sizes()[qkv];
    if head_size == 0 {
        return;
    }
    let input_hidden_size = params.input_hidden_size;
    let bias_offset = qkv * params.hidden_size_q + head * head_size;

    let bias = &inputs.bias[bias_offset..bias_offset + head_size];
    for row in dest.chunks_mut(head_size) {
        row.copy_from_slice(bias);
    }

    let (source, seq) = match (inputs.weights, qkv) {
        (ProjectionWeights::Separate { .. }, 1) => (inputs.key.unwrap_or_default(), params.kv_sequence_length),
        (ProjectionWeights::Separate { .. }, 2) => (inputs.value.unwrap_or_default(), params.kv_sequence_length),
        _ => (inputs.input, params.sequence_length),
    };
    let a = &source[batch * seq * input_hidden_size..];

    match inputs.weights {
        ProjectionWeights::Merged(weights) => backend.gemm(
            Transpose::No,
            Transpose::No,
            seq,
            head_size,
            input_hidden_size,
            1.0,
            a,
            input_hidden_size,
            &weights[bias_offset..],
            params.qkv_hidden_size(),
            1.0,
            dest,
            head_size,
            None,
        ),
        ProjectionWeights::Separate { q, k, v } => {
            let weights = [q, k, v][qkv];
            let ldb = params.hidden_sizes()[qkv];
            backend.gemm(
                Transpose::No,
                Transpose::No,
                seq,
                head_size,
                input_hidden_size,
                1.0,
                a,
                input_hidden_size,
                &weights[head * head_size..],
                ldb,
                1.0,
                dest,
                head_size,
                None,
            )
        }
        ProjectionWeights::Packed(packed) => backend.packed_gemm(
            Transpose::No,
            seq,
            head_size,
            input_hidden_size,
            1.0,
            a,
            input_hidden_size,
            packed.slot(qkv).block(head),
            1.0,
            dest,
            head_size,
            None,
        ),
    }
}
