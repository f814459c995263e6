//! Attention scoring: `softmax(Q @ K^T / sqrt(H) + mask + extra) @ V`.
//!
//! The scorer consumes the projected QKV buffer, extends the key/value state
//! with `past` when present, and writes the per-head contexts back into the
//! `(B, S, N * H_v)` output layout.

use std::sync::Arc;

use kore_core::{invalid_if, Allocator, KoreError, Result, Tensor};
use kore_kernels::{try_parallel_for, CpuGemm, DisjointSlots, GemmBackend, ParallelFor, Transpose};

use crate::check::AttentionParameters;
use crate::kv_cache::{concat_past_present, KvLayout};
use crate::mask::{fill_additive_mask, needs_mask, MaskLayout};
use crate::projection::{split_blocks, QkvBuffer};

/// Everything a scorer needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    pub params: &'a AttentionParameters,
    pub qkv: &'a QkvBuffer,
    pub mask: Option<&'a [f32]>,
    /// (2, B, N, P, H)
    pub past: Option<&'a [f32]>,
    /// (B, N, S, T)
    pub extra_add_qk: Option<&'a [f32]>,
    pub is_unidirectional: bool,
    pub mask_filter_value: f32,
    /// The caller has a destination for the present state.
    pub want_present: bool,
}

/// Results of one attention computation.
#[derive(Debug, Clone)]
pub struct AttentionOutputs {
    /// (B, S, D_v)
    pub output: Tensor,
    /// (2, B, N, P + L, H), when requested.
    pub present: Option<Tensor>,
}

pub trait AttentionScorer: Send + Sync {
    fn score(
        &self,
        request: &ScoreRequest<'_>,
        alloc: &dyn Allocator,
        pool: Option<&dyn ParallelFor>,
    ) -> Result<AttentionOutputs>;
}

/// Reference scorer built on a [`GemmBackend`].
#[derive(Clone)]
pub struct CpuAttentionScorer {
    backend: Arc<dyn GemmBackend>,
}

impl CpuAttentionScorer {
    pub fn new(backend: Arc<dyn GemmBackend>) -> Self {
        Self { backend }
    }
}

impl Default for CpuAttentionScorer {
    fn default() -> Self {
        Self::new(Arc::new(CpuGemm))
    }
}

impl std::fmt::Debug for CpuAttentionScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuAttentionScorer")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl AttentionScorer for CpuAttentionScorer {
    fn score(
        &self,
        request: &ScoreRequest<'_>,
        alloc: &dyn Allocator,
        pool: Option<&dyn ParallelFor>,
    ) -> Result<AttentionOutputs> {
        let p = request.params;
        let qkv = request.qkv;
        let (batch_size, num_heads, seq) = (p.batch_size, p.num_heads, p.sequence_length);
        let total = p.total_sequence_length;
        let [head_size_q, head_size_k, head_size_v] = p.head_sizes();

        if request.past.is_some() && !request.want_present {
            return Err(KoreError::MissingOutput("present".into()));
        }

        let present = if request.want_present {
            invalid_if!(
                head_size_k != head_size_v,
                "Output 'present' requires hidden_size_k == hidden_size_v, got {} and {}",
                p.hidden_size_k,
                p.hidden_size_v
            );
            let layout = KvLayout {
                batch_size,
                num_heads,
                past_sequence_length: p.past_sequence_length,
                kv_sequence_length: p.kv_sequence_length,
                head_size: head_size_k,
            };
            let mut data = vec![0.0f32; layout.present_len()];
            concat_past_present(&layout, request.past, qkv.k(), qkv.v(), &mut data);
            Some(Tensor::from_vec(data, &layout.present_dims()))
        } else {
            None
        };
        let (keys, values) = match &present {
            Some(present) => present.as_f32_slice().split_at(present.numel() / 2),
            None => (qkv.k(), qkv.v()),
        };

        let mask_layout = MaskLayout {
            batch_size,
            sequence_length: seq,
            past_sequence_length: p.past_sequence_length,
            total_sequence_length: total,
            is_unidirectional: request.is_unidirectional,
            filter_value: request.mask_filter_value,
        };
        let mask = if needs_mask(p.mask_type, request.is_unidirectional) {
            let mut buffer = alloc.alloc(mask_layout.len() * std::mem::size_of::<f32>())?;
            fill_additive_mask(buffer.as_f32_mut(), request.mask, p.mask_type, &mask_layout);
            Some(buffer)
        } else {
            None
        };
        let mask_data = mask.as_ref().map(|m| &m.as_f32()[..mask_layout.len()]);

        let units = batch_size * num_heads;
        let probs_len = seq * total;
        let ctx_len = seq * head_size_v;
        let mut probs = alloc.alloc(units * probs_len * std::mem::size_of::<f32>())?;
        let mut context = alloc.alloc(units * ctx_len * std::mem::size_of::<f32>())?;
        let alpha = 1.0 / (head_size_q.max(1) as f32).sqrt();
        let backend = self.backend.as_ref();

        {
            let probs_slots = DisjointSlots::new(split_blocks(probs.as_f32_mut(), probs_len, units));
            let ctx_slots = DisjointSlots::new(split_blocks(context.as_f32_mut(), ctx_len, units));
            let cost = (seq * total * head_size_k) as f64;
            try_parallel_for(pool, units, cost, &|range| {
                for unit in range {
                    let (b, h) = (unit / num_heads, unit % num_heads);
                    probs_slots.with(unit, |probs| {
                        let beta = match mask_data {
                            Some(mask) => {
                                probs.copy_from_slice(&mask[b * probs_len..(b + 1) * probs_len]);
                                1.0
                            }
                            None => 0.0,
                        };
                        let k = &keys[unit * total * head_size_k..(unit + 1) * total * head_size_k];
                        backend.gemm(
                            Transpose::No,
                            Transpose::Yes,
                            seq,
                            total,
                            head_size_q,
                            alpha,
                            qkv.block(0, b, h, num_heads),
                            head_size_q,
                            k,
                            head_size_k,
                            beta,
                            probs,
                            total,
                            None,
                        );
                        if let Some(extra) = request.extra_add_qk {
                            let extra = &extra[unit * probs_len..(unit + 1) * probs_len];
                            for (s, e) in probs.iter_mut().zip(extra) {
                                *s += e;
                            }
                        }
                        softmax_rows(probs, total);

                        let v = &values[unit * total * head_size_v..(unit + 1) * total * head_size_v];
                        ctx_slots.with(unit, |ctx| {
                            backend.gemm(
                                Transpose::No,
                                Transpose::No,
                                seq,
                                head_size_v,
                                total,
                                1.0,
                                probs,
                                total,
                                v,
                                head_size_v,
                                0.0,
                                ctx,
                                head_size_v,
                                None,
                            )
                        });
                    });
                }
            });
        }

        // (B, N, S, H_v) -> (B, S, N * H_v)
        let hidden_v = p.hidden_size_v;
        let mut output = vec![0.0f32; batch_size * seq * hidden_v];
        if ctx_len > 0 {
            let context = &context.as_f32()[..units * ctx_len];
            for (unit, block) in context.chunks(ctx_len).enumerate() {
                let (b, h) = (unit / num_heads, unit % num_heads);
                for (s, row) in block.chunks(head_size_v).enumerate() {
                    let start = (b * seq + s) * hidden_v + h * head_size_v;
                    output[start..start + head_size_v].copy_from_slice(row);
                }
            }
        }

        Ok(AttentionOutputs {
            output: Tensor::from_vec(output, &[batch_size, seq, hidden_v]),
            present,
        })
    }
}

/// In-place numerically stable softmax over each row of width `width`.
fn softmax_rows(data: &mut [f32], width: usize) {
    if width == 0 {
        return;
    }
    for row in data.chunks_mut(width) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        let inv = 1.0 / sum;
        row.iter_mut().for_each(|v| *v *= inv);
    }
}
