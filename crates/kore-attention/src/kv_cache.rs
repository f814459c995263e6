//! Key/value state carried between decoding steps.
//!
//! `past` and `present` share the merged layout `(2, B, N, seq, H)`: index 0
//! holds keys, index 1 values. `present` extends every `(batch, head)` block
//! of `past` with the keys and values of the current step.

/// Dimensions of a present-state concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvLayout {
    pub batch_size: usize,
    pub num_heads: usize,
    pub past_sequence_length: usize,
    pub kv_sequence_length: usize,
    pub head_size: usize,
}

impl KvLayout {
    pub fn total_sequence_length(&self) -> usize {
        self.past_sequence_length + self.kv_sequence_length
    }

    pub fn present_dims(&self) -> [usize; 5] {
        [2, self.batch_size, self.num_heads, self.total_sequence_length(), self.head_size]
    }

    pub fn present_len(&self) -> usize {
        self.present_dims().iter().product()
    }

    /// Elements in the key (or value) half of the present state.
    pub fn half_len(&self) -> usize {
        self.present_len() / 2
    }
}

/// Write `concat(past, current)` along the sequence axis into `present`.
///
/// `k` and `v` are the current step's `(B, N, L, H)` projections; `past` may
/// be absent, in which case `present` holds only the current step.
pub fn concat_past_present(layout: &KvLayout, past: Option<&[f32]>, k: &[f32], v: &[f32], present: &mut [f32]) {
    let h = layout.head_size;
    let past_block = layout.past_sequence_length * h;
    let cur_block = layout.kv_sequence_length * h;
    let out_block = past_block + cur_block;
    let units = layout.batch_size * layout.num_heads;
    if out_block == 0 {
        return;
    }

    let (present_k, present_v) = present.split_at_mut(layout.half_len());
    for (half, (dst_half, current)) in [(present_k, k), (present_v, v)].into_iter().enumerate() {
        for (unit, dst) in dst_half.chunks_mut(out_block).take(units).enumerate() {
            let (dst_past, dst_cur) = dst.split_at_mut(past_block);
            if let Some(past) = past {
                let start = (half * units + unit) * past_block;
                dst_past.copy_from_slice(&past[start..start + past_block]);
            }
            dst_cur.copy_from_slice(&current[unit * cur_block..(unit + 1) * cur_block]);
        }
    }
}
