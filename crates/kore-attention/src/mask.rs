//! Additive attention masks.
//!
//! Every supported mask input is expanded to a `(B, S, T)` matrix holding
//! `0.0` for visible keys and the filter value for hidden ones, which is then
//! added to the raw scores before the softmax.

use crate::check::MaskType;

/// Dimensions and options of one mask expansion.
#[derive(Debug, Clone, Copy)]
pub struct MaskLayout {
    pub batch_size: usize,
    pub sequence_length: usize,
    pub past_sequence_length: usize,
    pub total_sequence_length: usize,
    pub is_unidirectional: bool,
    pub filter_value: f32,
}

impl MaskLayout {
    pub fn len(&self) -> usize {
        self.batch_size * self.sequence_length * self.total_sequence_length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether any key position can be hidden.
pub fn needs_mask(mask_type: MaskType, is_unidirectional: bool) -> bool {
    mask_type != MaskType::None || is_unidirectional
}

/// Expand `mask` into `dst` (`layout.len()` values, zeroed by the caller).
///
/// Raw masks hide positions whose value is not positive. 1-D masks hold key
/// positions: keys at or after the end position are hidden and, with a
/// second half present, keys before the start position.
pub fn fill_additive_mask(dst: &mut [f32], mask: Option<&[f32]>, mask_type: MaskType, layout: &MaskLayout) {
    let batch_size = layout.batch_size;
    let seq = layout.sequence_length;
    let total = layout.total_sequence_length;
    let filter = layout.filter_value;
    let hidden = |v: f32| if v > 0.0 { 0.0 } else { filter };

    if total == 0 || seq == 0 {
        return;
    }

    for (b, block) in dst.chunks_mut(seq * total).take(batch_size).enumerate() {
        match (mask_type, mask) {
            (MaskType::Raw3D, Some(mask)) => {
                let src = &mask[b * seq * total..(b + 1) * seq * total];
                for (d, &m) in block.iter_mut().zip(src) {
                    *d = hidden(m);
                }
            }
            (MaskType::Raw4D { max_sequence_length }, Some(mask)) => {
                let m = max_sequence_length;
                for (s, row) in block.chunks_mut(total).enumerate() {
                    let start = (b * m + layout.past_sequence_length + s) * m;
                    for (d, &v) in row.iter_mut().zip(&mask[start..start + total]) {
                        *d = hidden(v);
                    }
                }
            }
            (MaskType::Key2D, Some(mask)) => {
                let src = &mask[b * total..(b + 1) * total];
                for (d, &m) in block[..total].iter_mut().zip(src) {
                    *d = hidden(m);
                }
                broadcast_first_row(block, total);
            }
            (MaskType::KeyEnd | MaskType::KeyStartEnd, Some(mask)) => {
                let row = &mut block[..total];
                let end = position(mask[b], total);
                row[end..].fill(filter);
                if mask_type == MaskType::KeyStartEnd {
                    let start = position(mask[b + batch_size], total);
                    row[..start].fill(filter);
                }
                broadcast_first_row(block, total);
            }
            _ => {}
        }

        if layout.is_unidirectional {
            for (s, row) in block.chunks_mut(total).enumerate() {
                let first_hidden = (layout.past_sequence_length + s + 1).min(total);
                for v in &mut row[first_hidden..] {
                    *v += filter;
                }
            }
        }
    }
}

fn position(value: f32, total: usize) -> usize {
    if value <= 0.0 {
        0
    } else {
        (value as usize).min(total)
    }
}

fn broadcast_first_row(block: &mut [f32], total: usize) {
    let (first, rest) = block.split_at_mut(total);
    for row in rest.chunks_mut(total) {
        row.copy_from_slice(first);
    }
}
