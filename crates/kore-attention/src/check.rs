//! Input shape validation.
//!
//! Merged Q/K/V weights:
//!   input        : (B, S, D)
//!   weights      : (D, D_t)            D_t = D_q + D_k + D_v
//!   bias         : (D_t)
//!   past         : (2, B, N, P, H_k) or none
//!   extra_add_qk : (B, N, S, L) or none
//!
//! Separate weights additionally take key/value (B, L, D) and
//! weight_key/weight_value (D, D_k) / (D, D_v); `weights` is then (D, D_q).
//!
//! Supported mask shapes: (B), (2B), (B, T), (B|1, 1), (B, S, T),
//! (B, 1, M, M) with M >= T, where T = P + L.

use kore_core::{invalid_if, Result};

use crate::config::AttentionConfig;

/// How the mask input is interpreted after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskType {
    /// No mask, or a broadcast mask that has no effect.
    None,
    /// (B): end position of the valid keys per batch.
    KeyEnd,
    /// (2B): end positions followed by start positions.
    KeyStartEnd,
    /// (B, T): 0 masks a key.
    Key2D,
    /// (B, S, T): 0 masks a (query, key) pair.
    Raw3D,
    /// (B, 1, M, M): row `P + s` holds the keys visible to query `s`.
    Raw4D { max_sequence_length: usize },
}

/// Shapes of the attention inputs. Only `input`, `weights` and `bias` are
/// mandatory.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttentionShapes<'a> {
    pub input: &'a [usize],
    pub weights: &'a [usize],
    pub bias: &'a [usize],
    pub mask: Option<&'a [usize]>,
    pub past: Option<&'a [usize]>,
    pub extra_add_qk: Option<&'a [usize]>,
    pub key: Option<&'a [usize]>,
    pub value: Option<&'a [usize]>,
    pub weight_key: Option<&'a [usize]>,
    pub weight_value: Option<&'a [usize]>,
}

impl<'a> AttentionShapes<'a> {
    pub fn new(input: &'a [usize], weights: &'a [usize], bias: &'a [usize]) -> Self {
        Self {
            input,
            weights,
            bias,
            ..Default::default()
        }
    }

    pub fn with_mask(mut self, mask: &'a [usize]) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_past(mut self, past: &'a [usize]) -> Self {
        self.past = Some(past);
        self
    }

    pub fn with_extra_add_qk(mut self, extra_add_qk: &'a [usize]) -> Self {
        self.extra_add_qk = Some(extra_add_qk);
        self
    }

    pub fn with_separate(
        mut self,
        key: &'a [usize],
        value: &'a [usize],
        weight_key: &'a [usize],
        weight_value: &'a [usize],
    ) -> Self {
        self.key = Some(key);
        self.value = Some(value);
        self.weight_key = Some(weight_key);
        self.weight_value = Some(weight_value);
        self
    }
}

/// Dimensions derived from validated inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionParameters {
    pub batch_size: usize,
    pub sequence_length: usize,
    pub input_hidden_size: usize,
    pub hidden_size_q: usize,
    pub hidden_size_k: usize,
    pub hidden_size_v: usize,
    /// Key/value sequence length of the current step (L).
    pub kv_sequence_length: usize,
    pub past_sequence_length: usize,
    /// P + L.
    pub total_sequence_length: usize,
    pub num_heads: usize,
    pub mask_type: MaskType,
}

impl AttentionParameters {
    pub fn head_size_q(&self) -> usize {
        self.hidden_size_q / self.num_heads
    }

    pub fn head_size_k(&self) -> usize {
        self.hidden_size_k / self.num_heads
    }

    pub fn head_size_v(&self) -> usize {
        self.hidden_size_v / self.num_heads
    }

    /// Per-slot head sizes in Q, K, V order.
    pub fn head_sizes(&self) -> [usize; 3] {
        [self.head_size_q(), self.head_size_k(), self.head_size_v()]
    }

    pub fn hidden_sizes(&self) -> [usize; 3] {
        [self.hidden_size_q, self.hidden_size_k, self.hidden_size_v]
    }

    /// Total width of the concatenated Q/K/V projection.
    pub fn qkv_hidden_size(&self) -> usize {
        self.hidden_size_q + self.hidden_size_k + self.hidden_size_v
    }
}

/// Validate `shapes` against `config`.
pub fn check_inputs(config: &AttentionConfig, shapes: &AttentionShapes<'_>) -> Result<AttentionParameters> {
    check_layout(config, shapes, config.use_merged_weights)
}

/// Validation for backends that launch one thread per head: additionally
/// requires `num_heads <= max_threads_per_block`. Always checks the merged
/// layout; separate key/value shapes are ignored.
pub fn check_inputs_with_thread_limit(
    config: &AttentionConfig,
    shapes: &AttentionShapes<'_>,
    max_threads_per_block: usize,
) -> Result<AttentionParameters> {
    invalid_if!(
        config.num_heads > max_threads_per_block,
        "num_heads should be no larger than {}",
        max_threads_per_block
    );
    let merged = AttentionShapes {
        key: None,
        value: None,
        weight_key: None,
        weight_value: None,
        ..*shapes
    };
    check_layout(config, &merged, true)
}

fn check_layout(config: &AttentionConfig, shapes: &AttentionShapes<'_>, merged: bool) -> Result<AttentionParameters> {
    let num_heads = config.num_heads;
    invalid_if!(num_heads == 0, "num_heads should be positive, got 0");
    invalid_if!(
        shapes.past.is_some() && shapes.extra_add_qk.is_some(),
        "Attention cannot have past sequence and extra add qk"
    );

    let dims = shapes.input;
    invalid_if!(dims.len() != 3, "Input 'input' is expected to have 3 dimensions, got {}", dims.len());
    let (batch_size, sequence_length, input_hidden_size) = (dims[0], dims[1], dims[2]);

    let weights_dims = shapes.weights;
    invalid_if!(
        weights_dims.len() != 2,
        "Input 'weights' is expected to have 2 dimensions, got {}",
        weights_dims.len()
    );
    invalid_if!(
        weights_dims[0] != input_hidden_size,
        "Input 'weights' dimension 0 should have same length as dimension 2 of input 'input'"
    );
    let bias_dims = shapes.bias;
    invalid_if!(bias_dims.len() != 1, "Input 'bias' is expected to have 1 dimension, got {}", bias_dims.len());

    let mut kv_sequence_length = sequence_length;
    let (hidden_size_q, hidden_size_k, hidden_size_v);

    if merged {
        invalid_if!(
            bias_dims[0] != weights_dims[1],
            "Input 'bias' dimension 0 should have same length as dimension 1 of input 'weights'"
        );
        let sizes = &config.qkv_hidden_sizes;
        if sizes.is_empty() {
            let hidden_size = bias_dims[0] / 3;
            hidden_size_q = hidden_size;
            hidden_size_k = hidden_size;
            hidden_size_v = hidden_size;
        } else {
            invalid_if!(sizes.len() != 3, "qkv_hidden_sizes attribute should have 3 elements");
            for &size in sizes {
                invalid_if!(size == 0, "qkv_hidden_sizes should have positive values, got {}", size);
                invalid_if!(size % num_heads != 0, "hidden_size should be divisible by num_heads:{}", size);
            }
            invalid_if!(sizes[0] != sizes[1], "qkv_hidden_sizes first element should be same as the second");
            hidden_size_q = sizes[0];
            hidden_size_k = sizes[1];
            hidden_size_v = sizes[2];
        }
    } else {
        let (Some(key), Some(value), Some(weight_key), Some(weight_value)) =
            (shapes.key, shapes.value, shapes.weight_key, shapes.weight_value)
        else {
            return Err(kore_core::KoreError::invalid_argument(
                "When merged_weights is 0, key, value, weight_key and weight_value are required",
            ));
        };

        check_kv_input("key", key, batch_size, input_hidden_size)?;
        check_kv_input("value", value, batch_size, input_hidden_size)?;
        invalid_if!(value[1] != key[1], "Input 'key' and 'value' dimension 1 should have same length");
        check_kv_weight("weight_key", weight_key, input_hidden_size)?;
        check_kv_weight("weight_value", weight_value, input_hidden_size)?;

        hidden_size_q = weights_dims[1];
        hidden_size_k = weight_key[1];
        hidden_size_v = weight_value[1];
        kv_sequence_length = key[1];
    }

    invalid_if!(
        bias_dims[0] != hidden_size_q + hidden_size_k + hidden_size_v,
        "Input 'bias' dimension 0 should have same length as sum of Q/K/V hidden sizes"
    );
    for size in [hidden_size_q, hidden_size_k, hidden_size_v] {
        invalid_if!(size % num_heads != 0, "hidden_size should be divisible by num_heads:{}", size);
    }
    invalid_if!(
        hidden_size_q != hidden_size_k,
        "hidden_size_q should be same as hidden_size_k, got {} and {}",
        hidden_size_q,
        hidden_size_k
    );

    let mut past_sequence_length = 0;
    if let Some(past) = shapes.past {
        invalid_if!(hidden_size_k != hidden_size_v, "Input 'past' expect hidden_size_k == hidden_size_v");
        invalid_if!(past.len() != 5, "Input 'past' is expected to have 5 dimension, got {}", past.len());
        invalid_if!(past[0] != 2, "Inputs 'past' dimension 0 shall have length of 2");
        invalid_if!(
            past[1] != batch_size,
            "Inputs 'past' dimension 1 shall have same length as dimension 0 of input 0"
        );
        invalid_if!(past[2] != num_heads, "Inputs 'past' dimension 2 shall have length of num_heads {}", num_heads);
        invalid_if!(
            past[4] != hidden_size_k / num_heads,
            "Inputs 'past' dimension 4 shall have length of {}",
            hidden_size_k / num_heads
        );
        past_sequence_length = past[3];
    }
    let total_sequence_length = kv_sequence_length + past_sequence_length;

    let mask_type = match shapes.mask {
        None => MaskType::None,
        Some(mask) => check_mask(mask, config, batch_size, sequence_length, past_sequence_length, total_sequence_length)?,
    };

    if let Some(extra) = shapes.extra_add_qk {
        invalid_if!(
            extra.len() != 4,
            "Input 'extra_add_qk' is expected to have 4 dimensions, got {}",
            extra.len()
        );
        invalid_if!(
            extra[0] != batch_size,
            "Input 'extra_add_qk' dimension 0 should be same as batch_size, got {}",
            extra[0]
        );
        invalid_if!(
            extra[1] != num_heads,
            "Input 'extra_add_qk' dimension 1 should be same as number of heads, got {}",
            extra[1]
        );
        invalid_if!(
            extra[2] != sequence_length,
            "Input 'extra_add_qk' dimension 2 should be same as sequence_length, got {}",
            extra[2]
        );
        // Scores span every key including past ones, so dimension 3 is the
        // total length rather than sequence_length; both agree for merged
        // inputs without past.
        invalid_if!(
            extra[3] != total_sequence_length,
            "Input 'extra_add_qk' dimension 3 should be same as total_sequence_length, got {}",
            extra[3]
        );
    }

    Ok(AttentionParameters {
        batch_size,
        sequence_length,
        input_hidden_size,
        hidden_size_q,
        hidden_size_k,
        hidden_size_v,
        kv_sequence_length,
        past_sequence_length,
        total_sequence_length,
        num_heads,
        mask_type,
    })
}

fn check_kv_input(name: &str, dims: &[usize], batch_size: usize, input_hidden_size: usize) -> Result<()> {
    invalid_if!(dims.len() != 3, "Input '{}' is expected to have 3 dimensions, got {}", name, dims.len());
    invalid_if!(
        dims[0] != batch_size,
        "Input '{}' dimension 0 should have same length as dimension 0 of input 0",
        name
    );
    invalid_if!(
        dims[2] != input_hidden_size,
        "Input '{}' dimension 2 should have same length as dimension 2 of input 0",
        name
    );
    Ok(())
}

fn check_kv_weight(name: &str, dims: &[usize], input_hidden_size: usize) -> Result<()> {
    invalid_if!(dims.len() != 2, "Input '{}' is expected to have 2 dimensions, got {}", name, dims.len());
    invalid_if!(
        dims[0] != input_hidden_size,
        "Input '{}' dimension 0 should have same length as dimension 2 of input 0",
        name
    );
    Ok(())
}

fn check_mask(
    mask: &[usize],
    config: &AttentionConfig,
    batch_size: usize,
    sequence_length: usize,
    past_sequence_length: usize,
    total_sequence_length: usize,
) -> Result<MaskType> {
    match mask.len() {
        1 => {
            if mask[0] == batch_size {
                Ok(MaskType::KeyEnd)
            } else if mask[0] == 2 * batch_size {
                Ok(MaskType::KeyStartEnd)
            } else {
                Err(kore_core::KoreError::invalid_argument(
                    "Inputs 'mask_index' with 1D data shall have length of batch_size or 2 * batch_size",
                ))
            }
        }
        2 => {
            if mask[0] == batch_size && mask[1] == total_sequence_length {
                Ok(MaskType::Key2D)
            } else if (mask[0] == batch_size || mask[0] == 1) && mask[1] == 1 {
                // Broadcasting one value per row masks every key alike.
                Ok(MaskType::None)
            } else {
                Err(kore_core::KoreError::invalid_argument(
                    "Inputs 'mask_index' with 2D data shall have shape batch_size x total_sequence_length",
                ))
            }
        }
        3 => {
            invalid_if!(
                mask[0] != batch_size || mask[1] != sequence_length || mask[2] != total_sequence_length,
                "Inputs 'mask_index' with 3D data shall have shape batch_size x sequence_length x total_sequence_length"
            );
            Ok(MaskType::Raw3D)
        }
        4 => {
            invalid_if!(
                mask[0] != batch_size || mask[1] != 1 || mask[2] != mask[3] || mask[2] < total_sequence_length,
                "Inputs 'mask_index' with 4D data shall have shape batch_size x 1 x max_sequence_length x max_sequence_length"
            );
            // Query rows are read at offset past_sequence_length.
            invalid_if!(
                mask[2] < past_sequence_length + sequence_length,
                "Inputs 'mask_index' with 4D data shall have max_sequence_length no less than past_sequence_length + sequence_length ({}), got {}",
                past_sequence_length + sequence_length,
                mask[2]
            );
            invalid_if!(
                config.is_unidirectional,
                "Inputs 'mask_index' with 4D data shall have is_unidirectional set to false"
            );
            Ok(MaskType::Raw4D {
                max_sequence_length: mask[2],
            })
        }
        rank => Err(kore_core::KoreError::invalid_argument(format!(
            "Input 'mask_index' is expected to have 1, 2, 3 or 4 dimensions, got {rank}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(result: Result<AttentionParameters>) -> String {
        match result {
            Ok(params) => panic!("expected an error, got {params:?}"),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn test_merged_defaults() {
        let config = AttentionConfig::new(2);
        let params = check_inputs(&config, &AttentionShapes::new(&[2, 4, 16], &[16, 48], &[48])).unwrap();
        assert_eq!(params.hidden_sizes(), [16, 16, 16]);
        assert_eq!(params.head_sizes(), [8, 8, 8]);
        assert_eq!(params.kv_sequence_length, 4);
        assert_eq!(params.total_sequence_length, 4);
        assert_eq!(params.mask_type, MaskType::None);
    }

    #[test]
    fn test_bias_must_be_three_times_hidden() {
        let config = AttentionConfig::new(1);
        let msg = message(check_inputs(&config, &AttentionShapes::new(&[1, 2, 4], &[4, 10], &[10])));
        assert!(msg.contains("sum of Q/K/V hidden sizes"), "{msg}");
        let msg = message(check_inputs(&config, &AttentionShapes::new(&[1, 2, 4], &[4, 12], &[9])));
        assert!(msg.contains("dimension 1 of input 'weights'"), "{msg}");
    }

    #[test]
    fn test_rank_errors() {
        let config = AttentionConfig::new(1);
        let msg = message(check_inputs(&config, &AttentionShapes::new(&[2, 4], &[4, 12], &[12])));
        assert!(msg.contains("Input 'input' is expected to have 3 dimensions, got 2"), "{msg}");
        let msg = message(check_inputs(&config, &AttentionShapes::new(&[1, 2, 4], &[4, 12, 1], &[12])));
        assert!(msg.contains("Input 'weights' is expected to have 2 dimensions, got 3"), "{msg}");
        let msg = message(check_inputs(&config, &AttentionShapes::new(&[1, 2, 4], &[4, 12], &[12, 1])));
        assert!(msg.contains("Input 'bias' is expected to have 1 dimension, got 2"), "{msg}");
        let msg = message(check_inputs(&config, &AttentionShapes::new(&[1, 2, 5], &[4, 12], &[12])));
        assert!(msg.contains("dimension 0 should have same length as dimension 2"), "{msg}");
    }

    #[test]
    fn test_qkv_hidden_sizes_clauses() {
        let shapes = AttentionShapes::new(&[1, 2, 8], &[8, 20], &[20]);

        let ok = AttentionConfig::new(2).with_qkv_hidden_sizes([8, 8, 4]);
        let params = check_inputs(&ok, &shapes).unwrap();
        assert_eq!(params.head_sizes(), [4, 4, 2]);

        let two = AttentionConfig::new(2).with_qkv_hidden_sizes([10, 10]);
        assert!(message(check_inputs(&two, &shapes)).contains("should have 3 elements"));

        let indivisible = AttentionConfig::new(2).with_qkv_hidden_sizes([8, 8, 3]);
        let msg = message(check_inputs(&indivisible, &AttentionShapes::new(&[1, 2, 8], &[8, 19], &[19])));
        assert!(msg.contains("hidden_size should be divisible by num_heads:3"), "{msg}");

        let unequal = AttentionConfig::new(2).with_qkv_hidden_sizes([8, 4, 8]);
        let msg = message(check_inputs(&unequal, &shapes));
        assert!(msg.contains("qkv_hidden_sizes first element should be same as the second"), "{msg}");
    }

    #[test]
    fn test_default_hidden_not_divisible_by_heads() {
        let config = AttentionConfig::new(3);
        let msg = message(check_inputs(&config, &AttentionShapes::new(&[1, 2, 8], &[8, 24], &[24])));
        assert!(msg.contains("hidden_size should be divisible by num_heads:8"), "{msg}");
    }

    #[test]
    fn test_past_and_extra_add_qk_exclusive() {
        let config = AttentionConfig::new(2);
        let shapes = AttentionShapes::new(&[2, 4, 16], &[16, 48], &[48])
            .with_past(&[2, 2, 2, 3, 8])
            .with_extra_add_qk(&[2, 2, 4, 4]);
        assert!(message(check_inputs(&config, &shapes)).contains("cannot have past sequence and extra add qk"));
    }

    #[test]
    fn test_past_dimensions() {
        let config = AttentionConfig::new(2);
        let base = AttentionShapes::new(&[2, 4, 16], &[16, 48], &[48]);

        let params = check_inputs(&config, &base.with_past(&[2, 2, 2, 3, 8])).unwrap();
        assert_eq!(params.past_sequence_length, 3);
        assert_eq!(params.total_sequence_length, 7);

        let cases: [(&[usize], &str); 5] = [
            (&[2, 2, 2, 3], "expected to have 5 dimension, got 4"),
            (&[3, 2, 2, 3, 8], "dimension 0 shall have length of 2"),
            (&[2, 1, 2, 3, 8], "dimension 1 shall have same length"),
            (&[2, 2, 4, 3, 8], "dimension 2 shall have length of num_heads 2"),
            (&[2, 2, 2, 3, 4], "dimension 4 shall have length of 8"),
        ];
        for (past, expected) in cases {
            let msg = message(check_inputs(&config, &base.with_past(past)));
            assert!(msg.contains(expected), "{past:?}: {msg}");
        }
    }

    #[test]
    fn test_past_requires_equal_k_v_hidden() {
        let config = AttentionConfig::new(2).with_qkv_hidden_sizes([8, 8, 4]);
        let shapes = AttentionShapes::new(&[1, 2, 8], &[8, 20], &[20]).with_past(&[2, 1, 2, 1, 4]);
        assert!(message(check_inputs(&config, &shapes)).contains("hidden_size_k == hidden_size_v"));
    }

    #[test]
    fn test_mask_forms() {
        let config = AttentionConfig::new(2);
        let base = AttentionShapes::new(&[2, 4, 16], &[16, 48], &[48]);
        let mask_type = |mask: &[usize]| check_inputs(&config, &base.with_mask(mask)).map(|p| p.mask_type);

        assert_eq!(mask_type(&[2]).unwrap(), MaskType::KeyEnd);
        assert_eq!(mask_type(&[4]).unwrap(), MaskType::KeyStartEnd);
        assert_eq!(mask_type(&[2, 4]).unwrap(), MaskType::Key2D);
        assert_eq!(mask_type(&[2, 1]).unwrap(), MaskType::None);
        assert_eq!(mask_type(&[1, 1]).unwrap(), MaskType::None);
        assert_eq!(mask_type(&[2, 4, 4]).unwrap(), MaskType::Raw3D);
        assert_eq!(
            mask_type(&[2, 1, 6, 6]).unwrap(),
            MaskType::Raw4D {
                max_sequence_length: 6
            }
        );

        assert!(mask_type(&[3]).unwrap_err().to_string().contains("1D data"));
        assert!(mask_type(&[2, 3]).unwrap_err().to_string().contains("2D data"));
        assert!(mask_type(&[2, 4, 3]).unwrap_err().to_string().contains("3D data"));
        assert!(mask_type(&[2, 1, 3, 3]).unwrap_err().to_string().contains("4D data"));
        assert!(mask_type(&[1, 1, 1, 1, 1])
            .unwrap_err()
            .to_string()
            .contains("1, 2, 3 or 4 dimensions, got 5"));
    }

    #[test]
    fn test_4d_mask_rejected_when_unidirectional() {
        let config = AttentionConfig::new(2).with_unidirectional(true);
        let shapes = AttentionShapes::new(&[2, 4, 16], &[16, 48], &[48]).with_mask(&[2, 1, 4, 4]);
        assert!(message(check_inputs(&config, &shapes)).contains("is_unidirectional set to false"));
    }

    #[test]
    fn test_4d_mask_must_cover_every_query_row() {
        let config = AttentionConfig::new(1).with_merged_weights(false);
        let base = AttentionShapes::new(&[1, 3, 2], &[2, 2], &[6]).with_separate(&[1, 1, 2], &[1, 1, 2], &[2, 2], &[2, 2]);
        let err = message(check_inputs(&config, &base.with_mask(&[1, 1, 1, 1])));
        assert!(err.contains("no less than past_sequence_length + sequence_length (3), got 1"));
        assert_eq!(
            check_inputs(&config, &base.with_mask(&[1, 1, 3, 3])).unwrap().mask_type,
            MaskType::Raw4D {
                max_sequence_length: 3
            }
        );
    }

    #[test]
    fn test_extra_add_qk_shape() {
        let config = AttentionConfig::new(2);
        let base = AttentionShapes::new(&[2, 4, 16], &[16, 48], &[48]);
        assert!(check_inputs(&config, &base.with_extra_add_qk(&[2, 2, 4, 4])).is_ok());
        let msg = message(check_inputs(&config, &base.with_extra_add_qk(&[2, 3, 4, 4])));
        assert!(msg.contains("dimension 1 should be same as number of heads, got 3"), "{msg}");
        let msg = message(check_inputs(&config, &base.with_extra_add_qk(&[2, 2, 4])));
        assert!(msg.contains("expected to have 4 dimensions, got 3"), "{msg}");
    }

    #[test]
    fn test_separate_layout() {
        let config = AttentionConfig::new(2).with_merged_weights(false);
        let shapes = AttentionShapes::new(&[2, 3, 8], &[8, 8], &[20]).with_separate(&[2, 5, 8], &[2, 5, 8], &[8, 8], &[8, 4]);
        let params = check_inputs(&config, &shapes).unwrap();
        assert_eq!(params.hidden_sizes(), [8, 8, 4]);
        assert_eq!(params.kv_sequence_length, 5);
        assert_eq!(params.total_sequence_length, 5);

        let missing = AttentionShapes::new(&[2, 3, 8], &[8, 8], &[20]);
        assert!(message(check_inputs(&config, &missing)).contains("key, value, weight_key and weight_value are required"));

        let mismatched =
            AttentionShapes::new(&[2, 3, 8], &[8, 8], &[20]).with_separate(&[2, 5, 8], &[2, 4, 8], &[8, 8], &[8, 4]);
        assert!(message(check_inputs(&config, &mismatched)).contains("'key' and 'value' dimension 1"));

        let bad_weight =
            AttentionShapes::new(&[2, 3, 8], &[8, 8], &[20]).with_separate(&[2, 5, 8], &[2, 5, 8], &[6, 8], &[8, 4]);
        assert!(message(check_inputs(&config, &bad_weight)).contains("Input 'weight_key' dimension 0"));
    }

    #[test]
    fn test_thread_limit() {
        let config = AttentionConfig::new(4);
        let shapes = AttentionShapes::new(&[1, 2, 16], &[16, 48], &[48]);
        let msg = message(check_inputs_with_thread_limit(&config, &shapes, 2));
        assert_eq!(msg, "invalid argument: num_heads should be no larger than 2");
        assert!(check_inputs_with_thread_limit(&config, &shapes, 4).is_ok());

        // Separate inputs are ignored by the limited overload.
        let separate = AttentionConfig::new(4).with_merged_weights(false);
        assert!(check_inputs_with_thread_limit(&separate, &shapes, 8).is_ok());
    }
}
