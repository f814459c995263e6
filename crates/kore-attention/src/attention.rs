//! The multi-head attention kernel.
//!
//! A kernel is built once from its [`AttentionConfig`], optionally has its
//! weights pre-packed, and is then invoked any number of times through
//! [`Attention::compute`], which never mutates the kernel.

use std::sync::Arc;

use kore_core::{Allocator, Buffer, KoreError, Result, Tensor};
use kore_kernels::{CpuGemm, GemmBackend, ParallelFor};

use crate::check::{self, AttentionParameters, AttentionShapes, MaskType};
use crate::config::AttentionConfig;
use crate::pack::{pack_weights, PackedWeights, PrePackedWeights};
use crate::projection::{project, ProjectionInputs, ProjectionWeights};
use crate::scorer::{AttentionOutputs, AttentionScorer, CpuAttentionScorer, ScoreRequest};

/// Position of the weights operand among the kernel inputs.
pub const WEIGHTS_INPUT_INDEX: usize = 1;

/// Input tensors of one call. `weights` may be omitted once pre-packed.
#[derive(Debug, Clone, Copy)]
pub struct AttentionInputs<'a> {
    pub input: &'a Tensor,
    pub weights: Option<&'a Tensor>,
    pub bias: &'a Tensor,
    pub mask: Option<&'a Tensor>,
    pub past: Option<&'a Tensor>,
    pub extra_add_qk: Option<&'a Tensor>,
    pub key: Option<&'a Tensor>,
    pub value: Option<&'a Tensor>,
    pub weight_key: Option<&'a Tensor>,
    pub weight_value: Option<&'a Tensor>,
}

impl<'a> AttentionInputs<'a> {
    pub fn new(input: &'a Tensor, weights: &'a Tensor, bias: &'a Tensor) -> Self {
        Self {
            weights: Some(weights),
            ..Self::prepacked(input, bias)
        }
    }

    /// Inputs for a kernel whose weights were pre-packed.
    pub fn prepacked(input: &'a Tensor, bias: &'a Tensor) -> Self {
        Self {
            input,
            weights: None,
            bias,
            mask: None,
            past: None,
            extra_add_qk: None,
            key: None,
            value: None,
            weight_key: None,
            weight_value: None,
        }
    }

    pub fn with_mask(mut self, mask: &'a Tensor) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_past(mut self, past: &'a Tensor) -> Self {
        self.past = Some(past);
        self
    }

    pub fn with_extra_add_qk(mut self, extra_add_qk: &'a Tensor) -> Self {
        self.extra_add_qk = Some(extra_add_qk);
        self
    }

    pub fn with_separate(
        mut self,
        key: &'a Tensor,
        value: &'a Tensor,
        weight_key: &'a Tensor,
        weight_value: &'a Tensor,
    ) -> Self {
        self.key = Some(key);
        self.value = Some(value);
        self.weight_key = Some(weight_key);
        self.weight_value = Some(weight_value);
        self
    }
}

/// Which optional outputs the caller can receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputSlots {
    pub present: bool,
}

impl OutputSlots {
    pub fn output_only() -> Self {
        Self { present: false }
    }

    pub fn with_present() -> Self {
        Self { present: true }
    }
}

/// Projection strategy, fixed when weights are pre-packed.
#[derive(Debug, Clone)]
pub enum ComputePath {
    Generic,
    Packed(PackedWeights),
}

pub struct Attention {
    config: AttentionConfig,
    backend: Arc<dyn GemmBackend>,
    scorer: Arc<dyn AttentionScorer>,
    path: ComputePath,
}

impl Attention {
    pub fn new(config: AttentionConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(CpuGemm))
    }

    pub fn with_backend(config: AttentionConfig, backend: Arc<dyn GemmBackend>) -> Result<Self> {
        config.validate()?;
        let scorer = Arc::new(CpuAttentionScorer::new(Arc::clone(&backend)));
        Ok(Self {
            config,
            backend,
            scorer,
            path: ComputePath::Generic,
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn AttentionScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    pub fn compute_path(&self) -> &ComputePath {
        &self.path
    }

    pub fn is_prepacked(&self) -> bool {
        matches!(self.path, ComputePath::Packed(_))
    }

    pub fn check_inputs(&self, shapes: &AttentionShapes<'_>) -> Result<AttentionParameters> {
        check::check_inputs(&self.config, shapes)
    }

    pub fn check_inputs_with_thread_limit(
        &self,
        shapes: &AttentionShapes<'_>,
        max_threads_per_block: usize,
    ) -> Result<AttentionParameters> {
        check::check_inputs_with_thread_limit(&self.config, shapes, max_threads_per_block)
    }

    /// Pack the weights operand ahead of the first call.
    ///
    /// Returns `Ok(false)` without changing the kernel when the tensor is not
    /// packable (other inputs, separate weights, unexpected shapes, or a
    /// backend that cannot pack the head size). When `prepacked` is given the
    /// packed buffers are also handed out for sharing.
    pub fn pre_pack(
        &mut self,
        weights: &Tensor,
        input_index: usize,
        alloc: &dyn Allocator,
        prepacked: Option<&mut PrePackedWeights>,
    ) -> Result<bool> {
        if input_index != WEIGHTS_INPUT_INDEX || !self.config.use_merged_weights {
            return Ok(false);
        }
        let dims = weights.dims();
        if dims.len() != 2 {
            return Ok(false);
        }

        let num_heads = self.config.num_heads;
        let hidden_sizes = match self.config.qkv_hidden_sizes.as_slice() {
            [] => [dims[1] / 3; 3],
            &[q, k, v] => [q, k, v],
            _ => return Ok(false),
        };
        if hidden_sizes.iter().any(|&h| h == 0 || h % num_heads != 0) {
            tracing::debug!(?hidden_sizes, num_heads, "weights not packable");
            return Ok(false);
        }
        if hidden_sizes.iter().sum::<usize>() != dims[1] {
            tracing::debug!(?hidden_sizes, width = dims[1], "weight width does not match hidden sizes");
            return Ok(false);
        }

        let Some(packed) = pack_weights(
            self.backend.as_ref(),
            alloc,
            weights.as_f32_slice(),
            weights.shape(),
            hidden_sizes,
            num_heads,
        )?
        else {
            return Ok(false);
        };

        if let Some(prepacked) = prepacked {
            for qkv in 0..3 {
                let buffer = packed.slot(qkv).buffer();
                prepacked.buffers.push(Arc::clone(buffer));
                prepacked.buffer_sizes.push(buffer.len_bytes());
            }
        }
        tracing::debug!(
            head_sizes = ?packed.head_sizes(),
            input_hidden_size = packed.input_hidden_size(),
            backend = self.backend.name(),
            "attention weights pre-packed"
        );
        self.path = ComputePath::Packed(packed);
        Ok(true)
    }

    /// Replace this kernel's packed buffers with shared ones, in Q, K, V
    /// order.
    pub fn use_shared_prepacked_buffers(&mut self, buffers: Vec<Arc<Buffer>>, input_index: usize) -> Result<bool> {
        if input_index != WEIGHTS_INPUT_INDEX {
            return Ok(false);
        }
        let ComputePath::Packed(packed) = &mut self.path else {
            return Err(KoreError::StorageError(
                "shared pre-packed buffers supplied to a kernel without a packed layout".into(),
            ));
        };
        let buffers: [Arc<Buffer>; 3] = buffers.try_into().map_err(|b: Vec<Arc<Buffer>>| {
            KoreError::invalid_argument(format!("expected 3 shared pre-packed buffers, got {}", b.len()))
        })?;
        packed.adopt(buffers)?;
        Ok(true)
    }

    pub fn compute(
        &self,
        inputs: &AttentionInputs<'_>,
        slots: OutputSlots,
        alloc: &dyn Allocator,
        pool: Option<&dyn ParallelFor>,
    ) -> Result<AttentionOutputs> {
        let weights_shape = match (&self.path, inputs.weights) {
            (ComputePath::Packed(packed), _) => packed.weight_shape().dims(),
            (ComputePath::Generic, Some(weights)) => weights.dims(),
            (ComputePath::Generic, None) => {
                return Err(KoreError::invalid_argument(
                    "Input 'weights' is required when weights are not pre-packed",
                ))
            }
        };
        let shapes = AttentionShapes {
            input: inputs.input.dims(),
            weights: weights_shape,
            bias: inputs.bias.dims(),
            mask: inputs.mask.map(Tensor::dims),
            past: inputs.past.map(Tensor::dims),
            extra_add_qk: inputs.extra_add_qk.map(Tensor::dims),
            key: inputs.key.map(Tensor::dims),
            value: inputs.value.map(Tensor::dims),
            weight_key: inputs.weight_key.map(Tensor::dims),
            weight_value: inputs.weight_value.map(Tensor::dims),
        };
        let params = self.check_inputs(&shapes)?;
        if inputs.past.is_some() && !slots.present {
            return Err(KoreError::MissingOutput("present".into()));
        }

        tracing::debug!(
            batch_size = params.batch_size,
            sequence_length = params.sequence_length,
            past_sequence_length = params.past_sequence_length,
            num_heads = params.num_heads,
            packed = self.is_prepacked(),
            "attention compute"
        );

        let weights = match &self.path {
            ComputePath::Packed(packed) => ProjectionWeights::Packed(packed),
            ComputePath::Generic if self.config.use_merged_weights => {
                ProjectionWeights::Merged(required(inputs.weights, "weights")?)
            }
            ComputePath::Generic => ProjectionWeights::Separate {
                q: required(inputs.weights, "weights")?,
                k: required(inputs.weight_key, "weight_key")?,
                v: required(inputs.weight_value, "weight_value")?,
            },
        };
        let projection_inputs = ProjectionInputs {
            input: inputs.input.as_f32_slice(),
            key: inputs.key.map(Tensor::as_f32_slice),
            value: inputs.value.map(Tensor::as_f32_slice),
            bias: inputs.bias.as_f32_slice(),
            weights,
        };
        let qkv = project(self.backend.as_ref(), &params, &projection_inputs, alloc, pool)?;

        let mask = match params.mask_type {
            MaskType::None => None,
            _ => inputs.mask.map(Tensor::as_f32_slice),
        };
        let request = ScoreRequest {
            params: &params,
            qkv: &qkv,
            mask,
            past: inputs.past.map(Tensor::as_f32_slice),
            extra_add_qk: inputs.extra_add_qk.map(Tensor::as_f32_slice),
            is_unidirectional: self.config.is_unidirectional,
            mask_filter_value: self.config.mask_filter_value,
            want_present: slots.present,
        };
        self.scorer.score(&request, alloc, pool)
    }
}

impl std::fmt::Debug for Attention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attention")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .field("prepacked", &self.is_prepacked())
            .finish()
    }
}

fn required<'a>(tensor: Option<&'a Tensor>, name: &str) -> Result<&'a [f32]> {
    tensor
        .map(Tensor::as_f32_slice)
        .ok_or_else(|| KoreError::invalid_argument(format!("Input '{name}' is required")))
}
