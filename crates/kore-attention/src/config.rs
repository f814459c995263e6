//! Attention kernel attributes.

use kore_core::{KoreError, Result};
use serde::{Deserialize, Serialize};

/// Additive score applied to masked-out key positions.
pub const DEFAULT_MASK_FILTER_VALUE: f32 = -10000.0;

/// Attributes of one attention kernel instance. Immutable once the kernel is
/// built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionConfig {
    /// Number of attention heads.
    pub num_heads: usize,

    /// Apply a causal mask so a query never attends to later keys.
    #[serde(default)]
    pub is_unidirectional: bool,

    /// Explicit Q/K/V hidden sizes. Empty means the bias length is split into
    /// three equal parts.
    #[serde(default)]
    pub qkv_hidden_sizes: Vec<usize>,

    /// Q/K/V weights concatenated in one matrix. When false, K and V are
    /// projected from separate `key`/`value` inputs with their own weights.
    #[serde(default = "default_merged_weights")]
    pub use_merged_weights: bool,

    #[serde(default = "default_mask_filter_value")]
    pub mask_filter_value: f32,
}

fn default_merged_weights() -> bool {
    true
}

fn default_mask_filter_value() -> f32 {
    DEFAULT_MASK_FILTER_VALUE
}

impl AttentionConfig {
    pub fn new(num_heads: usize) -> Self {
        Self {
            num_heads,
            is_unidirectional: false,
            qkv_hidden_sizes: Vec::new(),
            use_merged_weights: true,
            mask_filter_value: DEFAULT_MASK_FILTER_VALUE,
        }
    }

    pub fn with_unidirectional(mut self, is_unidirectional: bool) -> Self {
        self.is_unidirectional = is_unidirectional;
        self
    }

    pub fn with_qkv_hidden_sizes(mut self, sizes: impl Into<Vec<usize>>) -> Self {
        self.qkv_hidden_sizes = sizes.into();
        self
    }

    pub fn with_merged_weights(mut self, merged: bool) -> Self {
        self.use_merged_weights = merged;
        self
    }

    pub fn with_mask_filter_value(mut self, value: f32) -> Self {
        self.mask_filter_value = value;
        self
    }

    /// Parse attribute JSON, e.g. `{"num_heads": 12, "is_unidirectional": true}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| KoreError::invalid_argument(format!("invalid attention attributes: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        kore_core::invalid_if!(self.num_heads == 0, "num_heads should be positive, got 0");
        Ok(())
    }
}
