//! # kore-attention
//!
//! Multi-head attention kernel for Kore.
//!
//! Provides:
//! - Shape validation for merged and separate Q/K/V weights
//! - Weight pre-packing with cross-kernel buffer sharing
//! - Parallel Q/K/V projection over (batch, head, slot) units
//! - Key-end, start/end, raw 2D/3D/4D and causal masks
//! - Past/present key-value state for incremental decoding
//! - `AttentionScorer` trait with a CPU reference scorer

pub mod attention;
pub mod check;
pub mod config;
pub mod kv_cache;
pub mod mask;
pub mod pack;
pub mod projection;
pub mod scorer;

pub use attention::{Attention, AttentionInputs, ComputePath, OutputSlots, WEIGHTS_INPUT_INDEX};
pub use check::{check_inputs, check_inputs_with_thread_limit, AttentionParameters, AttentionShapes, MaskType};
pub use config::AttentionConfig;
pub use pack::{PackedWeights, PrePackCache, PrePackedWeights};
pub use projection::{ProjectionUnit, QkvBuffer};
pub use scorer::{AttentionOutputs, AttentionScorer, CpuAttentionScorer, ScoreRequest};
