//! # kore-kernels
//!
//! CPU compute primitives for the Kore attention runtime.
//!
//! Provides:
//! - Runtime SIMD capability detection (AVX2+FMA, NEON) and vector kernels
//! - Strided, tiled GEMM with alpha/beta and transposes
//! - Packed-B panel layout and the matching packed GEMM
//! - `GemmBackend` trait with the `CpuGemm` implementation
//! - `ParallelFor` executors: rayon `ThreadPool` and inline `Sequential`

pub mod backend;
pub mod gemm;
pub mod packed;
pub mod parallel;
pub mod simd;

pub use backend::{CpuGemm, GemmBackend};
pub use gemm::Transpose;
pub use packed::PACK_PANEL;
pub use parallel::{try_parallel_for, DisjointSlots, ParallelFor, Sequential, ThreadPool};
pub use simd::SimdCapability;
