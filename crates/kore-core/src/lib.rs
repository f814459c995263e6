//! # kore-core
//!
//! Foundation types for the Kore attention runtime.
//!
//! Provides:
//! - `Tensor`: dense f32 tensor with a device placement tag
//! - `Shape` for concrete shapes, `SymbolicShape` for graph-declared ones
//! - `Device` memory spaces (CPU, pinned host, CUDA)
//! - `Allocator` / `Buffer` scoped allocations with live-byte accounting
//! - `KoreError`, the shared error type

pub mod allocator;
pub mod device;
pub mod error;
pub mod shape;
pub mod tensor;

pub use allocator::{AllocStats, Allocator, Buffer, CpuAllocator};
pub use device::Device;
pub use error::KoreError;
pub use shape::{Dim, Shape, SymbolicShape};
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, KoreError>;
