//! GEMM backend abstraction.
//!
//! Attention code only talks to [`GemmBackend`]; [`CpuGemm`] is the host
//! implementation built on the tiled kernels in this crate.

use crate::gemm::{self, Transpose};
use crate::packed;
use crate::parallel::ParallelFor;

/// Dense and packed single-precision GEMM.
pub trait GemmBackend: Send + Sync {
    fn name(&self) -> &str;

    #[allow(clippy::too_many_arguments)]
    fn gemm(
        &self,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &[f32],
        lda: usize,
        b: &[f32],
        ldb: usize,
        beta: f32,
        c: &mut [f32],
        ldc: usize,
        pool: Option<&dyn ParallelFor>,
    );

    /// Bytes required to pack an `n x k` B operand; 0 when packing is not
    /// available for that shape.
    fn packed_b_size(&self, n: usize, k: usize) -> usize;

    fn pack_b(&self, trans_b: Transpose, n: usize, k: usize, b: &[f32], ldb: usize, dst: &mut [f32]);

    #[allow(clippy::too_many_arguments)]
    fn packed_gemm(
        &self,
        trans_a: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &[f32],
        lda: usize,
        packed_b: &[f32],
        beta: f32,
        c: &mut [f32],
        ldc: usize,
        pool: Option<&dyn ParallelFor>,
    );
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuGemm;

impl GemmBackend for CpuGemm {
    fn name(&self) -> &str {
        "cpu"
    }

    fn gemm(
        &self,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &[f32],
        lda: usize,
        b: &[f32],
        ldb: usize,
        beta: f32,
        c: &mut [f32],
        ldc: usize,
        pool: Option<&dyn ParallelFor>,
    ) {
        gemm::gemm(trans_a, trans_b, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc, pool);
    }

    fn packed_b_size(&self, n: usize, k: usize) -> usize {
        packed::packed_b_size(n, k)
    }

    fn pack_b(&self, trans_b: Transpose, n: usize, k: usize, b: &[f32], ldb: usize, dst: &mut [f32]) {
        packed::pack_b(trans_b, n, k, b, ldb, dst);
    }

    fn packed_gemm(
        &self,
        trans_a: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &[f32],
        lda: usize,
        packed_b: &[f32],
        beta: f32,
        c: &mut [f32],
        ldc: usize,
        pool: Option<&dyn ParallelFor>,
    ) {
        packed::packed_gemm(trans_a, m, n, k, alpha, a, lda, packed_b, beta, c, ldc, pool);
    }
}
