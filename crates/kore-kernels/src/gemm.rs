//! Strided single-precision GEMM: `C = alpha * op(A) @ op(B) + beta * C`.
//!
//! Row-major, BLAS-style leading dimensions. Cache tiling over K and N with a
//! SIMD `axpy` inner loop; the `A @ B^T` case uses SIMD dot products instead
//! since both operands are contiguous along K.

use std::ops::Range;

use crate::parallel::{try_parallel_for, DisjointSlots, ParallelFor};
use crate::simd::{self, SimdCapability};

const TILE_M: usize = 64;
const TILE_N: usize = 256;
const TILE_K: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    No,
    Yes,
}

/// Operand views shared by every row block of one GEMM call.
#[derive(Clone, Copy)]
pub(crate) struct GemmArgs<'a> {
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub a: &'a [f32],
    pub lda: usize,
    pub b: &'a [f32],
    pub ldb: usize,
    pub beta: f32,
    pub ldc: usize,
}

impl GemmArgs<'_> {
    #[inline]
    fn a_at(&self, i: usize, p: usize) -> f32 {
        match self.trans_a {
            Transpose::No => self.a[i * self.lda + p],
            Transpose::Yes => self.a[p * self.lda + i],
        }
    }
}

/// Scale the first `n` entries of every C row in `rows` by `beta`.
pub(crate) fn scale_rows(c: &mut [f32], rows: usize, n: usize, ldc: usize, beta: f32) {
    if beta == 1.0 {
        return;
    }
    for r in 0..rows {
        let row = &mut c[r * ldc..r * ldc + n];
        if beta == 0.0 {
            row.fill(0.0);
        } else {
            row.iter_mut().for_each(|v| *v *= beta);
        }
    }
}

/// Split C into row blocks of `TILE_M` rows and run `block` over them,
/// in parallel when a pool is supplied.
pub(crate) fn for_each_row_block(
    c: &mut [f32],
    m: usize,
    ldc: usize,
    cost_per_block: f64,
    pool: Option<&dyn ParallelFor>,
    block: &(dyn Fn(Range<usize>, &mut [f32]) + Sync),
) {
    let num_blocks = m.div_ceil(TILE_M);
    let slots = DisjointSlots::new(c.chunks_mut(TILE_M * ldc).take(num_blocks));
    try_parallel_for(pool, num_blocks, cost_per_block, &|range| {
        for bi in range {
            let rows = bi * TILE_M..((bi + 1) * TILE_M).min(m);
            slots.with(bi, |c_block| block(rows, c_block));
        }
    });
}

/// General matrix multiply.
///
/// `a` is `m x k` (or `k x m` when transposed), `b` is `k x n` (or `n x k`),
/// `c` is `m x n`; all with the given leading dimensions.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
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
    if m == 0 || n == 0 {
        return;
    }
    debug_assert!(c.len() >= (m - 1) * ldc + n, "C too small for {m}x{n} (ldc={ldc})");

    let args = GemmArgs {
        trans_a,
        trans_b,
        n,
        k,
        alpha,
        a,
        lda,
        b,
        ldb,
        beta,
        ldc,
    };
    let cost = (TILE_M * n * k) as f64;
    for_each_row_block(c, m, ldc, cost, pool, &|rows, c_block| {
        gemm_rows(&args, rows, c_block)
    });
}

/// Compute the C rows in `rows`; `c` starts at the first of them.
fn gemm_rows(args: &GemmArgs<'_>, rows: Range<usize>, c: &mut [f32]) {
    let GemmArgs { n, k, ldc, .. } = *args;
    let cap = SimdCapability::detect();
    scale_rows(c, rows.len(), n, ldc, args.beta);
    if k == 0 || args.alpha == 0.0 {
        return;
    }

    if args.trans_a == Transpose::No && args.trans_b == Transpose::Yes {
        for (r, i) in rows.enumerate() {
            let a_row = &args.a[i * args.lda..i * args.lda + k];
            let c_row = &mut c[r * ldc..r * ldc + n];
            for (j, c_val) in c_row.iter_mut().enumerate() {
                let b_row = &args.b[j * args.ldb..j * args.ldb + k];
                *c_val += args.alpha * simd::dot(cap, a_row, b_row);
            }
        }
        return;
    }

    for p0 in (0..k).step_by(TILE_K) {
        let p_end = (p0 + TILE_K).min(k);
        for j0 in (0..n).step_by(TILE_N) {
            let j_end = (j0 + TILE_N).min(n);
            for (r, i) in rows.clone().enumerate() {
                let c_row = &mut c[r * ldc + j0..r * ldc + j_end];
                for p in p0..p_end {
                    let a_val = args.alpha * args.a_at(i, p);
                    match args.trans_b {
                        Transpose::No => {
                            let b_row = &args.b[p * args.ldb + j0..p * args.ldb + j_end];
                            simd::axpy(cap, a_val, b_row, c_row);
                        }
                        Transpose::Yes => {
                            for (jj, c_val) in c_row.iter_mut().enumerate() {
                                *c_val += a_val * args.b[(j0 + jj) * args.ldb + p];
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ThreadPool;

    /// Naive reference with explicit strides.
    #[allow(clippy::too_many_arguments)]
    fn reference(
        ta: Transpose,
        tb: Transpose,
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
    ) {
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for p in 0..k {
                    let av = if ta == Transpose::No { a[i * lda + p] } else { a[p * lda + i] };
                    let bv = if tb == Transpose::No { b[p * ldb + j] } else { b[j * ldb + p] };
                    acc += av * bv;
                }
                c[i * ldc + j] = alpha * acc + beta * c[i * ldc + j];
            }
        }
    }

    fn assert_close(a: &[f32], b: &[f32], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() < tol, "element {i} differs: {x} vs {y}");
        }
    }

    #[test]
    fn test_gemm_basic() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut c = [0.0; 4];
        gemm(Transpose::No, Transpose::No, 2, 2, 3, 1.0, &a, 3, &b, 2, 0.0, &mut c, 2, None);
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_gemm_beta_accumulates() {
        let a = [1.0, 0.0, 0.0, 1.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [1.0, 1.0, 1.0, 1.0];
        gemm(Transpose::No, Transpose::No, 2, 2, 2, 1.0, &a, 2, &b, 2, 1.0, &mut c, 2, None);
        assert_eq!(c, [6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_gemm_all_transpose_combinations() {
        let (m, n, k) = (7, 5, 9);
        let a: Vec<f32> = (0..m * k).map(|i| (i % 7) as f32 * 0.1).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 11) as f32 * 0.1).collect();
        for ta in [Transpose::No, Transpose::Yes] {
            for tb in [Transpose::No, Transpose::Yes] {
                let lda = if ta == Transpose::No { k } else { m };
                let ldb = if tb == Transpose::No { n } else { k };
                let mut got = vec![0.5f32; m * n];
                let mut want = got.clone();
                gemm(ta, tb, m, n, k, 0.5, &a, lda, &b, ldb, 2.0, &mut got, n, None);
                reference(ta, tb, m, n, k, 0.5, &a, lda, &b, ldb, 2.0, &mut want, n);
                assert_close(&got, &want, 1e-4);
            }
        }
    }

    #[test]
    fn test_gemm_strided_submatrix() {
        // B is a 4-column slice starting at column 2 of a 4x10 matrix.
        let (m, n, k, ldb) = (3, 4, 4, 10);
        let a: Vec<f32> = (0..m * k).map(|i| i as f32 * 0.25).collect();
        let b_full: Vec<f32> = (0..k * ldb).map(|i| (i % 13) as f32 * 0.1).collect();
        let mut got = vec![0.0f32; m * n];
        let mut want = got.clone();
        gemm(Transpose::No, Transpose::No, m, n, k, 1.0, &a, k, &b_full[2..], ldb, 0.0, &mut got, n, None);
        reference(Transpose::No, Transpose::No, m, n, k, 1.0, &a, k, &b_full[2..], ldb, 0.0, &mut want, n);
        assert_close(&got, &want, 1e-5);
    }

    #[test]
    fn test_gemm_parallel_matches_serial() {
        let (m, n, k) = (150, 40, 33);
        let a: Vec<f32> = (0..m * k).map(|i| (i % 7) as f32 * 0.1).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 11) as f32 * 0.1).collect();
        let pool = ThreadPool::new(4).unwrap();
        let mut serial = vec![0.0f32; m * n];
        let mut parallel = vec![0.0f32; m * n];
        gemm(Transpose::No, Transpose::No, m, n, k, 1.0, &a, k, &b, n, 0.0, &mut serial, n, None);
        gemm(Transpose::No, Transpose::No, m, n, k, 1.0, &a, k, &b, n, 0.0, &mut parallel, n, Some(&pool));
        assert_close(&serial, &parallel, 1e-5);
    }

    #[test]
    fn test_gemm_empty_k_scales_by_beta() {
        let mut c = [2.0, 4.0];
        gemm(Transpose::No, Transpose::No, 1, 2, 0, 1.0, &[], 0, &[], 2, 0.5, &mut c, 2, None);
        assert_eq!(c, [1.0, 2.0]);
    }
}
