//! Pre-packed B operand layout.
//!
//! B (`k x n`) is stored as column panels of [`PACK_PANEL`] columns. Each
//! panel holds `k` rows of `PACK_PANEL` contiguous values; the last panel is
//! zero-padded. Packing happens once per weight matrix and every later GEMM
//! streams the panels with unit stride.

use crate::gemm::{for_each_row_block, scale_rows, Transpose};
use crate::parallel::ParallelFor;
use crate::simd::{self, SimdCapability};

/// Columns per packed panel.
pub const PACK_PANEL: usize = 16;

/// Bytes needed to pack an `n`-column, `k`-row B operand. Zero when either
/// dimension is empty, meaning packing is not supported for that shape.
pub fn packed_b_size(n: usize, k: usize) -> usize {
    if n == 0 || k == 0 {
        return 0;
    }
    n.div_ceil(PACK_PANEL) * PACK_PANEL * k * std::mem::size_of::<f32>()
}

/// Pack `op(B)` (`k x n`) into `dst`, which must hold
/// `packed_b_size(n, k) / 4` floats. Padding lanes are left untouched, so
/// callers zero `dst` first.
pub fn pack_b(trans_b: Transpose, n: usize, k: usize, b: &[f32], ldb: usize, dst: &mut [f32]) {
    if n == 0 || k == 0 {
        return;
    }
    let panel_len = PACK_PANEL * k;
    for (pi, panel) in dst.chunks_mut(panel_len).take(n.div_ceil(PACK_PANEL)).enumerate() {
        let j0 = pi * PACK_PANEL;
        let width = PACK_PANEL.min(n - j0);
        for p in 0..k {
            let row = &mut panel[p * PACK_PANEL..p * PACK_PANEL + width];
            match trans_b {
                Transpose::No => row.copy_from_slice(&b[p * ldb + j0..p * ldb + j0 + width]),
                Transpose::Yes => {
                    for (jj, v) in row.iter_mut().enumerate() {
                        *v = b[(j0 + jj) * ldb + p];
                    }
                }
            }
        }
    }
}

/// `C = alpha * op(A) @ B + beta * C` with B in packed form.
#[allow(clippy::too_many_arguments)]
pub fn packed_gemm(
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
    if m == 0 || n == 0 {
        return;
    }
    debug_assert!(packed_b.len() * 4 >= packed_b_size(n, k), "packed B too small");

    let cost = (64 * n * k) as f64;
    for_each_row_block(c, m, ldc, cost, pool, &|rows, c_block| {
        let cap = SimdCapability::detect();
        scale_rows(c_block, rows.len(), n, ldc, beta);
        if k == 0 || alpha == 0.0 {
            return;
        }
        let mut acc = [0.0f32; PACK_PANEL];
        for (r, i) in rows.enumerate() {
            for (pi, panel) in packed_b.chunks(PACK_PANEL * k).take(n.div_ceil(PACK_PANEL)).enumerate() {
                acc.fill(0.0);
                for p in 0..k {
                    let a_val = match trans_a {
                        Transpose::No => a[i * lda + p],
                        Transpose::Yes => a[p * lda + i],
                    };
                    simd::axpy(cap, a_val, &panel[p * PACK_PANEL..(p + 1) * PACK_PANEL], &mut acc);
                }
                let j0 = pi * PACK_PANEL;
                let width = PACK_PANEL.min(n - j0);
                let c_row = &mut c_block[r * ldc + j0..r * ldc + j0 + width];
                for (c_val, &s) in c_row.iter_mut().zip(&acc) {
                    *c_val += alpha * s;
                }
            }
        }
    });
}
