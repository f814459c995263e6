//! Runtime SIMD detection and the vector kernels used by the GEMM inner loops.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdCapability {
    /// AVX2 together with FMA; the only x86 tier the kernels use.
    pub avx2_fma: bool,
    pub neon: bool,
}

static DETECTED: OnceLock<SimdCapability> = OnceLock::new();

impl SimdCapability {
    pub fn detect() -> &'static SimdCapability {
        DETECTED.get_or_init(|| {
            #[cfg(target_arch = "x86_64")]
            {
                SimdCapability {
                    avx2_fma: is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma"),
                    neon: false,
                }
            }

            #[cfg(target_arch = "aarch64")]
            {
                SimdCapability {
                    avx2_fma: false,
                    neon: true,
                }
            }

            #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
            {
                SimdCapability {
                    avx2_fma: false,
                    neon: false,
                }
            }
        })
    }

    pub fn best_tier(&self) -> &'static str {
        if self.avx2_fma {
            "AVX2+FMA"
        } else if self.neon {
            "NEON"
        } else {
            "scalar"
        }
    }
}

/// `y += alpha * x` over the common prefix of `x` and `y`.
#[inline]
pub fn axpy(cap: &SimdCapability, alpha: f32, x: &[f32], y: &mut [f32]) {
    #[cfg(target_arch = "x86_64")]
    {
        if cap.avx2_fma {
            // Safety: AVX2 and FMA were detected at runtime.
            unsafe { axpy_avx2(alpha, x, y) };
            return;
        }
    }
    let _ = cap;
    axpy_scalar(alpha, x, y);
}

/// Dot product over the common prefix of `x` and `y`.
#[inline]
pub fn dot(cap: &SimdCapability, x: &[f32], y: &[f32]) -> f32 {
    #[cfg(target_arch = "x86_64")]
    {
        if cap.avx2_fma {
            // Safety: AVX2 and FMA were detected at runtime.
            return unsafe { dot_avx2(x, y) };
        }
    }
    let _ = cap;
    dot_scalar(x, y)
}

fn axpy_scalar(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

fn dot_scalar(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn axpy_avx2(alpha: f32, x: &[f32], y: &mut [f32]) {
    use std::arch::x86_64::*;

    let n = x.len().min(y.len());
    let a = _mm256_set1_ps(alpha);
    let mut j = 0;
    while j + 8 <= n {
        let x_vec = _mm256_loadu_ps(x.as_ptr().add(j));
        let y_ptr = y.as_mut_ptr().add(j);
        let y_vec = _mm256_loadu_ps(y_ptr);
        _mm256_storeu_ps(y_ptr, _mm256_fmadd_ps(a, x_vec, y_vec));
        j += 8;
    }
    while j < n {
        y[j] += alpha * x[j];
        j += 1;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn dot_avx2(x: &[f32], y: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = x.len().min(y.len());
    let mut acc = _mm256_setzero_ps();
    let mut j = 0;
    while j + 8 <= n {
        let x_vec = _mm256_loadu_ps(x.as_ptr().add(j));
        let y_vec = _mm256_loadu_ps(y.as_ptr().add(j));
        acc = _mm256_fmadd_ps(x_vec, y_vec, acc);
        j += 8;
    }
    let mut lanes = [0.0f32; 8];
    _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
    let mut sum: f32 = lanes.iter().sum();
    while j < n {
        sum += x[j] * y[j];
        j += 1;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALAR: SimdCapability = SimdCapability {
        avx2_fma: false,
        neon: false,
    };

    #[test]
    fn test_detect_is_stable() {
        let cap = SimdCapability::detect();
        assert_eq!(cap, SimdCapability::detect());
        assert!(!cap.best_tier().is_empty());
    }

    #[test]
    fn test_axpy_matches_scalar() {
        let x: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let mut y_fast = vec![1.0f32; 19];
        let mut y_ref = vec![1.0f32; 19];
        axpy(SimdCapability::detect(), 2.0, &x, &mut y_fast);
        axpy(&SCALAR, 2.0, &x, &mut y_ref);
        for (a, b) in y_fast.iter().zip(&y_ref) {
            assert!((a - b).abs() < 1e-5);
        }
        assert_eq!(y_ref[3], 1.0 + 2.0 * 1.5);
    }

    #[test]
    fn test_dot_matches_scalar() {
        let x: Vec<f32> = (0..21).map(|i| (i % 7) as f32 * 0.1).collect();
        let y: Vec<f32> = (0..21).map(|i| (i % 5) as f32 * 0.2).collect();
        let fast = dot(SimdCapability::detect(), &x, &y);
        let reference = dot(&SCALAR, &x, &y);
        assert!((fast - reference).abs() < 1e-4, "fast={fast}, ref={reference}");
    }
}
