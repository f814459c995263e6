//! Benchmark: attention with pre-packed weights vs the generic GEMM path.

use std::time::Instant;

use kore_attention::{Attention, AttentionConfig, AttentionInputs, OutputSlots};
use kore_core::{CpuAllocator, Tensor};
use kore_kernels::{SimdCapability, ThreadPool};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

fn random_tensor(rng: &mut StdRng, dims: &[usize]) -> Tensor {
    let len = dims.iter().product();
    Tensor::from_vec((0..len).map(|_| rng.gen_range(-1.0..1.0)).collect(), dims)
}

fn bench(kernel: &Attention, inputs: &AttentionInputs<'_>, pool: &ThreadPool, iters: usize) -> f64 {
    let alloc = CpuAllocator::new();
    let start = Instant::now();
    for _ in 0..iters {
        let _ = kernel
            .compute(inputs, OutputSlots::output_only(), &alloc, Some(pool))
            .unwrap();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let simd = SimdCapability::detect();
    let pool = ThreadPool::new(std::thread::available_parallelism().map_or(4, |n| n.get())).unwrap();
    println!("=== Kore Attention Projection Benchmark ===");
    println!("SIMD: {}, threads: {}\n", simd.best_tier(), pool.num_threads());
    println!(
        "{:>6} {:>6} {:>6} {:>6} {:>12} {:>12} {:>8}",
        "batch", "seq", "hidden", "heads", "generic(ms)", "packed(ms)", "speedup"
    );

    let mut rng = StdRng::seed_from_u64(0);
    for &(batch, seq, hidden, heads) in &[(1, 128, 256, 4), (4, 128, 512, 8), (8, 64, 768, 12)] {
        let input = random_tensor(&mut rng, &[batch, seq, hidden]);
        let weights = random_tensor(&mut rng, &[hidden, 3 * hidden]);
        let bias = random_tensor(&mut rng, &[3 * hidden]);

        let generic = Attention::new(AttentionConfig::new(heads)).unwrap();
        let mut packed = Attention::new(AttentionConfig::new(heads)).unwrap();
        let alloc = CpuAllocator::new();
        assert!(packed.pre_pack(&weights, 1, &alloc, None).unwrap());

        let iters = 10;
        let generic_inputs = AttentionInputs::new(&input, &weights, &bias);
        let packed_inputs = AttentionInputs::prepacked(&input, &bias);
        let t_generic = bench(&generic, &generic_inputs, &pool, iters);
        let t_packed = bench(&packed, &packed_inputs, &pool, iters);
        println!(
            "{:>6} {:>6} {:>6} {:>6} {:>12.3} {:>12.3} {:>7.2}x",
            batch,
            seq,
            hidden,
            heads,
            t_generic * 1e3,
            t_packed * 1e3,
            t_generic / t_packed
        );
    }
}
