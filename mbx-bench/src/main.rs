//! Benchmark runner for the shared-memory minibatch exchange

use anyhow::Result;
use mbx_bench::{bench_loopback, compare_data_access, BenchConfig, BenchResult};
use tracing_subscriber::EnvFilter;

fn print_result(result: &BenchResult) {
    println!("\nBenchmark: {}", result.name);
    println!("  Total time:   {:?}", result.total_time);
    println!("  Average time: {:?}", result.avg_time);
    println!("  Min time:     {:?}", result.min_time);
    println!("  Max time:     {:?}", result.max_time);
    println!("  Throughput:   {:.2} rows/sec", result.throughput);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== Shared-Memory Minibatch Exchange Benchmarks ===");

    let config = BenchConfig::default();

    println!("\n=== Borrowed vs Copied Rows ===");
    for result in compare_data_access(&config)? {
        print_result(&result);
    }

    println!("\n=== Row Width Scaling ===");
    for width in [16, 128, 1024] {
        let result = bench_loopback(&BenchConfig {
            iterations: 5,
            warmup_iterations: 1,
            stream_widths: vec![width, 1],
            ..config.clone()
        })?;
        println!("\nRow width: {width}");
        println!("  Average time: {:?}", result.avg_time);
        println!("  Throughput:   {:.2} rows/sec", result.throughput);
    }

    println!("\n=== Minibatch Size Scaling ===");
    for minibatch_size in [32, 256, 2048] {
        let result = bench_loopback(&BenchConfig {
            iterations: 5,
            warmup_iterations: 1,
            minibatch_size,
            minibatches_per_epoch: 16_384 / minibatch_size,
            ..config.clone()
        })?;
        println!("\nMinibatch size: {minibatch_size}");
        println!("  Average time: {:?}", result.avg_time);
        println!("  Throughput:   {:.2} rows/sec", result.throughput);
    }

    Ok(())
}
