use common::config::load_config;
use common::logging::init_logging;
use common::{LinkDiagnostics, Sample, TelemetryConfig, TelemetryResult, TickRecorder, TickResult};
use criterion::{black_box, Criterion};
use std::env;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BENCH_TIMEOUT: Duration = Duration::from_millis(100);

fn analyze_results_detailed(results: &[TickResult], name: &str) {
    if results.is_empty() {
        println!("{}: No results to analyze", name);
        return;
    }

    let total = results.len();
    let missed_deadlines = results.iter().filter(|r| !r.deadline_met).count();
    let deadline_rate = (1.0 - (missed_deadlines as f64 / total as f64)) * 100.0;

    let broadcast_times: Vec<f64> = results
        .iter()
        .map(|r| r.broadcast_ns as f64 / 1000.0)
        .collect();
    let lateness_values: Vec<i64> = results.iter().map(|r| r.lateness_ns).collect();

    println!("\n=== {} Detailed Analysis ===", name);
    println!("Total ticks: {}", total);
    println!("Deadline compliance: {:.2}% ({} missed)", deadline_rate, missed_deadlines);

    let avg = broadcast_times.iter().sum::<f64>() / broadcast_times.len() as f64;
    let min = broadcast_times.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = broadcast_times.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    println!("Broadcast time (μs): avg={:.2}, min={:.2}, max={:.2}", avg, min, max);

    let max_lateness = lateness_values.iter().max().unwrap_or(&0);
    println!("Max lateness: {} ns", max_lateness);

    let peak_clients = results.iter().map(|r| r.clients).max().unwrap_or(0);
    let delivered: usize = results.iter().map(|r| r.delivered).sum();
    let dropped: usize = results.iter().map(|r| r.dropped).sum();
    println!("Consumers: peak {}, {} lines delivered, {} dropped", peak_clients, delivered, dropped);
}

/// Threaded provider with `benchmark_receivers` threaded consumers attached.
fn run_threaded(config: &TelemetryConfig) -> TelemetryResult<TickRecorder> {
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    for _ in 0..config.benchmark_receivers {
        let receiver = threaded_impl::Receiver::new(&config.receiver)?;
        let stop = Arc::clone(&stop);
        handles.push(std::thread::spawn(move || receiver.run(&stop)));
    }

    let result = threaded_impl::run_experiment(config.clone());
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }
    result
}

/// Async provider with `benchmark_receivers` async consumers on the same runtime.
async fn run_async(config: &TelemetryConfig) -> TelemetryResult<TickRecorder> {
    let stop = CancellationToken::new();
    let mut handles = Vec::new();
    for _ in 0..config.benchmark_receivers {
        let receiver = async_impl::Receiver::new(&config.receiver)?;
        let stop = stop.clone();
        handles.push(tokio::spawn(async move { receiver.run(stop).await }));
    }

    let result = async_impl::run_experiment(config.clone()).await;
    stop.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    result
}

fn benchmark_threaded(c: &mut Criterion, clients: usize) {
    let broadcaster: threaded_impl::Broadcaster<io::Sink> =
        threaded_impl::Broadcaster::new(BENCH_TIMEOUT, Arc::new(LinkDiagnostics::default()));
    for i in 0..clients {
        broadcaster.add_client(io::sink(), format!("sink-{i}"));
    }
    let sample = Sample::new(0.5, 0.0);

    c.bench_function(&format!("threaded_broadcast_{clients}"), |b| {
        b.iter(|| black_box(broadcaster.broadcast(black_box(&sample))));
    });
}

fn benchmark_async(c: &mut Criterion, clients: usize) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start tokio runtime: {}", e);
            return;
        }
    };
    let broadcaster: async_impl::Broadcaster<tokio::io::Sink> =
        async_impl::Broadcaster::new(BENCH_TIMEOUT, Arc::new(LinkDiagnostics::default()));
    for i in 0..clients {
        broadcaster.add_client(tokio::io::sink(), format!("sink-{i}"));
    }
    let sample = Sample::new(0.5, 0.0);

    c.bench_function(&format!("async_broadcast_{clients}"), |b| {
        b.iter(|| black_box(rt.block_on(broadcaster.broadcast(black_box(&sample)))));
    });
}

fn report(name: &str, csv_path: &str, outcome: TelemetryResult<TickRecorder>) {
    match outcome {
        Ok(recorder) => {
            analyze_results_detailed(&recorder.get_results(), name);
            match recorder.save_to_csv(csv_path) {
                Ok(()) => println!("Results saved to {}", csv_path),
                Err(e) => eprintln!("Failed to save {}: {}", csv_path, e),
            }
        }
        Err(e) => eprintln!("{} experiment failed: {}", name, e),
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: benchmark_runner <config_file> [threaded|async|both] [--criterion]");
        eprintln!("Example: benchmark_runner configs/telemetry.toml both");
        eprintln!("Example: benchmark_runner configs/telemetry.toml both --criterion");
        std::process::exit(1);
    }

    let config_path = &args[1];
    let mode = args.get(2).map(|s| s.as_str()).unwrap_or("both");
    let use_criterion = args.iter().any(|a| a == "--criterion");

    // Keep logging quiet during Criterion runs so it does not skew timings.
    init_logging(if use_criterion { "error" } else { "warn" });

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    println!("========================================");
    println!("ECG Fan-out Benchmark");
    println!("========================================");
    println!("Config: {}", config_path);
    println!("Experiment: {}", config.experiment_name);
    println!("Duration: {} seconds", config.duration_secs);
    println!("Period: {} ms", config.source.period_ms);
    println!("Consumers: {}", config.benchmark_receivers);
    if use_criterion {
        println!("Using Criterion for statistical analysis");
    }
    println!("========================================\n");

    if use_criterion {
        let mut criterion = Criterion::default()
            .sample_size(50)
            .measurement_time(Duration::from_secs(5));

        for clients in [1, config.benchmark_receivers.max(1), 64] {
            if mode == "threaded" || mode == "both" {
                benchmark_threaded(&mut criterion, clients);
            }
            if mode == "async" || mode == "both" {
                benchmark_async(&mut criterion, clients);
            }
        }

        println!("\n========================================");
        println!("Criterion statistical analysis complete!");
        println!("Check the target/criterion directory for detailed HTML reports.");
        println!("========================================");
    } else {
        if mode == "threaded" || mode == "both" {
            println!("Running THREADED experiment...");
            let start = std::time::Instant::now();
            let outcome = run_threaded(&config);
            println!("Threaded experiment completed in {:.2} seconds", start.elapsed().as_secs_f64());
            report("THREADED", "threaded_results.csv", outcome);
        }

        if mode == "async" || mode == "both" {
            println!("\nRunning ASYNC experiment...");
            let start = std::time::Instant::now();
            let outcome = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt.block_on(run_async(&config)),
                Err(e) => Err(e.into()),
            };
            println!("Async experiment completed in {:.2} seconds", start.elapsed().as_secs_f64());
            report("ASYNC", "async_results.csv", outcome);
        }

        println!("\n========================================");
        println!("Benchmark complete!");
        println!("========================================");
    }
}
