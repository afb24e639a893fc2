mod menu;

use common::config::load_config;
use common::logging::init_logging;
use common::{TelemetryConfig, TickResult};

const CONFIG_PATH: &str = "configs/telemetry.toml";

fn main() {
    init_logging("info");

    println!("===========================================");
    println!("Welcome to the ECG Telemetry Relay");
    println!("===========================================");

    loop {
        menu::show_menu();

        match menu::get_user_choice() {
            Some(1) => run_threaded_demo(),
            Some(2) => run_async_demo(),
            Some(3) => run_benchmark_comparison(),
            Some(4) => launch_bin("visualiser", &[CONFIG_PATH]),
            Some(5) => launch_bin("ingest_server", &[CONFIG_PATH]),
            Some(6) => {
                println!("Goodbye!");
                break;
            }
            _ => println!("Invalid choice. Please select 1-6."),
        }
    }
}

fn load_or_report() -> Option<TelemetryConfig> {
    match load_config(CONFIG_PATH) {
        Ok(config) => Some(config),
        Err(e) => {
            println!("Failed to load {}: {}", CONFIG_PATH, e);
            None
        }
    }
}

fn print_config(config: &TelemetryConfig) {
    println!(
        "Configuration: {}:{}, {}ms period, {} seconds duration",
        config.broadcast.host, config.broadcast.port, config.source.period_ms, config.duration_secs
    );
    println!("Connect a consumer now, e.g. the Live ECG Monitor in another terminal.");
}

fn run_threaded_demo() {
    println!("\n=== Running Threaded Provider ===");

    if let Some(config) = load_or_report() {
        print_config(&config);
        match threaded_impl::run_experiment(config) {
            Ok(recorder) => display_results(&recorder.get_results()),
            Err(e) => println!("Provider failed: {}", e),
        }
    }

    menu::wait_for_enter();
}

fn run_async_demo() {
    println!("\n=== Running Async Provider ===");

    if let Some(config) = load_or_report() {
        print_config(&config);
        let outcome = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt.block_on(async_impl::run_experiment(config)),
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok(recorder) => display_results(&recorder.get_results()),
            Err(e) => println!("Provider failed: {}", e),
        }
    }

    menu::wait_for_enter();
}

fn run_benchmark_comparison() {
    println!("\n=== Running Benchmark Comparison (Async vs Threaded) ===");
    launch_bin("benchmark_runner", &[CONFIG_PATH, "both"]);
}

/// Runs another workspace binary in the foreground and waits for it.
fn launch_bin(name: &str, args: &[&str]) {
    let status = std::process::Command::new("cargo")
        .args(["run", "--release", "--bin", name, "--"])
        .args(args)
        .status();

    match status {
        Ok(status) if status.success() => println!("{} finished.", name),
        Ok(status) => println!("{} exited with status: {}", name, status),
        Err(e) => {
            println!("Failed to launch {}: {}", name, e);
            println!("Make sure cargo is on PATH.");
        }
    }

    menu::wait_for_enter();
}

fn display_results(results: &[TickResult]) {
    if results.is_empty() {
        println!("No results to display.");
        return;
    }

    let total_ticks = results.len();
    let missed_deadlines = results.iter().filter(|r| !r.deadline_met).count();
    let deadline_compliance = (total_ticks - missed_deadlines) as f64 / total_ticks as f64 * 100.0;
    let delivered: usize = results.iter().map(|r| r.delivered).sum();
    let dropped: usize = results.iter().map(|r| r.dropped).sum();
    let peak_clients = results.iter().map(|r| r.clients).max().unwrap_or(0);

    println!("\n=== Provider Results ===");
    println!("Total Ticks: {}", total_ticks);
    println!("Deadline Compliance: {:.2}% ({} missed)", deadline_compliance, missed_deadlines);
    println!("Consumers: peak {}, {} lines delivered, {} dropped", peak_clients, delivered, dropped);
}
