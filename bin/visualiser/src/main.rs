use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::config::{load_config, ReceiverConfig};
use common::diagnostics::DiagnosticsSnapshot;
use common::logging::init_logging;
use common::{Sample, TelemetryConfig, TelemetryResult};

/// Receiver running on its own thread, in either execution model.
enum Connection {
    Async {
        receiver: Arc<async_impl::Receiver>,
        shutdown: CancellationToken,
        worker: JoinHandle<()>,
    },
    Threaded {
        receiver: Arc<threaded_impl::Receiver>,
        shutdown: Arc<AtomicBool>,
        worker: JoinHandle<()>,
    },
}

impl Connection {
    fn open(config: &ReceiverConfig, mode: &str) -> TelemetryResult<Self> {
        if mode == "threaded" {
            let receiver = Arc::new(threaded_impl::Receiver::new(config)?);
            let shutdown = Arc::new(AtomicBool::new(false));
            let worker = {
                let receiver = Arc::clone(&receiver);
                let shutdown = Arc::clone(&shutdown);
                std::thread::spawn(move || receiver.run(&shutdown))
            };
            return Ok(Connection::Threaded { receiver, shutdown, worker });
        }

        let receiver = Arc::new(async_impl::Receiver::new(config)?);
        let shutdown = CancellationToken::new();
        let worker = {
            let receiver = Arc::clone(&receiver);
            let shutdown = shutdown.clone();
            std::thread::spawn(move || match tokio::runtime::Runtime::new() {
                Ok(rt) => rt.block_on(receiver.run(shutdown)),
                Err(e) => error!(error = %e, "could not start receiver runtime"),
            })
        };
        Ok(Connection::Async { receiver, shutdown, worker })
    }

    fn latest(&self) -> Vec<Sample> {
        match self {
            Connection::Async { receiver, .. } => receiver.latest(),
            Connection::Threaded { receiver, .. } => receiver.latest(),
        }
    }

    fn smoothed(&self) -> Vec<Sample> {
        match self {
            Connection::Async { receiver, .. } => receiver.smoothed(),
            Connection::Threaded { receiver, .. } => receiver.smoothed(),
        }
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        match self {
            Connection::Async { receiver, .. } => receiver.diagnostics().snapshot(),
            Connection::Threaded { receiver, .. } => receiver.diagnostics().snapshot(),
        }
    }

    fn clear(&self) {
        match self {
            Connection::Async { receiver, .. } => receiver.window().clear(),
            Connection::Threaded { receiver, .. } => receiver.window().clear(),
        }
    }

    fn close(self) {
        let worker = match self {
            Connection::Async { shutdown, worker, .. } => {
                shutdown.cancel();
                worker
            }
            Connection::Threaded { shutdown, worker, .. } => {
                shutdown.store(true, Ordering::Relaxed);
                worker
            }
        };
        if worker.join().is_err() {
            error!("receiver thread panicked");
        }
    }
}

struct DashboardApp {
    config: ReceiverConfig,
    mode: String,
    connection: Option<Connection>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl DashboardApp {
    fn new(config: ReceiverConfig, mode: String) -> Self {
        Self {
            config,
            mode,
            connection: None,
            connected_at: None,
            last_error: None,
        }
    }

    fn connect(&mut self) {
        match Connection::open(&self.config, &self.mode) {
            Ok(connection) => {
                info!(mode = %self.mode, host = %self.config.host, port = self.config.port, "receiver started");
                self.connection = Some(connection);
                self.connected_at = Some(Instant::now());
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e.to_string()),
        }
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.connected_at = None;
    }
}

impl Drop for DashboardApp {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Points whose timestamp falls within `span` seconds of the newest one.
fn trailing(samples: &[Sample], span: f64) -> Vec<[f64; 2]> {
    let Some(newest) = samples.last() else {
        return Vec::new();
    };
    let from = newest.timestamp - span;
    samples
        .iter()
        .filter(|s| s.timestamp >= from)
        .map(Sample::point)
        .collect()
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(Duration::from_millis(self.config.refresh_ms));

        let (raw, smoothed, stats) = match &self.connection {
            Some(connection) => (connection.latest(), connection.smoothed(), connection.diagnostics()),
            None => (Vec::new(), Vec::new(), DiagnosticsSnapshot::default()),
        };

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("ECG Monitor");
            ui.add_space(10.0);

            egui::Frame::group(ui.style())
                .inner_margin(10.0)
                .show(ui, |ui| {
                    ui.horizontal(|ui| {
                        let running = self.connection.is_some();
                        if ui.add_enabled(!running, egui::Button::new("▶ Connect")).clicked() {
                            self.connect();
                        }
                        if ui.add_enabled(running, egui::Button::new("⏹ Disconnect")).clicked() {
                            self.disconnect();
                        }
                        if ui.button("🗑 Clear").clicked() {
                            if let Some(connection) = &self.connection {
                                connection.clear();
                            }
                        }

                        ui.separator();
                        ui.label(format!("{}:{} ({})", self.config.host, self.config.port, self.mode));

                        let status = if running {
                            egui::RichText::new("🟢 Receiving").color(egui::Color32::GREEN)
                        } else {
                            egui::RichText::new("🔴 Stopped").color(egui::Color32::RED)
                        };
                        ui.label(status);
                        if let Some(start) = self.connected_at {
                            ui.label(format!("⏱ {}s", start.elapsed().as_secs()));
                        }
                    });
                    if let Some(e) = &self.last_error {
                        ui.colored_label(egui::Color32::RED, e);
                    }
                });

            ui.add_space(10.0);

            egui::Frame::group(ui.style())
                .inner_margin(10.0)
                .show(ui, |ui| {
                    egui::Grid::new("stats_grid")
                        .num_columns(2)
                        .spacing([40.0, 4.0])
                        .striped(true)
                        .show(ui, |ui| {
                            ui.label("Latest value:");
                            match raw.last() {
                                Some(s) => ui.label(format!("{:.4}", s.value)),
                                None => ui.label("—"),
                            };
                            ui.end_row();

                            ui.label("Samples buffered:");
                            ui.label(format!("{} / {}", raw.len(), self.config.capacity));
                            ui.end_row();

                            ui.label("Malformed lines:");
                            ui.label(format!("{}", stats.malformed));
                            ui.end_row();

                            ui.label("Reconnects:");
                            ui.label(format!("{}", stats.reconnects));
                            ui.end_row();
                        });
                });

            ui.add_space(10.0);

            let span = self.config.display_secs;
            let raw_points = trailing(&raw, span);
            let smoothed_points = trailing(&smoothed, span);
            let newest = raw.last().map(|s| s.timestamp).unwrap_or(span);

            Plot::new("ecg_plot")
                .legend(Legend::default())
                .include_x(newest - span)
                .include_x(newest)
                .allow_scroll(false)
                .allow_zoom(false)
                .allow_drag(false)
                .show(ui, |plot_ui| {
                    plot_ui.line(
                        Line::new(PlotPoints::new(raw_points))
                            .name("ECG")
                            .color(egui::Color32::from_rgb(52, 152, 219)),
                    );
                    plot_ui.line(
                        Line::new(PlotPoints::new(smoothed_points))
                            .name(format!("Moving average ({})", self.config.smoothing_window))
                            .color(egui::Color32::from_rgb(231, 76, 60)),
                    );
                });
        });
    }
}

/// The command-line mode wins; otherwise the validated `mode` from the config.
fn receiver_mode(arg: Option<&str>, config: &TelemetryConfig) -> String {
    match arg {
        Some(mode @ ("threaded" | "async")) => mode.to_string(),
        Some(other) => {
            warn!(mode = other, fallback = %config.mode, "unknown receiver mode");
            config.mode.clone()
        }
        None => config.mode.clone(),
    }
}

fn main() -> Result<(), eframe::Error> {
    init_logging("info");

    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).cloned().unwrap_or_else(|| "configs/telemetry.toml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path, error = %e, "falling back to default receiver settings");
            Default::default()
        }
    };
    let mode = receiver_mode(args.get(2).map(String::as_str), &config);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 700.0])
            .with_title("ECG Monitor"),
        ..Default::default()
    };

    let receiver = config.receiver;
    eframe::run_native(
        "ECG Monitor",
        options,
        Box::new(move |_cc| Box::new(DashboardApp::new(receiver, mode))),
    )
}
