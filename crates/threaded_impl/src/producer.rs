use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use common::{SampleSource, TickRecorder, TickResult};

use crate::broadcaster::Broadcaster;

/// Fixed-period loop on the calling thread: sleep to the next tick, take a
/// sample, broadcast it. Stops at the first tick after `shutdown` is set.
pub fn run_cadence<W: Write + Send>(
    source: &mut (dyn SampleSource + Send),
    broadcaster: &Broadcaster<W>,
    period: Duration,
    recorder: &TickRecorder,
    shutdown: &AtomicBool,
) {
    let start_time = Instant::now();
    let diagnostics = broadcaster.diagnostics();
    let mut next_tick = start_time + period;
    let mut tick_id = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        let expected = next_tick;
        next_tick += period;

        let now = Instant::now();
        if now < expected {
            thread::sleep(expected - now);
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let actual = Instant::now();
        let lateness_ns = actual.duration_since(expected).as_nanos() as i64;

        // Fell more than a whole period behind: realign instead of bursting.
        if actual > next_tick {
            next_tick = actual + period;
        }

        let Some(sample) = source.next_sample(actual.duration_since(start_time)) else {
            diagnostics.record_skipped_tick();
            debug!(tick_id, "no sample this tick");
            tick_id += 1;
            continue;
        };

        let clients = broadcaster.client_count();
        let report = broadcaster.broadcast(&sample);
        let broadcast_elapsed = actual.elapsed();

        debug!(tick_id, value = sample.value, delivered = report.delivered, "sent sample");

        recorder.record(TickResult {
            tick_id,
            mode: "threaded".to_string(),
            value: sample.value,
            clients,
            delivered: report.delivered,
            dropped: report.dropped.len(),
            broadcast_ns: broadcast_elapsed.as_nanos() as u64,
            lateness_ns,
            deadline_met: broadcast_elapsed <= period,
        });

        tick_id += 1;
    }
}
