use tokio::io::AsyncWrite;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use common::{SampleSource, TickRecorder, TickResult};

use crate::broadcaster::Broadcaster;

/// Periodic timer driving `next_sample -> broadcast` until `shutdown` fires.
pub async fn run_cadence<W: AsyncWrite + Unpin + Send>(
    source: &mut (dyn SampleSource + Send),
    broadcaster: &Broadcaster<W>,
    period: Duration,
    recorder: &TickRecorder,
    shutdown: CancellationToken,
) {
    let start = Instant::now();
    let mut ticker = interval_at(start + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let diagnostics = broadcaster.diagnostics();
    let mut tick_id: u64 = 0;

    loop {
        let scheduled = tokio::select! {
            _ = shutdown.cancelled() => break,
            scheduled = ticker.tick() => scheduled,
        };
        let lateness_ns = Instant::now().duration_since(scheduled).as_nanos() as i64;

        let Some(sample) = source.next_sample(start.elapsed()) else {
            diagnostics.record_skipped_tick();
            debug!(tick_id, "no sample this tick");
            tick_id += 1;
            continue;
        };

        let clients = broadcaster.client_count();
        let sent_at = Instant::now();
        let report = broadcaster.broadcast(&sample).await;
        let broadcast_elapsed = sent_at.elapsed();

        debug!(tick_id, value = sample.value, delivered = report.delivered, "sent sample");

        recorder.record(TickResult {
            tick_id,
            mode: "async".to_string(),
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
