use std::sync::Arc;
use std::time::Duration;

use async_impl::{serve, Broadcaster, Receiver};
use common::config::ReceiverConfig;
use common::{wire, ChannelState, LinkDiagnostics, Sample, SampleSource, TelemetryConfig};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Emits 0, 1, 2, ... so gaps and reordering are easy to spot.
struct Counter(u64);

impl SampleSource for Counter {
    fn next_sample(&mut self, elapsed: Duration) -> Option<Sample> {
        let value = self.0 as f64;
        self.0 += 1;
        Some(Sample::new(value, elapsed.as_secs_f64()))
    }
}

async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn fast_config(port: u16) -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.broadcast.port = port;
    config.broadcast.write_timeout_ms = 200;
    config.source.period_ms = 20;
    config.receiver = receiver_config(port);
    config
}

fn receiver_config(port: u16) -> ReceiverConfig {
    ReceiverConfig {
        host: "127.0.0.1".to_string(),
        port,
        capacity: 1_000,
        smoothing_window: 3,
        connect_timeout_ms: 500,
        retry_initial_ms: 50,
        retry_max_ms: 200,
        ..ReceiverConfig::default()
    }
}

async fn read_line(reader: &mut BufReader<DuplexStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line
}

/// Accepts every connection, writes `payload` once, then holds the socket
/// open in silence. Returns how many connections it saw.
fn spawn_raw_peer(
    listener: TcpListener,
    payload: Vec<u8>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            tokio::select! {
                _ = stop.cancelled() => return held.len(),
                accepted = listener.accept() => {
                    if let Ok((mut stream, _)) = accepted {
                        let _ = stream.write_all(&payload).await;
                        held.push(stream);
                    }
                }
            }
        }
    })
}

fn spawn_receiver(config: &ReceiverConfig) -> (Arc<Receiver>, CancellationToken, tokio::task::JoinHandle<()>) {
    let receiver = Arc::new(Receiver::new(config).unwrap());
    let stop = CancellationToken::new();
    let handle = {
        let receiver = receiver.clone();
        let stop = stop.clone();
        tokio::spawn(async move { receiver.run(stop).await })
    };
    (receiver, stop, handle)
}

#[tokio::test]
async fn failing_client_does_not_block_the_others() {
    let diagnostics = Arc::new(LinkDiagnostics::default());
    let broadcaster: Broadcaster<DuplexStream> =
        Broadcaster::new(Duration::from_millis(200), diagnostics.clone());

    let mut healthy = Vec::new();
    let mut broken_id = None;
    for k in 0..4 {
        let (ours, theirs) = duplex(1024);
        let id = broadcaster.add_client(ours, format!("client-{k}"));
        if k == 2 {
            // Peer gone: the next write reports a broken pipe.
            drop(theirs);
            broken_id = Some(id);
        } else {
            healthy.push(BufReader::new(theirs));
        }
    }
    let broken_id = broken_id.unwrap();

    let first = broadcaster.broadcast(&Sample::new(0.5, 0.0)).await;
    assert_eq!(first.delivered, 3);
    assert_eq!(first.dropped, vec![broken_id]);
    assert_eq!(broadcaster.client_state(broken_id), ChannelState::Closed);

    let second = broadcaster.broadcast(&Sample::new(-0.5, 0.2)).await;
    assert_eq!(second.delivered, 3);
    assert!(second.dropped.is_empty());
    assert_eq!(diagnostics.snapshot().dropped, 1);

    for reader in healthy.iter_mut() {
        assert_eq!(read_line(reader).await, "ECG Value: 0.5\n");
        assert_eq!(read_line(reader).await, "ECG Value: -0.5\n");
    }
}

#[tokio::test]
async fn tcp_consumer_sees_samples_in_emission_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = fast_config(port);

    let shutdown = CancellationToken::new();
    let broadcaster = Arc::new(Broadcaster::new(
        config.broadcast.write_timeout(),
        Arc::new(LinkDiagnostics::default()),
    ));
    let provider = {
        let config = config.clone();
        let shutdown = shutdown.clone();
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move { serve(listener, broadcaster, Box::new(Counter(0)), &config, shutdown).await })
    };

    let receiver = Arc::new(Receiver::new(&config.receiver).unwrap());
    let receiving = {
        let receiver = receiver.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { receiver.run(shutdown).await })
    };

    assert!(wait_until(Duration::from_secs(5), || receiver.latest().len() >= 15).await);

    let values: Vec<f64> = receiver.latest().iter().map(|s| s.value).collect();
    assert!(values.windows(2).all(|w| w[1] == w[0] + 1.0), "{values:?}");
    assert!(!receiver.smoothed().is_empty());

    shutdown.cancel();
    let recorder = tokio::time::timeout(Duration::from_secs(2), provider).await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(2), receiving).await.unwrap().unwrap();
    assert!(recorder.get_results().iter().any(|r| r.delivered == 1));
    assert_eq!(broadcaster.client_count(), 0);
}

#[tokio::test]
async fn receiver_survives_broadcaster_restarts() {
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().port()
    };
    let config = fast_config(port);

    let receiver_stop = CancellationToken::new();
    let receiver = Arc::new(Receiver::new(&config.receiver).unwrap());
    let receiving = {
        let receiver = receiver.clone();
        let shutdown = receiver_stop.clone();
        tokio::spawn(async move { receiver.run(shutdown).await })
    };

    // Nothing is listening yet; the receiver must keep retrying.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(receiver.latest().is_empty());
    assert!(!receiving.is_finished());

    for round in 0..2 {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let shutdown = CancellationToken::new();
        let provider = {
            let config = config.clone();
            let shutdown = shutdown.clone();
            let broadcaster = Arc::new(Broadcaster::new(
                config.broadcast.write_timeout(),
                Arc::new(LinkDiagnostics::default()),
            ));
            tokio::spawn(async move { serve(listener, broadcaster, Box::new(Counter(0)), &config, shutdown).await })
        };

        let before = receiver.latest().len();
        assert!(
            wait_until(Duration::from_secs(5), || receiver.latest().len() >= before + 5).await,
            "no samples in round {round}"
        );

        shutdown.cancel();
        provider.await.unwrap();
    }

    assert!(receiver.diagnostics().snapshot().reconnects >= 1);
    assert!(!receiving.is_finished());

    receiver_stop.cancel();
    tokio::time::timeout(Duration::from_secs(2), receiving).await.unwrap().unwrap();
}

#[tokio::test]
async fn oversized_line_is_malformed_and_drops_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = receiver_config(listener.local_addr().unwrap().port());

    let mut payload = format!("{} ", wire::LABEL).into_bytes();
    payload.extend(std::iter::repeat(b'0').take(4 * wire::MAX_LINE));
    payload.extend_from_slice(b"1\n");
    payload.extend_from_slice(wire::encode(2.0).as_bytes());
    let peer_stop = CancellationToken::new();
    let peer = spawn_raw_peer(listener, payload, peer_stop.clone());

    let (receiver, receiver_stop, receiving) = spawn_receiver(&config);
    assert!(
        wait_until(Duration::from_secs(5), || {
            let snapshot = receiver.diagnostics().snapshot();
            snapshot.malformed >= 1 && snapshot.reconnects >= 1
        })
        .await
    );
    // Nothing after the runaway line is trusted on that connection.
    assert!(receiver.latest().is_empty());

    receiver_stop.cancel();
    tokio::time::timeout(Duration::from_secs(2), receiving).await.unwrap().unwrap();
    peer_stop.cancel();
    assert!(peer.await.unwrap() >= 2);
}

#[tokio::test]
async fn silent_link_is_abandoned_after_the_idle_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ReceiverConfig {
        idle_timeout_ms: 200,
        ..receiver_config(listener.local_addr().unwrap().port())
    };
    let peer_stop = CancellationToken::new();
    let peer = spawn_raw_peer(listener, Vec::new(), peer_stop.clone());

    let (receiver, receiver_stop, receiving) = spawn_receiver(&config);
    assert!(wait_until(Duration::from_secs(5), || receiver.diagnostics().snapshot().reconnects >= 2).await);
    assert!(receiver.latest().is_empty());
    assert_eq!(receiver.diagnostics().snapshot().malformed, 0);

    receiver_stop.cancel();
    tokio::time::timeout(Duration::from_secs(2), receiving).await.unwrap().unwrap();
    peer_stop.cancel();
    assert!(peer.await.unwrap() >= 3);
}
