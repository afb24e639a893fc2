use std::io::{self, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::config::ReceiverConfig;
use common::{wire, ChannelState, LinkDiagnostics, Sample, SampleSource, TelemetryConfig};
use threaded_impl::{serve, Broadcaster, Receiver};

struct Counter(u64);

impl SampleSource for Counter {
    fn next_sample(&mut self, elapsed: Duration) -> Option<Sample> {
        let value = self.0 as f64;
        self.0 += 1;
        Some(Sample::new(value, elapsed.as_secs_f64()))
    }
}

enum TestSink {
    Healthy(Arc<Mutex<Vec<u8>>>),
    Broken,
    /// Behaves like a socket whose write timeout expired.
    Stalled(Duration),
}

impl Write for TestSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TestSink::Healthy(out) => out.lock().unwrap().write(buf),
            TestSink::Broken => Err(io::ErrorKind::BrokenPipe.into()),
            TestSink::Stalled(after) => {
                thread::sleep(*after);
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

fn fast_config(port: u16) -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.mode = "threaded".to_string();
    config.broadcast.port = port;
    config.broadcast.write_timeout_ms = 200;
    config.source.period_ms = 20;
    config.receiver = ReceiverConfig {
        host: "127.0.0.1".to_string(),
        port,
        capacity: 1_000,
        smoothing_window: 3,
        connect_timeout_ms: 500,
        retry_initial_ms: 50,
        retry_max_ms: 200,
        ..ReceiverConfig::default()
    };
    config
}

fn spawn_provider(
    listener: TcpListener,
    config: &TelemetryConfig,
) -> (Arc<AtomicBool>, thread::JoinHandle<common::TickRecorder>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = {
        let config = config.clone();
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            let broadcaster = Arc::new(Broadcaster::new(
                config.broadcast.write_timeout(),
                Arc::new(LinkDiagnostics::default()),
            ));
            serve(listener, broadcaster, Box::new(Counter(0)), &config, shutdown)
        })
    };
    (shutdown, handle)
}

/// A peer that accepts every connection, writes `payload` once and then
/// holds the socket open without sending anything else.
fn spawn_raw_peer(listener: TcpListener, payload: Vec<u8>) -> (Arc<AtomicBool>, thread::JoinHandle<usize>) {
    listener.set_nonblocking(true).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut held = Vec::new();
            while !stop.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        let _ = stream.write_all(&payload);
                        held.push(stream);
                    }
                    Err(_) => thread::sleep(Duration::from_millis(10)),
                }
            }
            held.len()
        })
    };
    (stop, handle)
}

fn spawn_receiver(config: &ReceiverConfig) -> (Arc<Receiver>, Arc<AtomicBool>, thread::JoinHandle<()>) {
    let receiver = Arc::new(Receiver::new(config).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let receiver = receiver.clone();
        let stop = stop.clone();
        thread::spawn(move || receiver.run(&stop))
    };
    (receiver, stop, handle)
}

#[test]
fn failing_and_stalled_clients_are_dropped_without_starving_others() {
    let diagnostics = Arc::new(LinkDiagnostics::default());
    let broadcaster: Broadcaster<TestSink> =
        Broadcaster::new(Duration::from_millis(30), diagnostics.clone());

    let outputs: Vec<_> = (0..3).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    broadcaster.add_client(TestSink::Healthy(outputs[0].clone()), "a");
    let broken = broadcaster.add_client(TestSink::Broken, "broken");
    broadcaster.add_client(TestSink::Healthy(outputs[1].clone()), "b");
    let stalled = broadcaster.add_client(TestSink::Stalled(Duration::from_millis(30)), "stalled");
    broadcaster.add_client(TestSink::Healthy(outputs[2].clone()), "c");

    let started = Instant::now();
    let first = broadcaster.broadcast(&Sample::new(1.5, 0.0));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(first.delivered, 3);
    assert_eq!(first.dropped, vec![broken, stalled]);
    assert_eq!(broadcaster.client_state(broken), ChannelState::Closed);
    assert_eq!(broadcaster.client_state(stalled), ChannelState::Closed);

    let second = broadcaster.broadcast(&Sample::new(2.5, 0.2));
    assert_eq!(second.delivered, 3);
    assert!(second.dropped.is_empty());
    assert_eq!(diagnostics.snapshot().dropped, 2);

    for out in &outputs {
        let text = String::from_utf8(out.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "ECG Value: 1.5\nECG Value: 2.5\n");
    }
}

#[test]
fn tcp_consumer_sees_samples_in_emission_order() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = fast_config(port);
    let (provider_stop, provider) = spawn_provider(listener, &config);

    let receiver = Arc::new(Receiver::new(&config.receiver).unwrap());
    let receiver_stop = Arc::new(AtomicBool::new(false));
    let receiving = {
        let receiver = receiver.clone();
        let stop = receiver_stop.clone();
        thread::spawn(move || receiver.run(&stop))
    };

    assert!(wait_until(Duration::from_secs(5), || receiver.latest().len() >= 15));
    let values: Vec<f64> = receiver.latest().iter().map(|s| s.value).collect();
    assert!(values.windows(2).all(|w| w[1] == w[0] + 1.0), "{values:?}");

    receiver_stop.store(true, Ordering::Relaxed);
    provider_stop.store(true, Ordering::Relaxed);
    receiving.join().unwrap();
    let recorder = provider.join().unwrap();
    assert!(recorder.get_results().iter().any(|r| r.delivered == 1));
}

#[test]
fn receiver_survives_broadcaster_restarts() {
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let config = fast_config(port);

    let receiver = Arc::new(Receiver::new(&config.receiver).unwrap());
    let receiver_stop = Arc::new(AtomicBool::new(false));
    let receiving = {
        let receiver = receiver.clone();
        let stop = receiver_stop.clone();
        thread::spawn(move || receiver.run(&stop))
    };

    thread::sleep(Duration::from_millis(150));
    assert!(receiver.latest().is_empty());
    assert!(!receiving.is_finished());

    for round in 0..2 {
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let (stop, provider) = spawn_provider(listener, &config);

        let before = receiver.latest().len();
        assert!(
            wait_until(Duration::from_secs(5), || receiver.latest().len() >= before + 5),
            "no samples in round {round}"
        );

        stop.store(true, Ordering::Relaxed);
        provider.join().unwrap();
    }

    assert!(receiver.diagnostics().snapshot().reconnects >= 1);

    let started = Instant::now();
    receiver_stop.store(true, Ordering::Relaxed);
    receiving.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn oversized_line_is_malformed_and_drops_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = fast_config(listener.local_addr().unwrap().port());

    let mut payload = format!("{} ", wire::LABEL).into_bytes();
    payload.extend(std::iter::repeat(b'0').take(4 * wire::MAX_LINE));
    payload.extend_from_slice(b"1\n");
    payload.extend_from_slice(wire::encode(2.0).as_bytes());
    let (peer_stop, peer) = spawn_raw_peer(listener, payload);

    let (receiver, receiver_stop, receiving) = spawn_receiver(&config.receiver);
    assert!(wait_until(Duration::from_secs(5), || {
        let snapshot = receiver.diagnostics().snapshot();
        snapshot.malformed >= 1 && snapshot.reconnects >= 1
    }));
    // Nothing after the runaway line is trusted on that connection.
    assert!(receiver.latest().is_empty());

    receiver_stop.store(true, Ordering::Relaxed);
    receiving.join().unwrap();
    peer_stop.store(true, Ordering::Relaxed);
    assert!(peer.join().unwrap() >= 2);
}

#[test]
fn silent_link_is_abandoned_after_the_idle_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = fast_config(listener.local_addr().unwrap().port());
    config.receiver.idle_timeout_ms = 200;
    let (peer_stop, peer) = spawn_raw_peer(listener, Vec::new());

    let (receiver, receiver_stop, receiving) = spawn_receiver(&config.receiver);
    assert!(wait_until(Duration::from_secs(5), || receiver.diagnostics().snapshot().reconnects >= 2));
    assert!(receiver.latest().is_empty());
    assert_eq!(receiver.diagnostics().snapshot().malformed, 0);

    receiver_stop.store(true, Ordering::Relaxed);
    receiving.join().unwrap();
    peer_stop.store(true, Ordering::Relaxed);
    assert!(peer.join().unwrap() >= 3);
}
