//! Integration tests for the broadcast hub
//!
//! The hub is driven tick by tick against an in-memory track source and a
//! pass-through transcoder, so every chunk is known in advance.

use async_trait::async_trait;
use bytes::Bytes;
use pmorelay::{
    BroadcastHub, ConsumerHandle, Error, HubState, OutputFormat, RelayConfig, SourceError,
    TickOutcome, TrackDescriptor, TrackSource, TranscodeError, Transcoder,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Track source serving fixed byte patterns from memory
struct MemorySource {
    tracks: Vec<TrackDescriptor>,
    audio: HashMap<String, Bytes>,
    failing: Mutex<HashSet<String>>,
    unavailable: bool,
    resolves: AtomicUsize,
    resolve_delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemorySource {
    /// `(id, length)` pairs; every track gets a distinct byte pattern
    fn new(tracks: &[(&str, usize)]) -> Self {
        let mut descriptors = Vec::new();
        let mut audio = HashMap::new();
        for (n, (id, len)) in tracks.iter().enumerate() {
            descriptors.push(TrackDescriptor::new(
                *id,
                id.to_uppercase(),
                format!("https://example.invalid/tracks/{}", id),
            ));
            let data: Vec<u8> = (0..*len)
                .map(|i| (i as u8).wrapping_add((n as u8).wrapping_mul(50)))
                .collect();
            audio.insert(id.to_string(), Bytes::from(data));
        }
        Self {
            tracks: descriptors,
            audio,
            failing: Mutex::new(HashSet::new()),
            unavailable: false,
            resolves: AtomicUsize::new(0),
            resolve_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Replace the audio served for `id`
    fn with_audio(mut self, id: &str, data: &'static [u8]) -> Self {
        self.audio.insert(id.to_string(), Bytes::from_static(data));
        self
    }

    /// Make the download of `id` fail
    fn without_audio(mut self, id: &str) -> Self {
        self.audio.remove(id);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.resolve_delay = delay;
        self
    }

    fn failing(self, ids: &[&str]) -> Self {
        self.failing
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| id.to_string()));
        self
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn resolves(&self) -> usize {
        self.resolves.load(Ordering::Relaxed)
    }

    fn audio(&self, id: &str) -> Bytes {
        self.audio[id].clone()
    }
}

#[async_trait]
impl TrackSource for MemorySource {
    async fn fetch_playlist(&self, _playlist: &str) -> Result<Vec<TrackDescriptor>, SourceError> {
        if self.unavailable {
            return Err(SourceError::Request("connection refused".to_string()));
        }
        Ok(self.tracks.clone())
    }

    async fn resolve_download_url(&self, track: &TrackDescriptor) -> Result<String, SourceError> {
        self.resolves.fetch_add(1, Ordering::Relaxed);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.resolve_delay.is_zero() {
            tokio::time::sleep(self.resolve_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&track.id) {
            return Err(SourceError::Status {
                status: 404,
                url: track.permalink_url.clone(),
            });
        }
        Ok(format!("mem://{}", track.id))
    }

    async fn download(&self, url: &str) -> Result<Bytes, SourceError> {
        let id = url.trim_start_matches("mem://");
        self.audio
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::other(format!("unknown track {}", id)))
    }
}

/// Returns its input untouched
struct PassThrough;

#[async_trait]
impl Transcoder for PassThrough {
    async fn transcode(&self, input: Bytes, _format: &OutputFormat) -> Result<Bytes, TranscodeError> {
        Ok(input)
    }
}

/// Fails on `broken`, produces nothing from `mute`, copies anything else
struct Picky;

#[async_trait]
impl Transcoder for Picky {
    async fn transcode(&self, input: Bytes, _format: &OutputFormat) -> Result<Bytes, TranscodeError> {
        match input.as_ref() {
            b"broken" => Err(TranscodeError::Exit {
                status: "exit status: 1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            }),
            b"mute" => Ok(Bytes::new()),
            _ => Ok(input),
        }
    }
}

fn config() -> RelayConfig {
    RelayConfig {
        chunk_size: 10,
        tick_interval_ms: 20,
        consumer_send_timeout_ms: 10,
        degraded_retry_secs: 0,
        shuffle: false,
        ..RelayConfig::for_playlist("memory")
    }
}

async fn start(source: Arc<MemorySource>, config: RelayConfig) -> Arc<BroadcastHub> {
    BroadcastHub::start(config, source, Arc::new(PassThrough))
        .await
        .unwrap()
}

fn drain(stream: &mut pmorelay::ConsumerStream) -> Vec<Bytes> {
    std::iter::from_fn(|| stream.try_recv()).collect()
}

fn broadcast_bytes(outcome: &TickOutcome) -> usize {
    match outcome {
        TickOutcome::Broadcast { bytes, .. } => *bytes,
        other => panic!("expected a broadcast, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_fills_first_track() {
    let source = Arc::new(MemorySource::new(&[("a", 25), ("b", 10), ("c", 10)]));
    let hub = start(source, config()).await;

    let status = hub.status();
    assert_eq!(status.state, HubState::Playing);
    assert_eq!(status.current_track.unwrap().id, "a");
    assert_eq!(status.playlist_len, 3);
    assert_eq!(status.buffer_len, 25);
    assert_eq!(status.consumers, 0);
}

#[tokio::test]
async fn test_consumers_receive_identical_chunks() {
    let source = Arc::new(MemorySource::new(&[("a", 25), ("b", 10)]));
    let hub = start(source.clone(), config()).await;

    let mut first = hub.subscribe();
    let mut second = hub.subscribe();
    for _ in 0..3 {
        hub.tick().await;
        // conduits hold 4 chunks, drain as a transport would
        let a = drain(&mut first);
        let b = drain(&mut second);
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
    }

    assert_eq!(hub.status().chunks_broadcast, 3);
}

#[tokio::test]
async fn test_late_consumer_misses_earlier_chunks() {
    let source = Arc::new(MemorySource::new(&[("a", 25), ("b", 10)]));
    let a = source.audio("a");
    let hub = start(source, config()).await;

    let mut early = hub.subscribe();
    hub.tick().await;
    hub.tick().await;
    let mut late = hub.subscribe();
    hub.tick().await;

    assert_eq!(
        drain(&mut early),
        vec![a.slice(0..10), a.slice(10..20), a.slice(20..25)]
    );
    assert_eq!(drain(&mut late), vec![a.slice(20..25)]);
}

#[tokio::test]
async fn test_playlist_wraps_after_last_track() {
    let source = Arc::new(MemorySource::new(&[("a", 10), ("b", 10)]));
    let a = source.audio("a");
    let hub = start(source, config()).await;
    let mut listener = hub.subscribe();

    assert_eq!(broadcast_bytes(&hub.tick().await), 10);
    assert_eq!(
        hub.tick().await,
        TickOutcome::Advanced {
            track: "b".to_string()
        }
    );
    assert_eq!(broadcast_bytes(&hub.tick().await), 10);
    assert_eq!(
        hub.tick().await,
        TickOutcome::Advanced {
            track: "a".to_string()
        }
    );
    assert_eq!(hub.status().position, 0);
    hub.tick().await;

    let chunks = drain(&mut listener);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0], a);
    assert_eq!(chunks[2], a);
}

#[tokio::test]
async fn test_failing_track_is_skipped() {
    let source = Arc::new(MemorySource::new(&[("a", 10), ("b", 10), ("c", 10)]).failing(&["b"]));
    let c = source.audio("c");
    let hub = start(source, config()).await;
    let mut listener = hub.subscribe();

    hub.tick().await;
    assert_eq!(
        hub.tick().await,
        TickOutcome::Advanced {
            track: "c".to_string()
        }
    );
    hub.tick().await;

    let chunks = drain(&mut listener);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1], c);

    let status = hub.status();
    assert_eq!(status.state, HubState::Playing);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.current_track.unwrap().id, "c");
}

/// `b` fails to fill; the hub plays `a` then goes straight to `c`
async fn assert_b_is_skipped(source: MemorySource) {
    let source = Arc::new(source);
    let a = source.audio("a");
    let c = source.audio("c");
    let hub = BroadcastHub::start(config(), source, Arc::new(Picky))
        .await
        .unwrap();
    let mut listener = hub.subscribe();

    assert_eq!(broadcast_bytes(&hub.tick().await), 10);
    assert_eq!(
        hub.tick().await,
        TickOutcome::Advanced {
            track: "c".to_string()
        }
    );
    assert_eq!(broadcast_bytes(&hub.tick().await), 10);
    assert_eq!(drain(&mut listener), vec![a, c]);

    let status = hub.status();
    assert_eq!(status.state, HubState::Playing);
    assert_eq!(status.consecutive_failures, 0);
}

fn abc() -> MemorySource {
    MemorySource::new(&[("a", 10), ("b", 10), ("c", 10)])
}

#[tokio::test]
async fn test_download_failure_is_skipped() {
    assert_b_is_skipped(abc().without_audio("b")).await;
}

#[tokio::test]
async fn test_empty_download_is_skipped() {
    assert_b_is_skipped(abc().with_audio("b", b"")).await;
}

#[tokio::test]
async fn test_transcoder_failure_is_skipped() {
    assert_b_is_skipped(abc().with_audio("b", b"broken")).await;
}

#[tokio::test]
async fn test_empty_transcoder_output_is_skipped() {
    assert_b_is_skipped(abc().with_audio("b", b"mute")).await;
}

#[tokio::test]
async fn test_end_of_track_scenario() {
    let source = Arc::new(MemorySource::new(&[("a", 25), ("b", 30), ("c", 30)]));
    let a = source.audio("a");
    let b = source.audio("b");
    let hub = start(source, config()).await;
    let mut listener = hub.subscribe();

    let mut received = Vec::new();
    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(hub.tick().await);
        received.extend(drain(&mut listener));
    }

    assert_eq!(broadcast_bytes(&outcomes[0]), 10);
    assert_eq!(broadcast_bytes(&outcomes[1]), 10);
    assert_eq!(broadcast_bytes(&outcomes[2]), 5);
    assert_eq!(
        outcomes[3],
        TickOutcome::Advanced {
            track: "b".to_string()
        }
    );
    assert_eq!(broadcast_bytes(&outcomes[4]), 10);

    assert_eq!(
        received,
        vec![
            a.slice(0..10),
            a.slice(10..20),
            a.slice(20..25),
            b.slice(0..10)
        ]
    );
}

#[tokio::test]
async fn test_exact_length_track_ends_without_empty_chunk() {
    let source = Arc::new(MemorySource::new(&[("a", 20), ("b", 10)]));
    let hub = start(source, config()).await;
    let mut listener = hub.subscribe();

    for _ in 0..3 {
        hub.tick().await;
    }
    let chunks = drain(&mut listener);
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.len() == 10));
    assert_eq!(hub.status().current_track.unwrap().id, "b");
}

#[tokio::test]
async fn test_stalled_consumer_is_evicted() {
    let source = Arc::new(MemorySource::new(&[("a", 100)]));
    let a = source.audio("a");
    let config = RelayConfig {
        consumer_buffer: 1,
        ..config()
    };
    let hub = start(source, config).await;

    let mut stalled = hub.subscribe();
    let mut live = hub.subscribe();
    let stalled_id = stalled.id();

    let TickOutcome::Broadcast { report, .. } = hub.tick().await else {
        panic!("expected a broadcast");
    };
    assert_eq!(report.delivered, 2);
    assert_eq!(live.recv().await.unwrap(), a.slice(0..10));

    let TickOutcome::Broadcast { report, .. } = hub.tick().await else {
        panic!("expected a broadcast");
    };
    assert_eq!(report.delivered, 1);
    assert_eq!(report.evicted, vec![stalled_id]);
    assert_eq!(live.recv().await.unwrap(), a.slice(10..20));
    assert_eq!(hub.consumer_count(), 1);

    hub.tick().await;
    assert_eq!(live.recv().await.unwrap(), a.slice(20..30));

    // the evicted consumer keeps what it had queued, then sees the end
    assert_eq!(stalled.recv().await.unwrap(), a.slice(0..10));
    assert!(stalled.recv().await.is_none());
}

#[tokio::test]
async fn test_registration_is_idempotent() {
    let source = Arc::new(MemorySource::new(&[("a", 10)]));
    let hub = start(source, config()).await;

    let (handle, mut rx) = ConsumerHandle::channel(4);
    assert!(hub.register(handle.clone()));
    assert!(!hub.register(handle.clone()));
    assert_eq!(hub.consumer_count(), 1);

    hub.tick().await;
    assert!(rx.try_recv().is_ok());
    // registered once, so only one copy
    assert!(rx.try_recv().is_err());

    assert!(hub.unregister(handle.id()));
    assert!(!hub.unregister(handle.id()));
    assert_eq!(hub.consumer_count(), 0);
}

#[tokio::test]
async fn test_dropping_stream_unregisters() {
    let source = Arc::new(MemorySource::new(&[("a", 10)]));
    let hub = start(source, config()).await;

    let stream = hub.subscribe();
    let other = hub.subscribe();
    assert_eq!(hub.consumer_count(), 2);
    drop(stream);
    assert_eq!(hub.consumer_count(), 1);
    drop(other);
    assert_eq!(hub.consumer_count(), 0);
}

#[tokio::test]
async fn test_fixed_seed_gives_same_order() {
    let tracks: Vec<(String, usize)> = (0..12).map(|i| (format!("t{}", i), 10)).collect();
    let tracks: Vec<(&str, usize)> = tracks.iter().map(|(id, len)| (id.as_str(), *len)).collect();

    let mut orders = Vec::new();
    for _ in 0..2 {
        let source = Arc::new(MemorySource::new(&tracks));
        let config = RelayConfig {
            shuffle: true,
            shuffle_seed: Some(42),
            ..config()
        };
        let hub = start(source, config).await;

        let mut order = vec![hub.status().current_track.unwrap().id];
        for _ in 0..11 {
            hub.tick().await;
            let TickOutcome::Advanced { track } = hub.tick().await else {
                panic!("expected the next track");
            };
            order.push(track);
        }
        orders.push(order);
    }

    assert_eq!(orders[0], orders[1]);
    let mut ids = orders[0].clone();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 12);
}

#[tokio::test]
async fn test_all_failing_playlist_degrades() {
    let source = Arc::new(
        MemorySource::new(&[("a", 10), ("b", 10), ("c", 10)]).failing(&["a", "b", "c"]),
    );
    let hub = start(source.clone(), config()).await;

    let status = hub.status();
    assert_eq!(status.state, HubState::Degraded);
    assert_eq!(status.consecutive_failures, 3);
    assert!(status.current_track.is_none());
    assert_eq!(source.resolves.load(Ordering::Relaxed), 3);

    // no retry configured: ticks produce nothing and fetch nothing
    let mut listener = hub.subscribe();
    assert_eq!(hub.tick().await, TickOutcome::Degraded);
    assert!(listener.try_recv().is_none());
    assert_eq!(source.resolves.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn test_failure_budget_is_configurable() {
    let source = Arc::new(
        MemorySource::new(&[("a", 10), ("b", 10), ("c", 10)]).failing(&["a", "b"]),
    );
    let config = RelayConfig {
        max_consecutive_failures: 2,
        ..config()
    };
    let hub = start(source, config).await;
    assert_eq!(hub.state(), HubState::Degraded);
}

#[tokio::test]
async fn test_degraded_hub_recovers() {
    let source = Arc::new(MemorySource::new(&[("a", 10), ("b", 10)]).failing(&["a", "b"]));
    let hub = start(source.clone(), config()).await;
    assert_eq!(hub.state(), HubState::Degraded);
    assert!(matches!(
        hub.recover().await,
        Err(Error::Degraded { attempts: 2 })
    ));

    source.heal();
    hub.recover().await.unwrap();
    assert_eq!(hub.state(), HubState::Playing);

    let mut listener = hub.subscribe();
    assert_eq!(broadcast_bytes(&hub.tick().await), 10);
    assert_eq!(listener.try_recv().unwrap().len(), 10);
}

#[tokio::test]
async fn test_degraded_hub_retries_on_schedule() {
    let source = Arc::new(MemorySource::new(&[("a", 10), ("b", 10)]).failing(&["a", "b"]));
    let config = RelayConfig {
        degraded_retry_secs: 1,
        ..config()
    };
    let hub = start(source.clone(), config).await;
    assert_eq!(hub.state(), HubState::Degraded);
    assert_eq!(source.resolves(), 2);

    assert_eq!(hub.tick().await, TickOutcome::Degraded);
    assert_eq!(source.resolves(), 2);

    // healed, but the retry interval has not elapsed yet
    source.heal();
    assert_eq!(hub.tick().await, TickOutcome::Degraded);
    assert_eq!(source.resolves(), 2);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        hub.tick().await,
        TickOutcome::Advanced {
            track: "a".to_string()
        }
    );
    assert_eq!(hub.state(), HubState::Playing);
    assert_eq!(source.resolves(), 3);
}

#[tokio::test]
async fn test_recover_waits_for_running_tick() {
    let source = Arc::new(
        MemorySource::new(&[("a", 10), ("b", 10)]).slow(Duration::from_millis(100)),
    );
    let hub = start(source.clone(), config()).await;
    assert_eq!(broadcast_bytes(&hub.tick().await), 10);

    // the tick fills `b` while recover is requested
    let (outcome, recovered) = tokio::join!(hub.tick(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.recover().await
    });

    assert_eq!(
        outcome,
        TickOutcome::Advanced {
            track: "b".to_string()
        }
    );
    assert!(recovered.is_ok());
    assert_eq!(source.peak_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(source.resolves(), 3);
    assert_eq!(hub.state(), HubState::Playing);
    assert_eq!(hub.status().current_track.unwrap().id, "b");
}

#[tokio::test]
async fn test_start_fails_when_source_unavailable() {
    let mut source = MemorySource::new(&[("a", 10)]);
    source.unavailable = true;
    let result = BroadcastHub::start(config(), Arc::new(source), Arc::new(PassThrough)).await;
    assert!(matches!(result, Err(Error::SourceUnavailable(_))));
}

#[tokio::test]
async fn test_start_fails_on_empty_playlist() {
    let source = MemorySource::new(&[]);
    let result = BroadcastHub::start(config(), Arc::new(source), Arc::new(PassThrough)).await;
    assert!(matches!(result, Err(Error::EmptyPlaylist(_))));
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let source = MemorySource::new(&[("a", 10)]);
    let config = RelayConfig {
        chunk_size: 0,
        ..config()
    };
    let result = BroadcastHub::start(config, Arc::new(source), Arc::new(PassThrough)).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_paced_run_delivers_chunks() {
    let source = Arc::new(MemorySource::new(&[("a", 1000)]));
    let a = source.audio("a");
    let hub = start(source, config()).await;
    let mut listener = hub.subscribe();

    let pacing = hub.spawn();
    for i in 0..3 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), listener.recv())
            .await
            .expect("pacing loop stalled")
            .unwrap();
        assert_eq!(chunk, a.slice(i * 10..(i + 1) * 10));
    }

    hub.shutdown();
    tokio::time::timeout(Duration::from_secs(2), pacing)
        .await
        .expect("pacing loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_stop_reports_a_failed_pacing_task() {
    let source = Arc::new(MemorySource::new(&[("a", 1000)]));
    let hub = start(source, config()).await;

    let pacing = hub.spawn();
    assert!(hub.stop(pacing).await);
    assert!(hub.cancellation_token().is_cancelled());

    let crashed: tokio::task::JoinHandle<()> = tokio::spawn(async { panic!("pacing crashed") });
    assert!(!hub.stop(crashed).await);
}
