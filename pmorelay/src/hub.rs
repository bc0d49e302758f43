//! Broadcast hub
//!
//! The hub owns the program buffer and the playlist cursor, and a registry of
//! listener conduits. A single pacing task calls [`BroadcastHub::tick`] once
//! per tick interval; each tick either hands the next chunk of the current
//! track to every registered listener, or, once the track is exhausted,
//! advances the playlist and fills the next buffer.
//!
//! ```text
//!   Loading ──fill ok──▶ Playing ──EOF──▶ fill next ──▶ Playing
//!      │                    │
//!      └──budget exhausted──┴──▶ Degraded ──retry ok──▶ Playing
//! ```
//!
//! Locks on the buffer, the cursor and the registry are `std::sync` locks and
//! are never held across an `.await`: fills and deliveries run with every
//! lock released.

use crate::buffer::ProgramBuffer;
use crate::config::RelayConfig;
use crate::consumer::{
    BroadcastReport, ConsumerHandle, ConsumerId, ConsumerRegistry, ConsumerStream,
};
use crate::cursor::PlaylistCursor;
use crate::error::{Error, Result};
use crate::fill::Filler;
use crate::track::{TrackDescriptor, TrackSource};
use crate::transcoder::{OutputFormat, Transcoder};
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HubState {
    /// Filling a buffer, nothing on air yet
    Loading,
    /// A buffer is on air
    Playing,
    /// Too many fills failed in a row; no chunk is produced
    Degraded,
}

impl std::fmt::Display for HubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A chunk of `bytes` bytes went out
    Broadcast { bytes: usize, report: BroadcastReport },
    /// The track ended; `track` was filled and goes on air next tick
    Advanced { track: String },
    /// No buffer is available
    Degraded,
}

/// Snapshot of the hub, served by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub state: HubState,
    pub current_track: Option<TrackDescriptor>,
    /// Cursor position in the playlist
    pub position: usize,
    pub playlist_len: usize,
    /// Bytes of the current track already broadcast
    pub buffer_position: usize,
    pub buffer_len: usize,
    pub consumers: usize,
    pub chunks_broadcast: u64,
    pub consecutive_failures: usize,
}

#[derive(Debug, Clone, Copy)]
struct StateCell {
    state: HubState,
    since: Instant,
}

/// Paced fan-out of one playlist to many listeners.
pub struct BroadcastHub {
    config: RelayConfig,
    filler: Filler,
    cursor: RwLock<PlaylistCursor>,
    buffer: RwLock<ProgramBuffer>,
    consumers: Arc<ConsumerRegistry>,
    state: RwLock<StateCell>,
    // Serializes ticks; the only lock held across awaits
    pacing: tokio::sync::Mutex<()>,
    chunks_broadcast: AtomicU64,
    consecutive_failures: AtomicUsize,
    shutdown: CancellationToken,
}

impl BroadcastHub {
    /// Build a hub around an already loaded cursor.
    ///
    /// The hub starts in [`HubState::Loading`] with an empty buffer; the first
    /// tick fills the track under the cursor.
    pub fn new(config: RelayConfig, cursor: PlaylistCursor, filler: Filler) -> Self {
        Self {
            config,
            filler,
            cursor: RwLock::new(cursor),
            buffer: RwLock::new(ProgramBuffer::empty()),
            consumers: Arc::new(ConsumerRegistry::new()),
            state: RwLock::new(StateCell {
                state: HubState::Loading,
                since: Instant::now(),
            }),
            pacing: tokio::sync::Mutex::new(()),
            chunks_broadcast: AtomicU64::new(0),
            consecutive_failures: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Load the playlist, shuffle it and fill the first track.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for an unusable configuration
    /// - [`Error::SourceUnavailable`] if the playlist cannot be fetched
    /// - [`Error::EmptyPlaylist`] if it has no track
    ///
    /// A playlist whose every track fails to fill does not make `start` fail:
    /// the hub comes up [`HubState::Degraded`] and retries later.
    pub async fn start(
        config: RelayConfig,
        source: Arc<dyn TrackSource>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let mut cursor = PlaylistCursor::load(source.as_ref(), &config.playlist_source).await?;
        if config.shuffle {
            let seed = config.shuffle_seed.unwrap_or_else(PlaylistCursor::clock_seed);
            cursor.shuffle(seed);
        }

        let filler = Filler::new(source, transcoder, config.output_format());
        let hub = Arc::new(Self::new(config, cursor, filler));
        match hub.fill_current().await {
            Ok(()) => info!(
                "Relay started on {} ({} tracks)",
                hub.config.playlist_source,
                hub.playlist_len()
            ),
            Err(e) => error!("Relay started without a playable track: {}", e),
        }
        Ok(hub)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn output_format(&self) -> &OutputFormat {
        self.filler.format()
    }

    pub fn state(&self) -> HubState {
        self.read_state().state
    }

    fn read_state(&self) -> StateCell {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: HubState) {
        let mut cell = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if cell.state != state {
            debug!("Hub state {} -> {}", cell.state, state);
            *cell = StateCell {
                state,
                since: Instant::now(),
            };
        }
    }

    pub fn playlist_len(&self) -> usize {
        self.cursor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn current_descriptor(&self) -> TrackDescriptor {
        self.cursor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current()
            .clone()
    }

    fn advance_cursor(&self) -> TrackDescriptor {
        self.cursor
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .advance()
            .clone()
    }

    // ------------------------------------------------------------------
    // Consumers
    // ------------------------------------------------------------------

    /// Add a listener conduit; `false` if it is already registered
    pub fn register(&self, handle: ConsumerHandle) -> bool {
        self.consumers.register(handle)
    }

    /// Remove a listener conduit; `false` if it was not registered
    pub fn unregister(&self, id: ConsumerId) -> bool {
        self.consumers.unregister(id)
    }

    /// Open a conduit sized from the configuration and register it.
    ///
    /// The listener receives every chunk broadcast from the next tick on.
    pub fn subscribe(&self) -> ConsumerStream {
        let (handle, rx) = ConsumerHandle::channel(self.config.consumer_buffer);
        let id = handle.id();
        self.consumers.register(handle);
        ConsumerStream::new(id, rx, &self.consumers)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Deliver `chunk` to every registered listener
    pub async fn broadcast(&self, chunk: &Bytes) -> BroadcastReport {
        self.consumers
            .broadcast(chunk, self.config.consumer_send_timeout())
            .await
    }

    // ------------------------------------------------------------------
    // Filling
    // ------------------------------------------------------------------

    /// Fill the track under the cursor, skipping tracks that fail.
    ///
    /// Every failure advances the cursor. Once the failure budget is spent the
    /// hub is degraded and [`Error::Degraded`] is returned.
    async fn fill_current(&self) -> Result<()> {
        let budget = self.config.failure_budget(self.playlist_len());
        let mut failures = 0;

        loop {
            if self.shutdown.is_cancelled() {
                debug!("Fill interrupted by shutdown");
                return Ok(());
            }

            let track = self.current_descriptor();
            match self.filler.fill(&track).await {
                Ok(buffer) => {
                    let len = buffer.len();
                    *self.buffer.write().unwrap_or_else(PoisonError::into_inner) = buffer;
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.set_state(HubState::Playing);
                    info!("Now playing {} ({} bytes)", track, len);
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    self.consecutive_failures.store(failures, Ordering::Relaxed);
                    warn!("Skipping {} ({}/{}): {}", track, failures, budget, e);
                    self.advance_cursor();

                    if failures >= budget {
                        *self.buffer.write().unwrap_or_else(PoisonError::into_inner) =
                            ProgramBuffer::empty();
                        self.set_state(HubState::Degraded);
                        error!("{} tracks failed in a row, relay is degraded", failures);
                        return Err(Error::Degraded { attempts: failures });
                    }
                }
            }
        }
    }

    /// Run the fill loop again from a degraded hub.
    ///
    /// Waits for any tick in progress; no chunk is broadcast while the fill
    /// loop runs.
    pub async fn recover(&self) -> Result<()> {
        let _pacing = self.pacing.lock().await;
        self.recover_locked().await
    }

    // Caller holds `pacing`
    async fn recover_locked(&self) -> Result<()> {
        info!("Attempting to recover from degraded state");
        self.set_state(HubState::Loading);
        self.fill_current().await
    }

    // ------------------------------------------------------------------
    // Pacing
    // ------------------------------------------------------------------

    /// Perform one pacing step.
    pub async fn tick(&self) -> TickOutcome {
        let _pacing = self.pacing.lock().await;

        match self.read_state() {
            StateCell {
                state: HubState::Degraded,
                since,
            } => return self.tick_degraded(since).await,
            StateCell {
                state: HubState::Loading,
                ..
            } if self.buffer_is_exhausted() => {
                // first fill of a hub built with `new`
                return self.fill_outcome().await;
            }
            _ => {}
        }

        let chunk = {
            let mut buffer = self.buffer.write().unwrap_or_else(PoisonError::into_inner);
            buffer.read_chunk(self.config.chunk_size)
        };

        match chunk {
            Some(chunk) => {
                let report = self.broadcast(&chunk).await;
                let count = self.chunks_broadcast.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(
                    "Chunk #{} ({} bytes) delivered to {} consumers",
                    count,
                    chunk.len(),
                    report.delivered
                );
                TickOutcome::Broadcast {
                    bytes: chunk.len(),
                    report,
                }
            }
            None => {
                let next = self.advance_cursor();
                debug!("End of track, advancing to {}", next);
                self.set_state(HubState::Loading);
                self.fill_outcome().await
            }
        }
    }

    fn buffer_is_exhausted(&self) -> bool {
        self.buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_exhausted()
    }

    async fn fill_outcome(&self) -> TickOutcome {
        match self.fill_current().await {
            Ok(()) => TickOutcome::Advanced {
                track: self.current_descriptor().id,
            },
            Err(_) => TickOutcome::Degraded,
        }
    }

    async fn tick_degraded(&self, since: Instant) -> TickOutcome {
        let Some(retry) = self.config.degraded_retry_interval() else {
            return TickOutcome::Degraded;
        };
        if since.elapsed() < retry {
            return TickOutcome::Degraded;
        }
        match self.recover_locked().await {
            Ok(()) => TickOutcome::Advanced {
                track: self.current_descriptor().id,
            },
            Err(_) => TickOutcome::Degraded,
        }
    }

    /// Tick at the configured cadence until [`shutdown`](Self::shutdown).
    ///
    /// Late ticks are delayed rather than bursted, so listeners never get more
    /// than one chunk per interval.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Pacing started: {} bytes every {} ms",
            self.config.chunk_size, self.config.tick_interval_ms
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Pacing stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Stop the pacing task after the current tick
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop pacing and wait for the task returned by [`spawn`](Self::spawn).
    ///
    /// Returns `false` when the task panicked or was aborted.
    pub async fn stop(&self, pacing: JoinHandle<()>) -> bool {
        self.shutdown();
        match pacing.await {
            Ok(()) => true,
            Err(e) => {
                error!("Pacing task failed: {}", e);
                false
            }
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn status(&self) -> HubStatus {
        let (current_track, buffer_position, buffer_len) = {
            let buffer = self.buffer.read().unwrap_or_else(PoisonError::into_inner);
            (buffer.track().cloned(), buffer.position(), buffer.len())
        };
        let (position, playlist_len) = {
            let cursor = self.cursor.read().unwrap_or_else(PoisonError::into_inner);
            (cursor.position(), cursor.len())
        };

        HubStatus {
            state: self.state(),
            current_track,
            position,
            playlist_len,
            buffer_position,
            buffer_len,
            consumers: self.consumers.len(),
            chunks_broadcast: self.chunks_broadcast.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("playlist_source", &self.config.playlist_source)
            .field("state", &self.state())
            .field("consumers", &self.consumers.len())
            .finish_non_exhaustive()
    }
}
