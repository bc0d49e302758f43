//! # pmorelay - Paced broadcast hub for an internet radio relay
//!
//! `pmorelay` pulls the tracks of a remote playlist, transcodes each one to a
//! constant-bitrate stream and hands the same fixed-size chunks to every
//! connected listener at a real-time cadence. Every listener hears the same
//! program position, whenever it joined.
//!
//! ## Architecture
//!
//! ```text
//! TrackSource ──▶ Filler ──▶ ProgramBuffer ──tick──▶ ConsumerRegistry ──▶ listeners
//!      ▲          (resolve,                           (bounded conduits,
//!      │           download,                            slow ones evicted)
//! PlaylistCursor   transcode)
//! ```
//!
//! - [`TrackSource`]: lists a playlist, resolves and downloads tracks
//! - [`Transcoder`]: converts raw audio to the broadcast format
//!   ([`FfmpegTranscoder`] pipes it through `ffmpeg`)
//! - [`PlaylistCursor`]: shuffled track list, loops forever
//! - [`ProgramBuffer`]: the track on air, read one chunk per tick
//! - [`BroadcastHub`]: owns all of the above and runs the pacing loop
//!
//! ## Quick Start
//!
//! ```no_run
//! use pmorelay::{BroadcastHub, FfmpegTranscoder, RelayConfig, TrackSource};
//! use std::sync::Arc;
//!
//! # async fn run(source: Arc<dyn TrackSource>) -> pmorelay::Result<()> {
//! let config = RelayConfig::for_playlist("https://example.com/playlist.m3u");
//! let hub = BroadcastHub::start(config, source, Arc::new(FfmpegTranscoder::default())).await?;
//! hub.spawn();
//!
//! let mut listener = hub.subscribe();
//! while let Some(chunk) = listener.recv().await {
//!     // write chunk to the client socket
//! #   let _ = chunk;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `pmoconfig` (default): [`RelayConfigExt`] reads the `relay` section of
//!   the application configuration
//! - `server`: [`RelayServerExt`] adds `/stream` and `/api/relay/status` to a
//!   `pmoserver::Server`

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod cursor;
pub mod error;
pub mod fill;
pub mod hub;
pub mod track;
pub mod transcoder;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

#[cfg(feature = "server")]
pub mod pmoserver_ext;

pub use buffer::ProgramBuffer;
pub use config::{RelayConfig, TranscoderConfig};
pub use consumer::{
    BroadcastReport, ConsumerHandle, ConsumerId, ConsumerRegistry, ConsumerStream, DeliveryError,
};
pub use cursor::PlaylistCursor;
pub use error::{Error, FillError, Result, SourceError, TranscodeError};
pub use fill::Filler;
pub use hub::{BroadcastHub, HubState, HubStatus, TickOutcome};
pub use track::{TrackDescriptor, TrackSource};
pub use transcoder::{FfmpegTranscoder, OutputFormat, Transcoder, DEFAULT_BITRATE_KBPS};

#[cfg(feature = "pmoconfig")]
pub use config_ext::RelayConfigExt;

#[cfg(feature = "server")]
pub use pmoserver_ext::{RelayApiDoc, RelayServerExt, RelayStatusResponse};
