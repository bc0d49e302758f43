//! # pmotracks - Playlist and track source for PMORelay
//!
//! Fetches playlists (JSON manifests or M3U lists) over HTTP or from the local
//! filesystem, resolves tracks to direct audio locations and downloads them.
//! [`TrackClient`] implements [`pmorelay::TrackSource`], so it plugs directly
//! into a [`pmorelay::BroadcastHub`].
//!
//! ```no_run
//! use pmorelay::{BroadcastHub, FfmpegTranscoder, RelayConfig};
//! use pmotracks::TrackClient;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = TrackClient::builder()
//!     .timeout(Duration::from_secs(30))
//!     .build()?;
//! let hub = BroadcastHub::start(
//!     RelayConfig::for_playlist("https://music.example/night.m3u"),
//!     Arc::new(client),
//!     Arc::new(FfmpegTranscoder::default()),
//! )
//! .await?;
//! hub.spawn();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;

pub use client::{ClientBuilder, TrackClient, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_USER_AGENT};
pub use error::{Error, Result};
pub use models::{ManifestTrack, PlaylistManifest, ResolvedLocation};
