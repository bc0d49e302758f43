//! Playlist cursor
//!
//! Ordered (shuffled once) list of track descriptors plus the index of the
//! track currently on air. Playback loops forever: advancing past the last
//! track wraps to the first one.

use crate::error::{Error, Result};
use crate::track::{TrackDescriptor, TrackSource};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Shuffled playlist with a wrapping position.
///
/// Invariant: `tracks` is never empty and `position < tracks.len()`.
#[derive(Debug, Clone)]
pub struct PlaylistCursor {
    tracks: Vec<TrackDescriptor>,
    position: usize,
}

impl PlaylistCursor {
    /// Build a cursor from an already fetched track list
    pub fn new(tracks: Vec<TrackDescriptor>) -> Result<Self> {
        if tracks.is_empty() {
            return Err(Error::EmptyPlaylist("no track provided".to_string()));
        }
        Ok(Self {
            tracks,
            position: 0,
        })
    }

    /// Fetch every descriptor of `playlist` from the source
    ///
    /// # Errors
    ///
    /// - [`Error::SourceUnavailable`] if the remote call fails
    /// - [`Error::EmptyPlaylist`] if the playlist has no track
    pub async fn load(source: &dyn TrackSource, playlist: &str) -> Result<Self> {
        let tracks = source
            .fetch_playlist(playlist)
            .await
            .map_err(Error::SourceUnavailable)?;

        if tracks.is_empty() {
            return Err(Error::EmptyPlaylist(playlist.to_string()));
        }

        info!("Loaded playlist {} ({} tracks)", playlist, tracks.len());
        Ok(Self {
            tracks,
            position: 0,
        })
    }

    /// Randomize the order once and rewind to the first track.
    ///
    /// The same seed always gives the same order.
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.tracks.shuffle(&mut rng);
        self.position = 0;
        debug!("Playlist shuffled (seed={})", seed);
    }

    /// Seed derived from the current wall clock
    pub fn clock_seed() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    }

    /// Track at the current position
    pub fn current(&self) -> &TrackDescriptor {
        &self.tracks[self.position]
    }

    /// Move to the next track, wrapping after the last one
    pub fn advance(&mut self) -> &TrackDescriptor {
        self.position = (self.position + 1) % self.tracks.len();
        self.current()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Always false, kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }
}
