//! Track descriptors and the track source contract
//!
//! A [`TrackSource`] knows how to list the tracks of a remote playlist, how to
//! turn one of them into a (possibly short-lived) direct download location and
//! how to fetch the raw bytes behind that location. The hub only talks to this
//! trait, so the concrete backend (HTTP manifest, M3U, test fakes...) can be
//! swapped freely.

use crate::error::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One playlist entry.
///
/// Immutable once fetched; the hub keeps the whole list for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Stable remote identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Display artist, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Canonical location of the track on the remote service
    pub permalink_url: String,
    /// Direct audio location, when the playlist already provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    /// Endpoint returning a time-limited direct location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_url: Option<String>,
    /// Duration announced by the playlist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TrackDescriptor {
    /// Create a descriptor with only the mandatory fields
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        permalink_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            permalink_url: permalink_url.into(),
            stream_url: None,
            resolve_url: None,
            duration_ms: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    pub fn with_resolve_url(mut self, url: impl Into<String>) -> Self {
        self.resolve_url = Some(url.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// "Artist - Title" when the artist is known, the title otherwise
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) if !artist.is_empty() => format!("{} - {}", artist, self.title),
            _ => self.title.clone(),
        }
    }
}

impl fmt::Display for TrackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.display_name(), self.id)
    }
}

/// Remote playlist and track provider.
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// Fetch the ordered list of tracks of a playlist
    async fn fetch_playlist(&self, playlist: &str) -> Result<Vec<TrackDescriptor>, SourceError>;

    /// Resolve a track to a direct download location
    async fn resolve_download_url(&self, track: &TrackDescriptor) -> Result<String, SourceError>;

    /// Download the raw audio behind a resolved location
    async fn download(&self, url: &str) -> Result<Bytes, SourceError>;
}
