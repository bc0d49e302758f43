//! Error types for the relay hub

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the hub to its owner
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The playlist could not be fetched from the track source
    #[error("Playlist source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),

    /// The playlist was fetched but contains no track
    #[error("Playlist is empty: {0}")]
    EmptyPlaylist(String),

    /// Too many tracks failed in a row, the hub stopped broadcasting
    #[error("Hub degraded after {attempts} consecutive fill failures")]
    Degraded { attempts: usize },

    /// A single track could not be turned into a program buffer
    #[error(transparent)]
    Fill(#[from] FillError),

    /// Invalid relay configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure of the fetch-download-transcode pipeline for one track.
///
/// These are recovered inside the hub by advancing to the next track.
#[derive(Debug, thiserror::Error)]
pub enum FillError {
    #[error("Failed to resolve download location for '{track}': {source}")]
    ResolveFailed {
        track: String,
        #[source]
        source: SourceError,
    },

    #[error("Failed to download '{track}': {source}")]
    DownloadFailed {
        track: String,
        #[source]
        source: SourceError,
    },

    #[error("Failed to transcode '{track}': {source}")]
    TranscodeFailed {
        track: String,
        #[source]
        source: TranscodeError,
    },
}

impl FillError {
    /// Identifier of the track that failed
    pub fn track(&self) -> &str {
        match self {
            Self::ResolveFailed { track, .. }
            | Self::DownloadFailed { track, .. }
            | Self::TranscodeFailed { track, .. } => track,
        }
    }
}

/// Errors reported by a [`TrackSource`](crate::TrackSource) implementation
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transport level failure (connection, TLS, timeout...)
    #[error("Request failed: {0}")]
    Request(String),

    /// Remote answered with a non-success status
    #[error("Remote returned status {status} for {url}")]
    Status { status: u16, url: String },

    /// Payload could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Remote answered but the payload was empty
    #[error("Empty response from {0}")]
    Empty(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Errors reported by a [`Transcoder`](crate::Transcoder) implementation
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// The encoder could not be started
    #[error("Failed to spawn transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// Writing the raw audio to the encoder failed
    #[error("Failed to write transcoder input: {0}")]
    Input(#[source] std::io::Error),

    /// Reading the encoded audio failed
    #[error("Failed to read transcoder output: {0}")]
    Output(#[source] std::io::Error),

    /// The encoder exited with a non-zero status
    #[error("Transcoder exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    /// The encoder succeeded but produced no audio
    #[error("Transcoder produced no output")]
    EmptyOutput,
}
