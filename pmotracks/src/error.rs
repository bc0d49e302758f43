//! Error types for the track client

use pmorelay::SourceError;

/// Result type alias for track client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when fetching playlists and tracks
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error (local playlists and files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Playlist body could not be understood
    #[error("Invalid playlist: {0}")]
    InvalidPlaylist(String),

    /// Location outside what the track source may read
    #[error("Location not allowed: {0}")]
    ForbiddenLocation(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn invalid_playlist(msg: impl Into<String>) -> Self {
        Self::InvalidPlaylist(msg.into())
    }
}

impl From<Error> for SourceError {
    fn from(err: Error) -> Self {
        match err {
            Error::Http(e) => SourceError::Request(e.to_string()),
            Error::Status { status, url } => SourceError::Status { status, url },
            Error::Json(e) => SourceError::InvalidResponse(e.to_string()),
            Error::InvalidPlaylist(msg) => SourceError::InvalidResponse(msg),
            Error::InvalidUrl(e) => SourceError::InvalidResponse(e.to_string()),
            Error::ForbiddenLocation(url) => {
                SourceError::InvalidResponse(format!("location not allowed: {}", url))
            }
            Error::Io(e) => SourceError::Io(e),
            Error::Other(msg) => SourceError::Other(msg),
        }
    }
}
