//! HTTP client for playlists and tracks
//!
//! [`TrackClient`] implements [`pmorelay::TrackSource`] on top of reqwest:
//!
//! - the playlist source is a JSON manifest or an M3U list, given as an
//!   `http(s)://` URL, a `file://` URL or a local path
//! - a track plays from its `stream_url` when it has one; otherwise its
//!   `resolve_url` is queried for a short-lived location (`{"url": "..."}`);
//!   otherwise the permalink itself is downloaded
//! - local files are only reachable from a local playlist; resolvers must be
//!   `http(s)` endpoints and must answer with `http(s)` locations
//!
//! # Example
//!
//! ```no_run
//! use pmotracks::TrackClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TrackClient::new()?;
//!     let tracks = client.load_playlist("https://music.example/night.m3u").await?;
//!     for track in &tracks {
//!         println!("{}", track);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::models::{parse_playlist, ResolvedLocation};
use async_trait::async_trait;
use bytes::Bytes;
use pmorelay::{SourceError, TrackDescriptor, TrackSource};
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default timeout for HTTP requests (60 seconds, downloads are whole files)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = concat!("PMORelay/", env!("CARGO_PKG_VERSION"), " (pmotracks)");

/// Playlist and track client
///
/// Stateless: nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct TrackClient {
    client: Client,
    timeout: Duration,
}

impl TrackClient {
    /// Create a new client with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Create a client with a custom reqwest::Client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Get the internal HTTP client
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Turn a playlist source or track location into a URL.
    ///
    /// Anything that does not parse as an `http`, `https` or `file` URL is
    /// taken as a local path, relative to the working directory.
    pub fn location(source: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(source) {
            if matches!(url.scheme(), "http" | "https" | "file") {
                return Ok(url);
            }
        }

        let path = Path::new(source);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Url::from_file_path(&absolute)
            .map_err(|_| Error::other(format!("Not a usable location: {}", source)))
    }

    // ========================================================================
    // Playlist
    // ========================================================================

    /// Fetch and parse a playlist
    pub async fn load_playlist(&self, source: &str) -> Result<Vec<TrackDescriptor>> {
        let url = Self::location(source)?;
        let body = self.get_text(&url).await?;
        let tracks = parse_playlist(&body, &url)?;
        debug!("Parsed {} tracks from {}", tracks.len(), url);
        Ok(tracks)
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// Direct location of a track's audio
    pub async fn resolve_location(&self, track: &TrackDescriptor) -> Result<String> {
        if let Some(stream_url) = &track.stream_url {
            return Ok(stream_url.clone());
        }

        if let Some(resolve_url) = &track.resolve_url {
            let url = Self::remote_url(resolve_url)?;
            let response = self.get(&url).await?;
            let resolved: ResolvedLocation = response.json().await?;
            if resolved.url.is_empty() {
                return Err(Error::other(format!("{} resolved to an empty location", url)));
            }
            let location = Self::remote_url(&resolved.url)?;
            debug!("Resolved {} via {}", track.id, url);
            return Ok(location.into());
        }

        Ok(track.permalink_url.clone())
    }

    /// Download a whole file into memory
    ///
    /// `location` must be an absolute `http`, `https` or `file` URL, as
    /// produced by [`TrackClient::load_playlist`] and
    /// [`TrackClient::resolve_location`].
    pub async fn fetch_bytes(&self, location: &str) -> Result<Bytes> {
        let url = Url::parse(location)?;
        if !matches!(url.scheme(), "http" | "https" | "file") {
            return Err(Error::ForbiddenLocation(location.to_string()));
        }
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| Error::other(format!("Invalid file URL: {}", url)))?;
            return Ok(Bytes::from(tokio::fs::read(path).await?));
        }

        let bytes = self.get(&url).await?.bytes().await?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Parse `location` and require an `http(s)` scheme
    fn remote_url(location: &str) -> Result<Url> {
        let url = Url::parse(location)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(Error::ForbiddenLocation(location.to_string())),
        }
    }

    async fn get(&self, url: &Url) -> Result<Response> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| Error::other(format!("Invalid file URL: {}", url)))?;
            return Ok(tokio::fs::read_to_string(path).await?);
        }
        Ok(self.get(url).await?.text().await?)
    }
}

#[async_trait]
impl TrackSource for TrackClient {
    async fn fetch_playlist(
        &self,
        playlist: &str,
    ) -> std::result::Result<Vec<TrackDescriptor>, SourceError> {
        Ok(self.load_playlist(playlist).await?)
    }

    async fn resolve_download_url(
        &self,
        track: &TrackDescriptor,
    ) -> std::result::Result<String, SourceError> {
        Ok(self.resolve_location(track).await?)
    }

    async fn download(&self, url: &str) -> std::result::Result<Bytes, SourceError> {
        Ok(self.fetch_bytes(url).await?)
    }
}

/// Builder for configuring a TrackClient
#[derive(Debug)]
pub struct ClientBuilder {
    client: Option<Client>,
    timeout: Duration,
    user_agent: String,
    proxy: Option<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
        }
    }
}

impl ClientBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set a proxy URL
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Build the client
    pub fn build(self) -> Result<TrackClient> {
        let client = if let Some(client) = self.client {
            client
        } else {
            let mut builder = Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout);

            if let Some(proxy_url) = &self.proxy {
                let proxy = reqwest::Proxy::all(proxy_url)
                    .map_err(|e| Error::other(format!("Invalid proxy: {}", e)))?;
                builder = builder.proxy(proxy);
            }

            builder.build()?
        };

        Ok(TrackClient {
            client,
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_keeps_urls() {
        let url = TrackClient::location("https://music.example/a.m3u").unwrap();
        assert_eq!(url.scheme(), "https");
        let url = TrackClient::location("file:///srv/music/a.m3u").unwrap();
        assert_eq!(url.scheme(), "file");
    }

    #[test]
    fn test_location_turns_paths_into_file_urls() {
        let url = TrackClient::location("/srv/music/list.m3u").unwrap();
        assert_eq!(url.as_str(), "file:///srv/music/list.m3u");

        let url = TrackClient::location("lists/a.m3u").unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/lists/a.m3u"));
    }

    #[test]
    fn test_remote_url_rejects_local_schemes() {
        assert!(TrackClient::remote_url("https://cdn.example/a.mp3").is_ok());
        assert!(matches!(
            TrackClient::remote_url("file:///etc/passwd"),
            Err(Error::ForbiddenLocation(_))
        ));
        assert!(TrackClient::remote_url("/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_fetch_bytes_needs_an_absolute_url() {
        let client = TrackClient::new().unwrap();
        assert!(matches!(
            client.fetch_bytes("/etc/passwd").await,
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            client.fetch_bytes("ftp://cdn.example/a.mp3").await,
            Err(Error::ForbiddenLocation(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_url_wins() {
        let client = TrackClient::new().unwrap();
        let track = TrackDescriptor::new("1", "One", "https://music.example/1")
            .with_stream_url("https://cdn.example/1.mp3")
            .with_resolve_url("https://music.example/1/stream");
        assert_eq!(
            client.resolve_location(&track).await.unwrap(),
            "https://cdn.example/1.mp3"
        );

        let bare = TrackDescriptor::new("2", "Two", "https://music.example/2.mp3");
        assert_eq!(
            client.resolve_location(&bare).await.unwrap(),
            "https://music.example/2.mp3"
        );
    }
}
