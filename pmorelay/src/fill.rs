//! Fill pipeline: resolve, download, transcode
//!
//! Turns one [`TrackDescriptor`] into a ready-to-play [`ProgramBuffer`].
//! No lock is taken here; the hub swaps the result in afterwards.

use crate::buffer::ProgramBuffer;
use crate::error::{FillError, SourceError, TranscodeError};
use crate::track::{TrackDescriptor, TrackSource};
use crate::transcoder::{OutputFormat, Transcoder};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Resolve + download + transcode for a single track.
#[derive(Clone)]
pub struct Filler {
    source: Arc<dyn TrackSource>,
    transcoder: Arc<dyn Transcoder>,
    format: OutputFormat,
}

impl Filler {
    pub fn new(
        source: Arc<dyn TrackSource>,
        transcoder: Arc<dyn Transcoder>,
        format: OutputFormat,
    ) -> Self {
        Self {
            source,
            transcoder,
            format,
        }
    }

    pub fn source(&self) -> &Arc<dyn TrackSource> {
        &self.source
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    /// Produce the program buffer of `track`.
    pub async fn fill(&self, track: &TrackDescriptor) -> Result<ProgramBuffer, FillError> {
        let started = Instant::now();

        let url = self
            .source
            .resolve_download_url(track)
            .await
            .map_err(|source| FillError::ResolveFailed {
                track: track.id.clone(),
                source,
            })?;
        debug!("Resolved {} to {}", track, url);

        let raw = self
            .source
            .download(&url)
            .await
            .map_err(|source| FillError::DownloadFailed {
                track: track.id.clone(),
                source,
            })?;
        if raw.is_empty() {
            return Err(FillError::DownloadFailed {
                track: track.id.clone(),
                source: SourceError::Empty(url),
            });
        }
        debug!("Downloaded {} bytes for {}", raw.len(), track);

        let encoded = self
            .transcoder
            .transcode(raw, &self.format)
            .await
            .map_err(|source| FillError::TranscodeFailed {
                track: track.id.clone(),
                source,
            })?;
        if encoded.is_empty() {
            return Err(FillError::TranscodeFailed {
                track: track.id.clone(),
                source: TranscodeError::EmptyOutput,
            });
        }

        debug!(
            "Filled {} with {} bytes in {} ms",
            track,
            encoded.len(),
            started.elapsed().as_millis()
        );
        Ok(ProgramBuffer::new(track.clone(), encoded))
    }
}
