//! Program buffer: the transcoded bytes of the track on air
//!
//! The whole track is kept in memory and read sequentially, one chunk per
//! tick. Chunks are `Bytes` slices of the track buffer, so handing the same
//! chunk to many listeners only bumps a reference count.

use crate::track::TrackDescriptor;
use bytes::Bytes;

/// Sequential reader over one transcoded track.
#[derive(Debug, Clone, Default)]
pub struct ProgramBuffer {
    data: Bytes,
    position: usize,
    track: Option<TrackDescriptor>,
}

impl ProgramBuffer {
    pub fn new(track: TrackDescriptor, data: Bytes) -> Self {
        Self {
            data,
            position: 0,
            track: Some(track),
        }
    }

    /// Buffer holding nothing, reported as exhausted on first read
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read up to `max` bytes from the current position.
    ///
    /// Returns `None` once every byte has been handed out, including when the
    /// previous read ended exactly on the last byte. The last chunk of a track
    /// may be shorter than `max`.
    pub fn read_chunk(&mut self, max: usize) -> Option<Bytes> {
        if self.is_exhausted() || max == 0 {
            return None;
        }
        let end = (self.position + max).min(self.data.len());
        let chunk = self.data.slice(self.position..end);
        self.position = end;
        Some(chunk)
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Descriptor of the track this buffer was filled from
    pub fn track(&self) -> Option<&TrackDescriptor> {
        self.track.as_ref()
    }
}
