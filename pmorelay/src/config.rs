//! Typed relay configuration.
//!
//! Mirrors the `relay` section of the YAML configuration. Every field has a
//! default so a partial section (or none at all) deserializes cleanly.

use crate::error::{Error, Result};
use crate::transcoder::{OutputFormat, DEFAULT_BITRATE_KBPS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level `relay` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Playlist location handed to the track source
    #[serde(default)]
    pub playlist_source: String,
    /// Bytes broadcast per tick
    #[serde(default = "RelayConfig::default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "RelayConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Capacity of each listener conduit, in chunks
    #[serde(default = "RelayConfig::default_consumer_buffer")]
    pub consumer_buffer: usize,
    /// Wait on a full conduit before evicting, shorter than a tick
    #[serde(default = "RelayConfig::default_consumer_send_timeout_ms")]
    pub consumer_send_timeout_ms: u64,
    /// Failed fills in a row before degrading, `0` means the playlist length
    #[serde(default)]
    pub max_consecutive_failures: usize,
    /// Delay between recovery attempts once degraded, `0` disables them
    #[serde(default = "RelayConfig::default_degraded_retry_secs")]
    pub degraded_retry_secs: u64,
    #[serde(default = "RelayConfig::default_shuffle")]
    pub shuffle: bool,
    /// Fixed shuffle seed, time-derived when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_seed: Option<u64>,
    /// Announced through the `icy-name` header
    #[serde(default = "RelayConfig::default_stream_name")]
    pub stream_name: String,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
}

impl RelayConfig {
    const fn default_chunk_size() -> usize {
        16_000
    }

    const fn default_tick_interval_ms() -> u64 {
        1_000
    }

    const fn default_consumer_buffer() -> usize {
        4
    }

    const fn default_consumer_send_timeout_ms() -> u64 {
        500
    }

    const fn default_degraded_retry_secs() -> u64 {
        60
    }

    const fn default_shuffle() -> bool {
        true
    }

    fn default_stream_name() -> String {
        "PMORelay".to_string()
    }

    /// Config for `playlist_source` with every other value at its default
    pub fn for_playlist(playlist_source: impl Into<String>) -> Self {
        Self {
            playlist_source: playlist_source.into(),
            ..Self::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn consumer_send_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer_send_timeout_ms)
    }

    pub fn degraded_retry_interval(&self) -> Option<Duration> {
        (self.degraded_retry_secs > 0).then(|| Duration::from_secs(self.degraded_retry_secs))
    }

    /// Consecutive failures tolerated for a playlist of `playlist_len` tracks
    pub fn failure_budget(&self, playlist_len: usize) -> usize {
        let budget = if self.max_consecutive_failures == 0 {
            playlist_len
        } else {
            self.max_consecutive_failures
        };
        budget.max(1)
    }

    pub fn output_format(&self) -> OutputFormat {
        let mut format = OutputFormat::mp3(self.transcoder.bitrate_kbps);
        format.sample_rate = self.transcoder.sample_rate;
        format
    }

    /// Reject values the hub cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.playlist_source.trim().is_empty() {
            return Err(Error::Config("relay.playlist_source is not set".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("relay.chunk_size must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("relay.tick_interval_ms must be positive".into()));
        }
        if self.consumer_send_timeout_ms >= self.tick_interval_ms {
            return Err(Error::Config(format!(
                "relay.consumer_send_timeout_ms ({}) must be shorter than relay.tick_interval_ms ({})",
                self.consumer_send_timeout_ms, self.tick_interval_ms
            )));
        }
        if self.consumer_buffer == 0 {
            return Err(Error::Config("relay.consumer_buffer must be positive".into()));
        }
        if self.transcoder.bitrate_kbps == 0 {
            return Err(Error::Config(
                "relay.transcoder.bitrate_kbps must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            playlist_source: String::new(),
            chunk_size: Self::default_chunk_size(),
            tick_interval_ms: Self::default_tick_interval_ms(),
            consumer_buffer: Self::default_consumer_buffer(),
            consumer_send_timeout_ms: Self::default_consumer_send_timeout_ms(),
            max_consecutive_failures: 0,
            degraded_retry_secs: Self::default_degraded_retry_secs(),
            shuffle: Self::default_shuffle(),
            shuffle_seed: None,
            stream_name: Self::default_stream_name(),
            transcoder: TranscoderConfig::default(),
        }
    }
}

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscoderConfig {
    #[serde(default = "TranscoderConfig::default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "TranscoderConfig::default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

impl TranscoderConfig {
    fn default_ffmpeg_path() -> String {
        "ffmpeg".to_string()
    }

    const fn default_bitrate_kbps() -> u32 {
        DEFAULT_BITRATE_KBPS
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: Self::default_ffmpeg_path(),
            bitrate_kbps: Self::default_bitrate_kbps(),
            sample_rate: None,
        }
    }
}
