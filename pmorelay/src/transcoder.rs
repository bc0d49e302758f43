//! Transcoding to the broadcast format
//!
//! The hub only needs "raw bytes in, constant-bitrate stream out". The
//! [`Transcoder`] trait captures that; [`FfmpegTranscoder`] implements it by
//! piping the track through an external `ffmpeg` process.

use crate::error::TranscodeError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

/// Default broadcast bitrate (kbps)
pub const DEFAULT_BITRATE_KBPS: u32 = 128;

/// Target format of the broadcast stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    /// Encoder name (ffmpeg `-c:a`)
    pub codec: String,
    /// Container name (ffmpeg `-f`)
    pub container: String,
    /// Constant bitrate in kbps
    pub bitrate_kbps: u32,
    /// Output sample rate, `None` keeps the source rate
    pub sample_rate: Option<u32>,
    /// Drop tags and embedded artwork
    pub strip_metadata: bool,
    /// MIME type announced to listeners
    pub mime_type: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::mp3(DEFAULT_BITRATE_KBPS)
    }
}

impl OutputFormat {
    /// Constant-bitrate MP3 without metadata
    pub fn mp3(bitrate_kbps: u32) -> Self {
        Self {
            codec: "libmp3lame".to_string(),
            container: "mp3".to_string(),
            bitrate_kbps,
            sample_rate: None,
            strip_metadata: true,
            mime_type: "audio/mpeg".to_string(),
        }
    }

    /// Bytes produced per second of audio
    pub fn bytes_per_second(&self) -> usize {
        self.bitrate_kbps as usize * 1000 / 8
    }
}

/// Converts raw audio into the broadcast format.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: Bytes, format: &OutputFormat) -> Result<Bytes, TranscodeError>;
}

/// Transcoder backed by an `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    /// Command line used to encode stdin to stdout
    pub fn args(format: &OutputFormat) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-i".into(), "pipe:0".into()];
        if format.strip_metadata {
            args.extend(["-map_metadata".into(), "-1".into()]);
        }
        // audio only, album art is a video stream for ffmpeg
        args.push("-vn".into());
        args.extend(["-c:a".into(), format.codec.clone()]);
        args.extend(["-vsync".into(), "2".into()]);
        args.extend(["-b:a".into(), format!("{}k", format.bitrate_kbps)]);
        if let Some(rate) = format.sample_rate {
            args.extend(["-ar".into(), rate.to_string()]);
        }
        args.extend(["-f".into(), format.container.clone(), "pipe:1".into()]);
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: Bytes, format: &OutputFormat) -> Result<Bytes, TranscodeError> {
        let args = Self::args(format);
        trace!("Spawning {} {}", self.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            TranscodeError::Input(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transcoder stdin not captured",
            ))
        })?;

        // Feed stdin concurrently: ffmpeg starts writing before it has read
        // everything and would block on a full stdout pipe otherwise.
        let input_len = input.len();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(TranscodeError::Output)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("ffmpeg stderr: {}", stderr);
            return Err(TranscodeError::Exit {
                status: output.status.to_string(),
                stderr: stderr.lines().last().unwrap_or_default().to_string(),
            });
        }

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TranscodeError::Input(e)),
            Err(e) => return Err(TranscodeError::Input(io::Error::other(e))),
        }

        if output.stdout.is_empty() {
            return Err(TranscodeError::EmptyOutput);
        }

        debug!(
            "Transcoded {} bytes into {} bytes ({} kbps {})",
            input_len,
            output.stdout.len(),
            format.bitrate_kbps,
            format.container
        );
        Ok(Bytes::from(output.stdout))
    }
}
