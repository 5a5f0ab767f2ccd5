use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::WorkerConfig;
use crate::error::ProcessingError;

/// Playlist written into the derived directory.
pub const MANIFEST_NAME: &str = "index.m3u8";
/// Transcoder output kept next to the segments when a job fails.
pub const DIAGNOSTICS_FILE: &str = "transcode.log";

#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub manifest: PathBuf,
    /// Combined stdout and stderr.
    pub log: String,
}

/// Turns a stored original into streamable output.
///
/// Implementations write everything under `output_dir`, which already exists.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        source: &Path,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, ProcessingError>;
}

/// Runs ffmpeg to produce an HLS rendition capped at 1080p width.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: OsString,
    /// Arguments placed before the ffmpeg arguments, e.g. when the program is
    /// a wrapper such as `nice`.
    leading_args: Vec<OsString>,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            &config.ffmpeg_bin,
            Duration::from_secs(config.job_timeout_secs),
        )
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// H.264/AAC, 10 second segments, every segment kept in the playlist.
    pub fn hls_args(source: &Path, output_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-nostdin",
            "-y",
            "-i",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(source.into());
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-vf",
                "scale='min(1920,iw)':-2",
                "-crf",
                "23",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-start_number",
                "0",
                "-hls_time",
                "10",
                "-hls_list_size",
                "0",
                "-hls_segment_filename",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output_dir.join("index%d.ts").into());
        args.push("-f".into());
        args.push("hls".into());
        args.push(output_dir.join(MANIFEST_NAME).into());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, ProcessingError> {
        let manifest = output_dir.join(MANIFEST_NAME);

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(Self::hls_args(source, output_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(source = %source.display(), "Starting transcoder");

        // Dropping the future on timeout kills the child.
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => return Err(ProcessingError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(ProcessingError::Spawn(e)),
            Ok(Ok(output)) => output,
        };

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ProcessingError::ExitStatus {
                code: output.status.code(),
                output: log,
            });
        }

        if !tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
            return Err(ProcessingError::MissingManifest { output: log });
        }

        Ok(TranscodeOutput { manifest, log })
    }
}
