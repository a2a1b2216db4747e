//! Single-frame extraction through an external process

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::MediaConfig;

/// Why a frame could not be extracted
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The process did not finish in time and was killed
    #[error("frame extraction timed out after {0:?}")]
    Timeout(Duration),

    /// The process exited unsuccessfully (`None` when killed by a signal)
    #[error("frame extractor exited with status {0:?}")]
    NonZeroExit(Option<i32>),

    /// The extractor binary is not installed
    #[error("frame extractor not found: {0}")]
    MissingBinary(String),

    /// Spawning or waiting failed for another reason
    #[error("frame extraction I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Writes one still image taken from a video
#[async_trait]
pub trait FrameExtractor: Send + Sync + 'static {
    /// Extract a frame from `source` into `dest`
    async fn extract(&self, source: &Path, dest: &Path) -> Result<(), ExtractError>;
}

/// `ffmpeg` based extractor
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    program: String,
    seek_seconds: u32,
    quality: u8,
    timeout: Duration,
}

impl FfmpegExtractor {
    /// Create an extractor
    #[must_use]
    pub fn new(program: impl Into<String>, seek_seconds: u32, quality: u8, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            seek_seconds,
            quality,
            timeout,
        }
    }

    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            config.ffmpeg.clone(),
            config.seek_seconds,
            config.quality,
            config.extract_timeout,
        )
    }

    fn args(&self, source: &Path, dest: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec!["-y".into(), "-ss".into()];
        args.push(self.seek_seconds.to_string().into());
        args.push("-i".into());
        args.push(source.as_os_str().to_owned());
        args.extend(["-frames:v".into(), "1".into(), "-q:v".into()]);
        args.push(self.quality.to_string().into());
        args.extend(["-vf".into(), "scale=320:-1".into()]);
        args.push(dest.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract(&self, source: &Path, dest: &Path) -> Result<(), ExtractError> {
        let child = Command::new(&self.program)
            .args(self.args(source, dest))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ExtractError::MissingBinary(self.program.clone()),
                _ => ExtractError::Io(e),
            })?;

        // Dropping the wait future on timeout kills the child
        let status = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractError::Timeout(self.timeout))??
            .status;

        if !status.success() {
            return Err(ExtractError::NonZeroExit(status.code()));
        }

        debug!(source = %source.display(), "Extracted frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_take_one_frame_at_the_seek_offset() {
        let extractor = FfmpegExtractor::new("ffmpeg", 3, 5, Duration::from_secs(20));
        let args: Vec<String> = extractor
            .args(Path::new("/srv/a.mp4"), Path::new("/tmp/x.jpg"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-y", "-ss", "3", "-i", "/srv/a.mp4", "-frames:v", "1", "-q:v", "5", "-vf",
                "scale=320:-1", "/tmp/x.jpg"
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let extractor = FfmpegExtractor::new(
            "pincerna-no-such-binary",
            3,
            5,
            Duration::from_secs(1),
        );
        let err = extractor
            .extract(Path::new("/nonexistent.mp4"), Path::new("/tmp/none.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::MissingBinary(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let extractor = FfmpegExtractor::new("false", 3, 5, Duration::from_secs(5));
        let err = extractor
            .extract(Path::new("/nonexistent.mp4"), Path::new("/tmp/none.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NonZeroExit(Some(1))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_process_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hang.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let extractor = FfmpegExtractor::new(
            script.to_string_lossy(),
            3,
            5,
            Duration::from_millis(200),
        );
        let err = extractor
            .extract(Path::new("/nonexistent.mp4"), &dir.path().join("x.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timeout(_)));
    }
}
