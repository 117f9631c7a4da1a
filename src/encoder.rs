//! External encoder process lifecycle.
//!
//! Both recording paths run ffmpeg as a child process: the hardware path
//! captures straight from the V4L2 device node with the h264_v4l2m2m encoder,
//! the software path accepts raw RGB frames on stdin and encodes with libx264.
//! Either way the output is a raw H.264 elementary stream that is remuxed into
//! an .mp4 container after the recording stops. Teardown always escalates
//! through bounded timeouts so a hung child can never stall shutdown.

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::constants::{ENCODER_KILL_TIMEOUT, ENCODER_QUIT_TIMEOUT, REMUX_TIMEOUT};
use crate::{CamError, CamResult};

/// How the encoder child was started and therefore how it is quit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderMode {
    /// ffmpeg captures from the device node itself; quit with `q` on stdin.
    HardwareCapture,
    /// ffmpeg reads raw frames from stdin; quit by closing the pipe.
    RawVideoPipe,
}

/// Terminal state of a stopped encoder process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited on its own within the grace period.
    Exited(Option<i32>),
    /// Ignored the graceful quit and was force-terminated.
    Killed,
    /// Survived even the forced termination window.
    TimedOut,
}

/// Result of the post-recording container remux.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemuxOutcome {
    Converted,
    Failed(String),
    TimedOut,
}

/// Fixed argument template for the hardware capture process.
pub fn capture_args(settings: &Settings, output: &Path) -> Vec<String> {
    let camera = &settings.camera;
    vec![
        "-f".into(),
        "v4l2".into(),
        "-input_format".into(),
        "mjpeg".into(),
        "-video_size".into(),
        format!("{}x{}", camera.width, camera.height),
        "-framerate".into(),
        camera.fps.to_string(),
        "-i".into(),
        settings.device_node().to_string_lossy().into_owned(),
        "-c:v".into(),
        "h264_v4l2m2m".into(),
        "-b:v".into(),
        settings.bitrate.clone(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-g".into(),
        (camera.fps * 2).to_string(),
        "-f".into(),
        "h264".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Argument template for the software pipe encoder fed raw RGB frames.
pub fn pipe_args(settings: &Settings, output: &Path) -> Vec<String> {
    let camera = &settings.camera;
    vec![
        "-f".into(),
        "rawvideo".into(),
        "-pixel_format".into(),
        "rgb24".into(),
        "-video_size".into(),
        format!("{}x{}", camera.width, camera.height),
        "-framerate".into(),
        camera.fps.to_string(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        "libx264".into(),
        "-b:v".into(),
        settings.bitrate.clone(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-g".into(),
        (camera.fps * 2).to_string(),
        "-f".into(),
        "h264".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Argument template for the stream-copy remux into a fast-start container.
pub fn remux_args(src: &Path, dst: &Path) -> Vec<String> {
    vec![
        "-i".into(),
        src.to_string_lossy().into_owned(),
        "-c:v".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        "-y".into(),
        dst.to_string_lossy().into_owned(),
    ]
}

/// Handle to a running encoder child process.
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    mode: EncoderMode,
}

impl EncoderProcess {
    /// Spawn the hardware capture process writing to `output`.
    pub fn spawn_capture(settings: &Settings, output: &Path) -> CamResult<Self> {
        let args = capture_args(settings, output);
        debug!("Starting hardware encoder: ffmpeg {}", args.join(" "));
        Self::spawn(args, EncoderMode::HardwareCapture)
            .map_err(|e| CamError::EncoderSpawn(e.to_string()))
    }

    /// Spawn the software pipe encoder writing to `output`.
    pub fn spawn_pipe(settings: &Settings, output: &Path) -> CamResult<Self> {
        let args = pipe_args(settings, output);
        debug!("Starting software encoder: ffmpeg {}", args.join(" "));
        Self::spawn(args, EncoderMode::RawVideoPipe)
            .map_err(|e| CamError::WriterOpen(e.to_string()))
    }

    fn spawn(args: Vec<String>, mode: EncoderMode) -> std::io::Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child.stdin.take();
        Ok(Self { child, stdin, mode })
    }

    /// Write one raw frame to the pipe encoder. Only valid in pipe mode.
    pub async fn write_frame(&mut self, frame: &[u8]) -> CamResult<()> {
        debug_assert_eq!(self.mode, EncoderMode::RawVideoPipe);
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CamError::App("encoder stdin already closed".to_string()))?;
        stdin.write_all(frame).await?;
        Ok(())
    }

    /// Stop the encoder: request a graceful quit, wait up to 5s, then
    /// force-terminate and wait up to 2s more. Always returns within the
    /// combined grace periods.
    pub async fn stop(mut self) -> ProcessOutcome {
        match self.mode {
            EncoderMode::HardwareCapture => {
                if let Some(mut stdin) = self.stdin.take() {
                    if let Err(e) = stdin.write_all(b"q").await {
                        warn!("Failed to send quit to encoder: {e}");
                    }
                    if let Err(e) = stdin.flush().await {
                        warn!("Failed to flush encoder stdin: {e}");
                    }
                    // Closing stdin here also covers an encoder that only
                    // notices EOF.
                    drop(stdin);
                }
            }
            EncoderMode::RawVideoPipe => {
                // EOF on the frame pipe is the quit signal.
                drop(self.stdin.take());
            }
        }

        match timeout(ENCODER_QUIT_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Encoder exited with {status}");
                return ProcessOutcome::Exited(status.code());
            }
            Ok(Err(e)) => {
                warn!("Failed waiting for encoder: {e}");
                return ProcessOutcome::Exited(None);
            }
            Err(_) => {
                warn!("Encoder ignored quit request, force-terminating");
            }
        }

        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill encoder: {e}");
        }
        match timeout(ENCODER_KILL_TIMEOUT, self.child.wait()).await {
            Ok(_) => ProcessOutcome::Killed,
            Err(_) => {
                warn!("Encoder still running after kill, giving up on reaping it");
                ProcessOutcome::TimedOut
            }
        }
    }
}

/// Remux a raw elementary stream into a fast-start .mp4 without re-encoding.
/// Bounded by a 30s timeout; the child is killed if it overruns.
pub async fn remux_to_mp4(src: &Path, dst: &Path) -> RemuxOutcome {
    let args = remux_args(src, dst);
    debug!("Remuxing: ffmpeg {}", args.join(" "));

    let mut child = match Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return RemuxOutcome::Failed(format!("failed to spawn remux: {e}")),
    };

    match timeout(REMUX_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => RemuxOutcome::Converted,
        Ok(Ok(status)) => RemuxOutcome::Failed(format!("remux exited with {status}")),
        Ok(Err(e)) => RemuxOutcome::Failed(format!("failed waiting for remux: {e}")),
        Err(_) => {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill remux process: {e}");
            }
            RemuxOutcome::TimedOut
        }
    }
}
