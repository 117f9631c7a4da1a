//! Camera recording state machine.
//!
//! The recorder is an actor owning the capture device, the recording session
//! and the encoder child process. Lifecycle operations arrive as requests with
//! oneshot reply channels; property adjustments arrive over a bounded command
//! queue and are applied best-effort. A shared status snapshot is written only
//! by this task and read by the command router for status queries.

use chrono::Local;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{
        CameraFormat, CameraIndex, ControlValueSetter, FrameFormat, KnownCameraControl,
        RequestedFormat, RequestedFormatType, Resolution,
    },
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::config::Settings;
use crate::constants::{
    CAPTURE_TICK, COMMAND_ENQUEUE_TIMEOUT, COMMAND_QUEUE_CAPACITY, CONTAINER_EXTENSION,
    RAW_EXTENSION,
};
use crate::encoder::{self, EncoderProcess, RemuxOutcome};
use crate::{CamError, CamResult};

/// Recording lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopping,
    Converting,
}

/// The active recording session. At most one exists at any time.
#[derive(Debug, Clone)]
struct RecordingSession {
    /// Tracked output file; retargeted to the container after conversion.
    path: PathBuf,
    started_at: chrono::DateTime<Local>,
}

/// Snapshot of recorder state exposed for status queries. Readers may see a
/// value that is stale by one loop iteration; only the recorder task writes.
#[derive(Debug, Clone, Default)]
pub struct RecorderStatus {
    pub recording: bool,
    pub filename: Option<PathBuf>,
}

/// Lifecycle requests handled synchronously by the recorder task.
#[derive(Debug)]
enum RecorderRequest {
    StartRecording {
        respond_to: oneshot::Sender<CamResult<()>>,
    },
    StopRecording {
        respond_to: oneshot::Sender<CamResult<()>>,
    },
}

/// Handle for communicating with the recorder task.
#[derive(Clone)]
pub struct CameraHandle {
    request_sender: mpsc::UnboundedSender<RecorderRequest>,
    command_sender: mpsc::Sender<Command>,
    status: Arc<Mutex<RecorderStatus>>,
}

impl CameraHandle {
    /// Start a recording session and wait for the outcome.
    pub async fn start_recording(&self) -> CamResult<()> {
        self.lifecycle(|respond_to| RecorderRequest::StartRecording { respond_to })
            .await
    }

    /// Stop the active recording session and wait for the outcome, including
    /// the container conversion.
    pub async fn stop_recording(&self) -> CamResult<()> {
        self.lifecycle(|respond_to| RecorderRequest::StopRecording { respond_to })
            .await
    }

    async fn lifecycle(
        &self,
        make: impl FnOnce(oneshot::Sender<CamResult<()>>) -> RecorderRequest,
    ) -> CamResult<()> {
        let (respond_to, response) = oneshot::channel();
        self.request_sender
            .send(make(respond_to))
            .map_err(|_| CamError::App("recorder is not running".to_string()))?;
        response
            .await
            .map_err(|_| CamError::App("recorder dropped the request".to_string()))?
    }

    /// Push a property command onto the bounded queue. Blocks briefly when
    /// the queue is full, then drops the command with a warning; delivery is
    /// best-effort by design.
    pub async fn enqueue_command(&self, command: Command) {
        match timeout(COMMAND_ENQUEUE_TIMEOUT, self.command_sender.send(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Command queue closed, dropping command: {e}"),
            Err(_) => warn!("Command queue full, dropping command"),
        }
    }

    /// Current recording status snapshot.
    pub fn status(&self) -> RecorderStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Camera recorder actor.
pub struct CameraRecorder {
    settings: Settings,
    cancel: CancellationToken,
    request_receiver: mpsc::UnboundedReceiver<RecorderRequest>,
    command_receiver: mpsc::Receiver<Command>,
    status: Arc<Mutex<RecorderStatus>>,
    state: RecordingState,
    session: Option<RecordingSession>,
    encoder: Option<EncoderProcess>,
    camera: Option<Camera>,
}

impl CameraRecorder {
    /// Create a recorder and its communication handle.
    pub fn new(settings: Settings, cancel: CancellationToken) -> (Self, CameraHandle) {
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (command_sender, command_receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let status = Arc::new(Mutex::new(RecorderStatus::default()));

        let recorder = Self {
            settings,
            cancel,
            request_receiver,
            command_receiver,
            status: status.clone(),
            state: RecordingState::Idle,
            session: None,
            encoder: None,
            camera: None,
        };

        let handle = CameraHandle {
            request_sender,
            command_sender,
            status,
        };

        (recorder, handle)
    }

    /// Verify the capture device. In hardware-encoder mode the capture is
    /// delegated to the encoder process, so only the device node existence is
    /// checked; in software mode the camera is opened and configured here.
    pub fn initialize(&mut self) -> CamResult<()> {
        if self.settings.use_hardware_encoder {
            let node = self.settings.device_node();
            if !node.exists() {
                return Err(CamError::DeviceNotFound(
                    node.to_string_lossy().into_owned(),
                ));
            }
            info!("USB camera detected at {node:?} (hardware encoding)");
            return Ok(());
        }

        let camera_settings = &self.settings.camera;
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(camera_settings.width, camera_settings.height),
                FrameFormat::MJPEG,
                camera_settings.fps,
            ),
        ));
        let mut camera = Camera::new(
            CameraIndex::Index(camera_settings.device_id),
            requested,
        )
        .map_err(|e| CamError::DeviceOpen(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CamError::DeviceOpen(e.to_string()))?;
        self.camera = Some(camera);
        info!("USB camera initialized (software encoding)");
        Ok(())
    }

    /// Run the capture loop until cancelled. Lifecycle requests and queued
    /// commands are served as they arrive; software mode additionally pumps
    /// one frame per tick.
    pub async fn run(mut self) -> CamResult<()> {
        info!("Starting camera recorder");
        let software_mode = !self.settings.use_hardware_encoder;
        let mut tick = interval(CAPTURE_TICK);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.shutdown().await;
                    break;
                }
                Some(request) = self.request_receiver.recv() => {
                    self.handle_request(request).await;
                }
                Some(command) = self.command_receiver.recv() => {
                    self.apply_command(command).await;
                }
                _ = tick.tick(), if software_mode => {
                    self.pump_frame().await;
                }
            }
        }

        info!("Camera recorder stopped");
        Ok(())
    }

    async fn handle_request(&mut self, request: RecorderRequest) {
        match request {
            RecorderRequest::StartRecording { respond_to } => {
                let result = self.start_recording().await;
                if respond_to.send(result).is_err() {
                    warn!("Failed to send start-recording response (receiver dropped)");
                }
            }
            RecorderRequest::StopRecording { respond_to } => {
                let result = self.stop_recording().await;
                if respond_to.send(result).is_err() {
                    warn!("Failed to send stop-recording response (receiver dropped)");
                }
            }
        }
    }

    /// Apply one queued command. Property commands only take effect on the
    /// software capture path; unknown commands are logged and dropped.
    async fn apply_command(&mut self, command: Command) {
        let result = match command {
            Command::Zoom(level) => {
                self.set_control(KnownCameraControl::Zoom, ControlValueSetter::Float(level))
            }
            Command::Focus(value) => {
                self.set_control(KnownCameraControl::Focus, ControlValueSetter::Integer(value))
            }
            Command::Brightness(value) => self.set_control(
                KnownCameraControl::Brightness,
                ControlValueSetter::Integer(value),
            ),
            Command::Start => self.start_recording().await,
            Command::Stop => self.stop_recording().await,
            other => {
                warn!("Dropping unexpected queued command: {other:?}");
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Failed to apply camera command: {e}");
        }
    }

    fn set_control(
        &mut self,
        control: KnownCameraControl,
        value: ControlValueSetter,
    ) -> CamResult<()> {
        let Some(camera) = self.camera.as_mut() else {
            warn!("Ignoring {control:?} adjustment: not supported in hardware-encoder mode");
            return Ok(());
        };
        camera
            .set_camera_control(control, value.clone())
            .map_err(|e| CamError::CommandDispatch(e.to_string()))?;
        info!("Set {control:?} to {value:?}");
        Ok(())
    }

    /// Start a new recording session.
    async fn start_recording(&mut self) -> CamResult<()> {
        if self.state != RecordingState::Idle {
            warn!("Start requested while {:?}", self.state);
            return Err(CamError::AlreadyRecording);
        }

        let video_dir = &self.settings.storage.video_path;
        fs::create_dir_all(video_dir)?;

        let path = video_dir.join(session_filename(Local::now()));
        let encoder = if self.settings.use_hardware_encoder {
            EncoderProcess::spawn_capture(&self.settings, &path)?
        } else {
            EncoderProcess::spawn_pipe(&self.settings, &path)?
        };

        self.encoder = Some(encoder);
        self.session = Some(RecordingSession {
            path: path.clone(),
            started_at: Local::now(),
        });
        self.state = RecordingState::Recording;
        self.publish_status(true, Some(path.clone()));
        info!("Recording started: {path:?}");
        Ok(())
    }

    /// Stop the active session: shut the encoder down with escalating
    /// timeouts, then convert the elementary stream into a container.
    async fn stop_recording(&mut self) -> CamResult<()> {
        if self.state != RecordingState::Recording {
            return Err(CamError::NotRecording);
        }
        self.state = RecordingState::Stopping;

        if let Some(encoder) = self.encoder.take() {
            let outcome = encoder.stop().await;
            info!("Encoder stopped: {outcome:?}");
        }

        let Some(session) = self.session.take() else {
            // Session bookkeeping can only desync through a bug; recover to Idle.
            error!("Recording stopped with no active session");
            self.state = RecordingState::Idle;
            self.publish_status(false, None);
            return Ok(());
        };

        let elapsed = Local::now() - session.started_at;
        info!(
            "Recording finished after {}s: {:?}",
            elapsed.num_seconds(),
            session.path
        );

        let tracked = if session.path.extension().is_some_and(|e| e == RAW_EXTENSION) {
            self.state = RecordingState::Converting;
            self.convert_session(&session.path).await
        } else {
            session.path.clone()
        };

        self.state = RecordingState::Idle;
        self.publish_status(false, Some(tracked));
        Ok(())
    }

    /// Remux the raw stream and return the path the session should track
    /// afterwards. Conversion failure keeps the raw file and is non-fatal.
    async fn convert_session(&mut self, raw: &Path) -> PathBuf {
        let container = raw.with_extension(CONTAINER_EXTENSION);
        let outcome = encoder::remux_to_mp4(raw, &container).await;
        finish_conversion(raw, &container, &outcome)
    }

    fn publish_status(&self, recording: bool, filename: Option<PathBuf>) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.recording = recording;
        status.filename = filename;
    }

    /// Read one frame and, while recording, feed it to the pipe encoder.
    /// Every failure is logged and retried on the next tick.
    async fn pump_frame(&mut self) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };

        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to capture frame: {e}");
                return;
            }
        };

        if self.state != RecordingState::Recording {
            return;
        }

        let image = match frame.decode_image::<RgbFormat>() {
            Ok(image) => image,
            Err(e) => {
                warn!("Failed to decode frame: {e}");
                return;
            }
        };

        if let Some(encoder) = self.encoder.as_mut() {
            if let Err(e) = encoder.write_frame(image.as_raw()).await {
                error!("Failed to write frame: {e}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn try_next_command(&mut self) -> Option<Command> {
        self.command_receiver.recv().await
    }

    /// Cooperative shutdown: stop any active recording and release the device.
    async fn shutdown(&mut self) {
        debug!("Cleaning up camera resources");
        if self.state == RecordingState::Recording {
            if let Err(e) = self.stop_recording().await {
                error!("Failed to stop recording during shutdown: {e}");
            }
        }
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                warn!("Failed to stop camera stream: {e}");
            }
        }
    }
}

/// Timestamped session filename for the raw elementary stream.
fn session_filename(now: chrono::DateTime<Local>) -> String {
    format!("video_{}.{}", now.format("%Y%m%d_%H%M%S"), RAW_EXTENSION)
}

/// Bookkeeping after a conversion attempt: on success the raw file is removed
/// and the container becomes the tracked file; otherwise the raw file stays
/// tracked and in place.
fn finish_conversion(raw: &Path, container: &Path, outcome: &RemuxOutcome) -> PathBuf {
    match outcome {
        RemuxOutcome::Converted => {
            if let Err(e) = fs::remove_file(raw) {
                warn!("Failed to remove raw stream {raw:?}: {e}");
            }
            info!("Converted to MP4: {container:?}");
            container.to_path_buf()
        }
        RemuxOutcome::Failed(reason) => {
            warn!("Conversion failed, keeping raw stream {raw:?}: {reason}");
            raw.to_path_buf()
        }
        RemuxOutcome::TimedOut => {
            warn!("Conversion timed out, keeping raw stream {raw:?}");
            raw.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_recorder() -> (CameraRecorder, CameraHandle) {
        let mut settings = Settings::default();
        settings.camera.device_id = 99;
        settings.storage.video_path = std::env::temp_dir().join("uartcam-test-videos");
        CameraRecorder::new(settings, CancellationToken::new())
    }

    #[test]
    fn test_session_filename_pattern() {
        let now = Local::now();
        let name = session_filename(now);
        assert!(name.starts_with("video_"));
        assert!(name.ends_with(".h264"));
        // video_YYYYMMDD_HHMMSS.h264
        assert_eq!(name.len(), "video_".len() + 8 + 1 + 6 + ".h264".len());
        let stamp = &name["video_".len()..name.len() - ".h264".len()];
        assert!(
            stamp
                .chars()
                .all(|c| c.is_ascii_digit() || c == '_')
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (mut recorder, _handle) = test_recorder();
        recorder.state = RecordingState::Recording;
        assert!(matches!(
            recorder.start_recording().await,
            Err(CamError::AlreadyRecording)
        ));
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_rejected() {
        let (mut recorder, _handle) = test_recorder();
        assert!(matches!(
            recorder.stop_recording().await,
            Err(CamError::NotRecording)
        ));
        // State must be left untouched by the failed stop.
        assert_eq!(recorder.state, RecordingState::Idle);
    }

    #[test]
    fn test_status_defaults() {
        let (_recorder, handle) = test_recorder();
        let status = handle.status();
        assert!(!status.recording);
        assert!(status.filename.is_none());
    }

    #[test]
    fn test_publish_status_visible_through_handle() {
        let (recorder, handle) = test_recorder();
        recorder.publish_status(true, Some(PathBuf::from("/tmp/video_x.h264")));
        let status = handle.status();
        assert!(status.recording);
        assert_eq!(status.filename, Some(PathBuf::from("/tmp/video_x.h264")));
    }

    #[tokio::test]
    async fn test_queue_preserves_submission_order() {
        let (mut recorder, handle) = test_recorder();
        handle.enqueue_command(Command::Zoom(1.5)).await;
        handle.enqueue_command(Command::Focus(7)).await;
        handle.enqueue_command(Command::Brightness(200)).await;

        assert_eq!(
            recorder.command_receiver.recv().await,
            Some(Command::Zoom(1.5))
        );
        assert_eq!(
            recorder.command_receiver.recv().await,
            Some(Command::Focus(7))
        );
        assert_eq!(
            recorder.command_receiver.recv().await,
            Some(Command::Brightness(200))
        );
    }

    #[test]
    fn test_finish_conversion_success_removes_raw() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("video_20240101_120000.h264");
        let container = dir.path().join("video_20240101_120000.mp4");
        std::fs::write(&raw, b"raw").unwrap();
        std::fs::write(&container, b"mp4").unwrap();

        let tracked = finish_conversion(&raw, &container, &RemuxOutcome::Converted);
        assert_eq!(tracked, container);
        assert!(!raw.exists());
        assert!(container.exists());
    }

    #[test]
    fn test_finish_conversion_failure_keeps_raw() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("video_20240101_120000.h264");
        let container = dir.path().join("video_20240101_120000.mp4");
        std::fs::write(&raw, b"raw").unwrap();

        let failed = finish_conversion(
            &raw,
            &container,
            &RemuxOutcome::Failed("exit 1".to_string()),
        );
        assert_eq!(failed, raw);
        assert!(raw.exists());

        let timed_out = finish_conversion(&raw, &container, &RemuxOutcome::TimedOut);
        assert_eq!(timed_out, raw);
        assert!(raw.exists());
    }
}
