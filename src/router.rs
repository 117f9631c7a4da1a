//! UART command router.
//!
//! Reads newline-delimited commands from the serial port, dispatches them to
//! the recorder and writes one JSON response line per command. The serial
//! transport is reopened with a backoff whenever it fails, so an unplugged
//! adapter degrades to retries instead of taking the service down.

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{Command, Response};
use crate::config::SerialSettings;
use crate::constants::SERIAL_RETRY_BACKOFF;
use crate::recorder::CameraHandle;
use crate::{CamError, CamResult};

/// Routes serial commands to the camera recorder.
pub struct CommandRouter {
    settings: SerialSettings,
    camera: CameraHandle,
    cancel: CancellationToken,
    port: Option<SerialStream>,
}

impl CommandRouter {
    pub fn new(settings: SerialSettings, camera: CameraHandle, cancel: CancellationToken) -> Self {
        Self {
            settings,
            camera,
            cancel,
            port: None,
        }
    }

    /// Open the serial port with the configured framing.
    pub fn initialize(&mut self) -> CamResult<()> {
        let port = open_port(&self.settings)?;
        info!(
            "Serial port {} open at {} baud",
            self.settings.port, self.settings.baud_rate
        );
        self.port = Some(port);
        Ok(())
    }

    /// Serve commands until cancelled. Transport errors close the port and
    /// retry after a backoff.
    pub async fn run(mut self) -> CamResult<()> {
        info!("Starting UART command router");

        loop {
            let port = match self.port.take() {
                Some(port) => port,
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(SERIAL_RETRY_BACKOFF) => {}
                    }
                    match open_port(&self.settings) {
                        Ok(port) => {
                            info!("Serial port {} reopened", self.settings.port);
                            port
                        }
                        Err(e) => {
                            warn!("Failed to reopen serial port: {e}");
                            continue;
                        }
                    }
                }
            };

            if self.serve(port).await {
                break;
            }
        }

        info!("UART command router stopped");
        Ok(())
    }

    /// Serve one connected port. Returns true when cancelled, false when the
    /// transport failed and a reopen is needed.
    async fn serve(&mut self, port: SerialStream) -> bool {
        let (reader, mut writer) = tokio::io::split(port);
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return true,
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("Received command line: {line}");
                    let response = self.dispatch_line(line).await;
                    if let Err(e) = send_response(&mut writer, &response).await {
                        warn!("Failed to write serial response: {e}");
                        return false;
                    }
                }
                Ok(None) => {
                    warn!("Serial port closed, reopening");
                    return false;
                }
                Err(e) => {
                    error!("Serial read error: {e}");
                    return false;
                }
            }
        }
    }

    /// Parse one line and dispatch it. Every line gets exactly one response.
    pub async fn dispatch_line(&self, line: &str) -> Response {
        match Command::parse(line) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => {
                warn!("Rejected command line: {e}");
                Response::error(e.to_string())
            }
        }
    }

    /// Execute a command against the recorder and build its response.
    /// Lifecycle commands wait for the recorder's outcome; property commands
    /// are acknowledged as soon as they are queued.
    pub async fn dispatch(&self, command: Command) -> Response {
        match command {
            Command::Ping => Response::pong(),
            Command::Status => {
                let status = self.camera.status();
                Response::status_report(
                    status.recording,
                    status
                        .filename
                        .map(|p| p.to_string_lossy().into_owned()),
                )
            }
            Command::Start => {
                let result = self.camera.start_recording().await;
                if let Err(e) = &result {
                    error!("Failed to start recording: {e}");
                }
                Response::lifecycle("start_recording", &result)
            }
            Command::Stop => {
                let result = self.camera.stop_recording().await;
                if let Err(e) = &result {
                    error!("Failed to stop recording: {e}");
                }
                Response::lifecycle("stop_recording", &result)
            }
            Command::Zoom(level) => {
                self.camera.enqueue_command(Command::Zoom(level)).await;
                Response::accepted("zoom", json!(level))
            }
            Command::Focus(value) => {
                self.camera.enqueue_command(Command::Focus(value)).await;
                Response::accepted("focus", json!(value))
            }
            Command::Brightness(value) => {
                self.camera
                    .enqueue_command(Command::Brightness(value))
                    .await;
                Response::accepted("brightness", json!(value))
            }
        }
    }
}

fn open_port(settings: &SerialSettings) -> CamResult<SerialStream> {
    tokio_serial::new(&settings.port, settings.baud_rate)
        .data_bits(settings.data_bits())
        .parity(settings.parity())
        .stop_bits(settings.stop_bits())
        .timeout(std::time::Duration::from_secs(settings.timeout))
        .open_native_async()
        .map_err(|e| CamError::SerialOpen {
            port: settings.port.clone(),
            reason: e.to_string(),
        })
}

/// Write one JSON response line to the serial port.
async fn send_response(
    writer: &mut WriteHalf<SerialStream>,
    response: &Response,
) -> CamResult<()> {
    let mut payload = serde_json::to_vec(response)?;
    debug!("Sending response: {}", String::from_utf8_lossy(&payload));
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::recorder::CameraRecorder;

    fn test_router() -> (CommandRouter, CameraRecorder) {
        let settings = Settings::default();
        let cancel = CancellationToken::new();
        let (recorder, handle) = CameraRecorder::new(settings.clone(), cancel.clone());
        let router = CommandRouter::new(settings.serial, handle, cancel);
        (router, recorder)
    }

    #[tokio::test]
    async fn test_ping_returns_pong() {
        let (router, _recorder) = test_router();
        let response = router.dispatch(Command::Ping).await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["message"], "pong");
    }

    #[tokio::test]
    async fn test_status_reports_idle_recorder() {
        let (router, _recorder) = test_router();
        let response = router.dispatch(Command::Status).await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["recording"], false);
        assert_eq!(value["filename"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_every_dispatch_line_produces_a_status_field() {
        let (router, _recorder) = test_router();
        for line in [
            "ping",
            "{\"type\": \"ping\"}",
            "{\"type\": \"zoom\", \"value\": 2.0}",
            "garbage here",
            "{\"bogus\": true}",
        ] {
            let response = router.dispatch_line(line).await;
            let value = serde_json::to_value(&response).unwrap();
            assert!(
                value["status"] == "ok" || value["status"] == "error",
                "no status for line {line:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_command_leaves_recorder_untouched() {
        let (router, _recorder) = test_router();
        let response = router.dispatch_line("{\"type\": \"reboot\"}").await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error");

        let status = router.camera.status();
        assert!(!status.recording);
        assert!(status.filename.is_none());
    }

    #[tokio::test]
    async fn test_zoom_is_acknowledged_with_value() {
        let (router, mut recorder) = test_router();
        let response = router.dispatch(Command::Zoom(1.5)).await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["command"], "zoom");
        assert_eq!(value["value"], 1.5);
        // The command must have landed on the recorder's queue unchanged.
        assert_eq!(recorder.try_next_command().await, Some(Command::Zoom(1.5)));
    }
}
