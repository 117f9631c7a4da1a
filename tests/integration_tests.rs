//! Integration tests for the uartcam command path.
//!
//! These exercise the recorder handle and command router together without a
//! camera or serial adapter attached, which is exactly the degraded state the
//! service must survive in the field.

use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use uartcam::command::Command;
use uartcam::config::Settings;
use uartcam::recorder::CameraRecorder;
use uartcam::router::CommandRouter;

/// Test configuration for integration tests
fn create_test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.camera.device_id = 99;
    settings.storage.video_path = std::env::temp_dir().join("uartcam-test");
    settings.serial.port = "/dev/ttyTEST0".to_string();
    settings.use_hardware_encoder = false;
    settings
}

fn create_test_router() -> (CommandRouter, CameraRecorder, CancellationToken) {
    let settings = create_test_settings();
    let cancel = CancellationToken::new();
    let (recorder, handle) = CameraRecorder::new(settings.clone(), cancel.clone());
    let router = CommandRouter::new(settings.serial, handle, cancel.clone());
    (router, recorder, cancel)
}

#[tokio::test]
async fn test_ping_round_trip_through_router() {
    let (router, _recorder, _cancel) = create_test_router();

    let response = router.dispatch(Command::Ping).await;
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["message"], "pong");
}

#[tokio::test]
async fn test_status_before_any_recording() {
    let (router, _recorder, _cancel) = create_test_router();

    let response = router.dispatch(Command::Status).await;
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["recording"], false);
    // The filename key must be present and explicitly null before the first
    // recording, so UART clients can parse a fixed shape.
    assert!(value.as_object().unwrap().contains_key("filename"));
    assert_eq!(value["filename"], Value::Null);
}

#[tokio::test]
async fn test_property_commands_are_acknowledged_with_values() {
    let (router, _recorder, _cancel) = create_test_router();

    let response = router.dispatch(Command::Zoom(1.5)).await;
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["command"], "zoom");
    assert_eq!(value["value"], 1.5);

    let response = router.dispatch(Command::Brightness(180)).await;
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["command"], "brightness");
    assert_eq!(value["value"], 180);

    let response = router.dispatch(Command::Focus(3)).await;
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["command"], "focus");
    assert_eq!(value["value"], 3);
}

#[tokio::test]
async fn test_stop_without_recording_reports_error() {
    let (router, recorder, cancel) = create_test_router();
    let task = tokio::spawn(recorder.run());

    let response = timeout(Duration::from_secs(5), router.dispatch(Command::Stop))
        .await
        .expect("dispatch should not hang");
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["command"], "stop_recording");

    cancel.cancel();
    let _ = timeout(Duration::from_secs(5), task).await;
}

#[tokio::test]
async fn test_recorder_run_loop_shuts_down_on_cancellation() {
    let (_router, recorder, cancel) = create_test_router();
    let task = tokio::spawn(recorder.run());

    cancel.cancel();
    let joined = timeout(Duration::from_secs(5), task)
        .await
        .expect("recorder should stop promptly after cancellation");
    let run_result = tokio_test::assert_ok!(joined);
    tokio_test::assert_ok!(run_result);
}

#[tokio::test]
async fn test_malformed_lines_always_get_an_error_response() {
    let (router, _recorder, _cancel) = create_test_router();

    for line in ["{\"type\": \"warp\"}", "not json at all", "{\"value\": 1}"] {
        let response = router.dispatch_line(line).await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error", "line {line:?} should be rejected");
    }
}
