//! Configuration management for the uartcam service.
//!
//! Settings are loaded once at startup from a JSON file with environment
//! variable overrides. A missing or unparseable file is never fatal; the
//! built-in defaults are used instead.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default location of the config file on the target device.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/uartcam/config.json";

/// Capture device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// V4L2 device index (`/dev/video<N>`)
    pub device_id: u32,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Capture frame rate
    pub fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device_id: 0,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Recording storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory recordings are written to (created recursively if absent)
    pub video_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            video_path: PathBuf::from("/home/pi/videos"),
        }
    }
}

/// UART link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Serial device path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character (5-8)
    pub byte_size: u8,
    /// Parity: "N", "E" or "O"
    pub parity: String,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Per-call read timeout in seconds
    pub timeout: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/serial0".to_string(),
            baud_rate: 115200,
            byte_size: 8,
            parity: "N".to_string(),
            stop_bits: 1,
            timeout: 1,
        }
    }
}

impl SerialSettings {
    /// Map the configured byte size to the serial driver type, falling back
    /// to 8 data bits for out-of-range values.
    pub fn data_bits(&self) -> tokio_serial::DataBits {
        match self.byte_size {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                warn!("Unsupported byte size {other}, using 8 data bits");
                tokio_serial::DataBits::Eight
            }
        }
    }

    /// Map the configured parity character, falling back to no parity.
    pub fn parity(&self) -> tokio_serial::Parity {
        match self.parity.to_ascii_uppercase().as_str() {
            "N" => tokio_serial::Parity::None,
            "E" => tokio_serial::Parity::Even,
            "O" => tokio_serial::Parity::Odd,
            other => {
                warn!("Unsupported parity {other:?}, using none");
                tokio_serial::Parity::None
            }
        }
    }

    /// Map the configured stop bits, falling back to one.
    pub fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => {
                warn!("Unsupported stop bits {other}, using 1");
                tokio_serial::StopBits::One
            }
        }
    }
}

/// Configuration settings for the uartcam service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Capture device configuration
    pub camera: CameraSettings,
    /// Recording storage configuration
    pub storage: StorageSettings,
    /// UART link configuration
    pub serial: SerialSettings,
    /// Target video bitrate passed to the encoder (e.g. "4M")
    pub bitrate: String,
    /// Use the hardware H.264 encoder via an external capture process
    pub use_hardware_encoder: bool,
    /// Start recording automatically once the system settles
    pub auto_start_recording: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera: CameraSettings::default(),
            storage: StorageSettings::default(),
            serial: SerialSettings::default(),
            bitrate: "4M".to_string(),
            use_hardware_encoder: true,
            auto_start_recording: false,
        }
    }
}

impl Settings {
    /// Load settings from the given path (or the default location), then
    /// apply environment variable overrides. Load failures fall back to the
    /// built-in defaults and are never fatal.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut settings = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Failed to parse config {path:?}, using defaults: {e}");
                    Settings::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config {path:?}, using defaults: {e}");
                Settings::default()
            }
        };

        settings.apply_env_overrides();
        settings
    }

    /// Override individual settings from the environment. Malformed values
    /// are logged and ignored.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("UARTCAM_SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Ok(device_id) = env::var("UARTCAM_DEVICE_ID") {
            match device_id.parse() {
                Ok(id) => self.camera.device_id = id,
                Err(e) => warn!("Ignoring UARTCAM_DEVICE_ID={device_id:?}: {e}"),
            }
        }
        if let Ok(video_path) = env::var("UARTCAM_VIDEO_PATH") {
            self.storage.video_path = PathBuf::from(video_path);
        }
        if let Ok(bitrate) = env::var("UARTCAM_BITRATE") {
            self.bitrate = bitrate;
        }
        if let Ok(hw) = env::var("UARTCAM_HARDWARE_ENCODER") {
            match hw.parse() {
                Ok(value) => self.use_hardware_encoder = value,
                Err(e) => warn!("Ignoring UARTCAM_HARDWARE_ENCODER={hw:?}: {e}"),
            }
        }
        if let Ok(auto) = env::var("UARTCAM_AUTO_START") {
            match auto.parse() {
                Ok(value) => self.auto_start_recording = value,
                Err(e) => warn!("Ignoring UARTCAM_AUTO_START={auto:?}: {e}"),
            }
        }
    }

    /// Path of the hardware capture device node.
    pub fn device_node(&self) -> PathBuf {
        PathBuf::from(format!("/dev/video{}", self.camera.device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.camera.device_id, 0);
        assert_eq!(settings.camera.width, 1280);
        assert_eq!(settings.camera.height, 720);
        assert_eq!(settings.camera.fps, 30);
        assert_eq!(settings.storage.video_path, PathBuf::from("/home/pi/videos"));
        assert_eq!(settings.serial.port, "/dev/serial0");
        assert_eq!(settings.serial.baud_rate, 115200);
        assert_eq!(settings.serial.byte_size, 8);
        assert_eq!(settings.serial.parity, "N");
        assert_eq!(settings.serial.stop_bits, 1);
        assert_eq!(settings.bitrate, "4M");
        assert!(settings.use_hardware_encoder);
        assert!(!settings.auto_start_recording);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/uartcam.json")));
        assert_eq!(settings.serial.baud_rate, 115200);
        assert!(settings.use_hardware_encoder);
    }

    #[test]
    fn test_load_invalid_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not valid json").unwrap();
        let settings = Settings::load(Some(file.path()));
        assert_eq!(settings.camera.fps, 30);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"camera": {"fps": 60}, "use_hardware_encoder": false}"#)
            .unwrap();
        let settings = Settings::load(Some(file.path()));
        assert_eq!(settings.camera.fps, 60);
        assert_eq!(settings.camera.width, 1280);
        assert!(!settings.use_hardware_encoder);
        assert_eq!(settings.serial.port, "/dev/serial0");
    }

    #[test]
    fn test_serial_parameter_mapping() {
        let mut serial = SerialSettings::default();
        assert_eq!(serial.data_bits(), tokio_serial::DataBits::Eight);
        assert_eq!(serial.parity(), tokio_serial::Parity::None);
        assert_eq!(serial.stop_bits(), tokio_serial::StopBits::One);

        serial.byte_size = 7;
        serial.parity = "e".to_string();
        serial.stop_bits = 2;
        assert_eq!(serial.data_bits(), tokio_serial::DataBits::Seven);
        assert_eq!(serial.parity(), tokio_serial::Parity::Even);
        assert_eq!(serial.stop_bits(), tokio_serial::StopBits::Two);

        serial.byte_size = 9;
        serial.parity = "X".to_string();
        serial.stop_bits = 3;
        assert_eq!(serial.data_bits(), tokio_serial::DataBits::Eight);
        assert_eq!(serial.parity(), tokio_serial::Parity::None);
        assert_eq!(serial.stop_bits(), tokio_serial::StopBits::One);
    }

    #[test]
    fn test_device_node() {
        let mut settings = Settings::default();
        assert_eq!(settings.device_node(), PathBuf::from("/dev/video0"));
        settings.camera.device_id = 2;
        assert_eq!(settings.device_node(), PathBuf::from("/dev/video2"));
    }

    #[test]
    fn test_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let deserialized: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings.serial.port, deserialized.serial.port);
        assert_eq!(settings.bitrate, deserialized.bitrate);
    }
}
