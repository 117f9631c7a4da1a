//! Shared timing and protocol constants.

use std::time::Duration;

/// Grace period after sending the quit command to the encoder process.
pub const ENCODER_QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period after force-terminating the encoder process.
pub const ENCODER_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on the container remux after a recording stops.
pub const REMUX_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff after a serial transport failure before retrying the read loop.
pub const SERIAL_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Settle delay before auto-started recording kicks in.
pub const AUTO_START_SETTLE: Duration = Duration::from_secs(2);

/// How long the supervisor waits for each background task during shutdown.
pub const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the property-command queue between router and recorder.
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// How long a producer blocks on a full command queue before dropping.
pub const COMMAND_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Frame pacing interval for the software capture loop.
pub const CAPTURE_TICK: Duration = Duration::from_millis(1);

/// Extension of the raw elementary stream produced by both encoder paths.
pub const RAW_EXTENSION: &str = "h264";

/// Extension of the remuxed container.
pub const CONTAINER_EXTENSION: &str = "mp4";
