#![deny(clippy::expect_used)]
#![deny(clippy::unwrap_used)]

pub mod command;
pub mod config;
pub mod constants;
pub mod encoder;
pub mod error;
pub mod recorder;
pub mod router;
pub mod supervisor;

pub use error::{CamError, CamResult};
