//! Real-time media bridge
//!
//! Moves live, timestamped audio/video samples from a capture session into
//! buffers the host reads, with start/stop/shutdown lifecycle handling and
//! pull-based pacing of the producer.

pub mod capture;
pub mod config;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;
pub mod workers;

pub use error::{BridgeError, Result};
