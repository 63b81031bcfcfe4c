//! Fan Control Bridge
//!
//! Drives a remote cooling fan from periodically sampled temperatures and
//! a binary model flag. The core is a small state machine (mode
//! selection, hysteresis, floor duty, slew limiting) wrapped in a
//! fixed-rate control loop; duty commands leave and config updates arrive
//! as newline-delimited JSON over TCP.

pub mod args;
pub mod channel;
pub mod client;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod errors;
pub mod logging;
pub mod sensor;

/// Default actuator endpoint for outbound duty commands
pub const DEFAULT_ACTUATOR_ADDR: &str = "192.168.43.6:7000";
/// Default daemon endpoint the `set` client talks to
pub const DEFAULT_CLIENT_ADDR: &str = "127.0.0.1:8765";
/// Default control loop tick period in milliseconds
pub const DEFAULT_PERIOD_MS: u64 = 2000;

// Re-export commonly used types
pub use config::{ConfigReply, ConfigUpdate, ControllerConfig, FanMode};
pub use controller::{FanController, Sample};
pub use errors::{FanBridgeError, Result};
