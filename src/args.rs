//! Command line argument parsing for the fan bridge

use clap::{Parser, Subcommand};

use crate::config::FanMode;

/// Fan Control Bridge
///
/// Samples temperatures and a model flag, runs the fan control state
/// machine and drives a remote PWM actuator over TCP.
#[derive(Parser)]
#[command(name = "fan-bridge")]
#[command(about = "Temperature-driven fan control bridge")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the control loop daemon
    Daemon {
        /// Actuator host:port for outbound duty commands
        #[arg(long, default_value = crate::DEFAULT_ACTUATOR_ADDR)]
        actuator: String,

        /// Accept inbound config frames on this host:port
        #[arg(long)]
        listen: Option<String>,

        /// Tick period in milliseconds (floor 50)
        #[arg(long, default_value_t = crate::DEFAULT_PERIOD_MS)]
        period_ms: u64,

        /// Initial control mode
        #[arg(long, value_enum, default_value_t = FanMode::Auto)]
        mode: FanMode,

        /// Manual-mode duty target (0-100)
        #[arg(long, default_value_t = 0)]
        manual_pwm: u8,

        /// CPU temperature threshold in °C
        #[arg(long, default_value_t = 40)]
        cpu_threshold: i32,

        /// GPU temperature threshold in °C
        #[arg(long, default_value_t = 40)]
        gpu_threshold: i32,

        /// Minimum nonzero duty (0-100)
        #[arg(long, default_value_t = 20)]
        min_duty: u8,

        /// Maximum duty change per second
        #[arg(long, default_value_t = 25)]
        slew_per_sec: u16,

        /// Hysteresis turn-on temperature in °C
        #[arg(long, default_value_t = 38.0)]
        t_on: f64,

        /// Hysteresis hold temperature in °C (must be below t-on)
        #[arg(long, default_value_t = 35.0)]
        t_off: f64,

        /// Force this duty while either temperature is at its threshold
        #[arg(long)]
        force_pwm: Option<u8>,

        /// Simulated sensor baseline CPU temperature in °C
        #[arg(long, default_value_t = 45.0)]
        sim_cpu: f64,

        /// Simulated sensor baseline GPU temperature in °C
        #[arg(long, default_value_t = 42.0)]
        sim_gpu: f64,

        /// Simulated sensor model flag
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        sim_flag: bool,
    },

    /// Send a config update to a running daemon
    Set {
        /// Daemon config listener host:port
        #[arg(long, default_value = crate::DEFAULT_CLIENT_ADDR)]
        daemon: String,

        /// New control mode
        #[arg(long, value_enum)]
        mode: Option<FanMode>,

        /// New manual-mode duty target (0-100)
        #[arg(long)]
        manual_pwm: Option<u8>,

        /// New CPU temperature threshold in °C
        #[arg(long)]
        cpu_threshold: Option<i32>,

        /// New GPU temperature threshold in °C
        #[arg(long)]
        gpu_threshold: Option<i32>,

        /// New force-PWM override (0-100)
        #[arg(long, conflicts_with = "clear_force_pwm")]
        force_pwm: Option<u8>,

        /// Clear the force-PWM override
        #[arg(long)]
        clear_force_pwm: bool,
    },

    /// Send a single raw duty command straight to the actuator
    Send {
        /// Actuator host:port
        #[arg(long, default_value = crate::DEFAULT_ACTUATOR_ADDR)]
        actuator: String,

        /// Duty cycle to apply (0-100)
        pwm: u8,
    },
}
