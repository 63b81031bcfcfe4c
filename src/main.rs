//! Main entry point for the fan bridge

use std::time::Duration;

use clap::Parser;
use fan_bridge::{
    args::{Args, Commands},
    client::{self, BridgeClient},
    config::{ConfigUpdate, ControllerConfig},
    controller::DUTY_MAX,
    daemon::{ControlLoopDaemon, DaemonOptions},
    errors::FanBridgeError,
    logging,
    sensor::SimulatedSensor,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Print version and build metadata for binary identity verification
    let pkg_version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    eprintln!(
        "fan-bridge v{} (git {}) built {}",
        pkg_version, git_hash, build_time
    );

    let args = Args::parse();

    logging::setup(args.verbose).map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    match args.command {
        Commands::Daemon {
            actuator,
            listen,
            period_ms,
            mode,
            manual_pwm,
            cpu_threshold,
            gpu_threshold,
            min_duty,
            slew_per_sec,
            t_on,
            t_off,
            force_pwm,
            sim_cpu,
            sim_gpu,
            sim_flag,
        } => {
            let config = ControllerConfig {
                mode,
                manual_pwm,
                cpu_threshold,
                gpu_threshold,
                min_duty,
                slew_per_sec,
                t_on,
                t_off,
                force_pwm,
            };
            let sensor = SimulatedSensor::new(sim_cpu, sim_gpu, sim_flag);
            let options = DaemonOptions {
                actuator_addr: actuator,
                listen_addr: listen,
                period: Duration::from_millis(period_ms),
            };

            ControlLoopDaemon::new(config, sensor, options)?.run().await?;
        }

        Commands::Set {
            daemon,
            mode,
            manual_pwm,
            cpu_threshold,
            gpu_threshold,
            force_pwm,
            clear_force_pwm,
        } => {
            let update = ConfigUpdate {
                mode,
                manual_pwm,
                cpu_threshold,
                gpu_threshold,
                force_pwm: if clear_force_pwm {
                    Some(None)
                } else {
                    force_pwm.map(Some)
                },
            };

            let reply = BridgeClient::new(daemon).send_update(&update).await?;
            println!("{}", serde_json::to_string(&reply)?);
        }

        Commands::Send { actuator, pwm } => {
            if pwm > DUTY_MAX {
                return Err(FanBridgeError::InvalidPwm(pwm).into());
            }
            client::send_test_command(&actuator, pwm).await?;
            println!("sent pwm={} to {}", pwm, actuator);
        }
    }

    Ok(())
}
