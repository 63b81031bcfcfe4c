//! The control loop daemon
//!
//! Drives sensor -> state machine -> actuator on a fixed period. Each
//! tick is independent: a failed sensor fetch falls back to the safe
//! default sample and a failed send is logged without aborting the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::signal;
use tokio::time::sleep;

use crate::channel::{ActuatorLink, ConfigListener};
use crate::config::ControllerConfig;
use crate::controller::{FanController, Sample};
use crate::errors::Result;
use crate::sensor::SensorSource;

/// Minimum enforced tick period; anything shorter is a runaway loop
pub const MIN_PERIOD: Duration = Duration::from_millis(50);

/// Wiring options for the daemon
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Actuator host:port for outbound duty commands
    pub actuator_addr: String,
    /// Optional host:port to accept inbound config frames on
    pub listen_addr: Option<String>,
    /// Nominal tick period; clamped up to `MIN_PERIOD`
    pub period: Duration,
}

/// The orchestrator: one controller, one sensor, one actuator link
pub struct ControlLoopDaemon<S> {
    controller: Arc<Mutex<FanController>>,
    sensor: S,
    link: ActuatorLink,
    listen_addr: Option<String>,
    period: Duration,
}

impl<S: SensorSource> ControlLoopDaemon<S> {
    pub fn new(config: ControllerConfig, sensor: S, options: DaemonOptions) -> Result<Self> {
        let controller = Arc::new(Mutex::new(FanController::new(config)?));

        let period = if options.period < MIN_PERIOD {
            warn!(
                "requested period {:?} below the {:?} floor, clamping",
                options.period, MIN_PERIOD
            );
            MIN_PERIOD
        } else {
            options.period
        };

        Ok(Self {
            controller,
            sensor,
            link: ActuatorLink::new(options.actuator_addr),
            listen_addr: options.listen_addr,
            period,
        })
    }

    /// Run until ctrl-c; ticks are strictly sequential and the remainder
    /// of each period is slept out after the work is done
    pub async fn run(mut self) -> Result<()> {
        let listener_task = match &self.listen_addr {
            Some(addr) => {
                let listener = ConfigListener::bind(addr, Arc::clone(&self.controller)).await?;
                Some(tokio::spawn(listener.run()))
            }
            None => None,
        };

        info!(
            "control loop started: period={:?}, actuator={}",
            self.period,
            self.link.addr()
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    shutdown.store(true, Ordering::SeqCst);
                }
            });
        }

        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick().await;
            sleep(self.period.saturating_sub(started.elapsed())).await;
        }

        if let Some(task) = listener_task {
            task.abort();
        }

        // Best-effort spin-down so the fan is not left running at the
        // last commanded duty
        if let Err(e) = self.link.send(0).await {
            warn!("final spin-down command failed: {}", e);
        }

        info!("control loop stopped");
        Ok(())
    }

    /// One tick: fetch, step, send; never fails
    async fn tick(&mut self) {
        let sample = match self.sensor.latest().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("sensor fetch failed, substituting safe default: {}", e);
                Sample::safe_default()
            }
        };

        let duty = {
            let mut ctl = self.controller.lock().unwrap();
            ctl.step(&sample, Instant::now())
        };
        debug!(
            "tick: cpu={:.1} gpu={:.1} flag={} -> duty={}%",
            sample.cpu_temp, sample.gpu_temp, sample.model_flag, duty
        );

        if let Err(e) = self.link.send(duty).await {
            warn!("command send failed, continuing: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;
    use crate::channel::Command;
    use crate::errors::FanBridgeError;

    struct FixedSensor(Sample);

    #[async_trait]
    impl SensorSource for FixedSensor {
        async fn latest(&self) -> Result<Sample> {
            Ok(self.0)
        }
    }

    struct BrokenSensor;

    #[async_trait]
    impl SensorSource for BrokenSensor {
        async fn latest(&self) -> Result<Sample> {
            Err(FanBridgeError::SensorUnavailable("no row".to_string()))
        }
    }

    fn options(actuator_addr: String) -> DaemonOptions {
        DaemonOptions {
            actuator_addr,
            listen_addr: None,
            period: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_period_floor_is_enforced() {
        let daemon = ControlLoopDaemon::new(
            ControllerConfig::default(),
            FixedSensor(Sample::safe_default()),
            DaemonOptions {
                actuator_addr: "127.0.0.1:7000".to_string(),
                listen_addr: None,
                period: Duration::from_millis(1),
            },
        )
        .unwrap();
        assert_eq!(daemon.period, MIN_PERIOD);
    }

    #[tokio::test]
    async fn test_tick_sends_stepped_duty_to_actuator() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let sample = Sample::new(60.0, 60.0, true);
        let mut daemon = ControlLoopDaemon::new(
            ControllerConfig::default(),
            FixedSensor(sample),
            options(addr.to_string()),
        )
        .unwrap();

        daemon.tick().await;

        let (stream, _) = server.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let command: Command =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        // Saturated formula target, first-tick slew cap of 25
        assert_eq!(command.pwm, 25);
    }

    #[tokio::test]
    async fn test_broken_sensor_falls_back_to_safe_default() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let mut daemon = ControlLoopDaemon::new(
            ControllerConfig::default(),
            BrokenSensor,
            options(addr.to_string()),
        )
        .unwrap();

        daemon.tick().await;

        let (stream, _) = server.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let command: Command =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(command.pwm, 0);
    }

    #[tokio::test]
    async fn test_tick_survives_unreachable_actuator() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        drop(server);

        let mut daemon = ControlLoopDaemon::new(
            ControllerConfig::default(),
            FixedSensor(Sample::new(60.0, 60.0, true)),
            options(addr.to_string()),
        )
        .unwrap();

        // Must not panic; the failed send only logs
        daemon.tick().await;
        daemon.tick().await;

        // State still advanced despite the send failures
        assert!(daemon.controller.lock().unwrap().last_pwm() >= 25);
    }
}
