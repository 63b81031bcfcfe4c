//! Sensor sample acquisition
//!
//! The time-series store that holds real samples lives outside this
//! process; `SensorSource` is the seam it plugs into. The bundled
//! `SimulatedSensor` keeps the daemon runnable end to end without a
//! store, mirroring the dummy-data mode of the deployed system.

use async_trait::async_trait;

use crate::controller::Sample;
use crate::errors::Result;

/// Supplier of the latest `(cpu_temp, gpu_temp, model_flag)` sample
///
/// An error return means "no data"; the control loop substitutes
/// `Sample::safe_default()` and keeps ticking.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn latest(&self) -> Result<Sample>;
}

/// Jittered fixed-baseline sample source for bring-up and testing
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    base_cpu: f64,
    base_gpu: f64,
    model_flag: bool,
}

impl SimulatedSensor {
    pub fn new(base_cpu: f64, base_gpu: f64, model_flag: bool) -> Self {
        Self {
            base_cpu,
            base_gpu,
            model_flag,
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(45.0, 42.0, true)
    }
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    async fn latest(&self) -> Result<Sample> {
        let jitter = || (rand::random::<f64>() - 0.5) * 2.0;
        Ok(Sample::new(
            (self.base_cpu + jitter()).max(0.0),
            (self.base_gpu + jitter()).max(0.0),
            self.model_flag,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_sensor_stays_near_baseline() {
        let sensor = SimulatedSensor::new(45.0, 42.0, true);
        for _ in 0..20 {
            let sample = sensor.latest().await.unwrap();
            assert!((sample.cpu_temp - 45.0).abs() <= 1.0);
            assert!((sample.gpu_temp - 42.0).abs() <= 1.0);
            assert!(sample.model_flag);
        }
    }

    #[tokio::test]
    async fn test_simulated_sensor_never_goes_negative() {
        let sensor = SimulatedSensor::new(0.0, 0.0, false);
        let sample = sensor.latest().await.unwrap();
        assert!(sample.cpu_temp >= 0.0);
        assert!(sample.gpu_temp >= 0.0);
        assert!(!sample.model_flag);
    }
}
