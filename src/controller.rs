//! The fan control state machine
//!
//! `FanController::step()` turns a noisy temperature/flag sample into a
//! temporally smooth duty cycle: mode selection, force override,
//! hysteresis gating, floor enforcement and slew-rate limiting, in that
//! order. The step is a pure function of the current config/state plus
//! the sample and the tick timestamp, and never fails on finite input.

use std::time::Instant;

use crate::config::{ConfigUpdate, ControllerConfig, FanMode};
use crate::errors::Result;

/// Upper bound of the duty-cycle range used throughout the bridge
pub const DUTY_MAX: u8 = 100;

/// Base duty of the temperature formula, percent
const FORMULA_BASE: f64 = 12.0;
/// Span of the temperature formula, percent
const FORMULA_SPAN: f64 = 88.0;
/// Temperature at which the formula saturates, °C
const SATURATION_TEMP: f64 = 60.0;
/// Elapsed time assumed on the very first tick, seconds
const FIRST_TICK_DT: f64 = 1.0;

/// One sensor sample, produced fresh each tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub cpu_temp: f64,
    pub gpu_temp: f64,
    pub model_flag: bool,
}

impl Sample {
    pub fn new(cpu_temp: f64, gpu_temp: f64, model_flag: bool) -> Self {
        Self {
            cpu_temp,
            gpu_temp,
            model_flag,
        }
    }

    /// Substitute used when the sensor fetch fails; drives the target
    /// toward zero through the normal formula path
    pub fn safe_default() -> Self {
        Self::new(0.0, 0.0, false)
    }

    /// Hottest of the two temperatures, used by the hysteresis gate and
    /// the force override
    pub fn hottest(&self) -> f64 {
        self.cpu_temp.max(self.gpu_temp)
    }
}

/// Controller state carried across ticks to drive hysteresis and slew
/// limiting; owned exclusively by the `FanController`
#[derive(Debug, Clone, Copy)]
struct ControllerState {
    last_pwm: u8,
    last_tick: Option<Instant>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            last_pwm: 0,
            last_tick: None,
        }
    }
}

/// The fan control state machine
pub struct FanController {
    config: ControllerConfig,
    state: ControllerState,
}

/// Duty formula shared by Auto and Range modes
///
/// `round(clamp((12 + 88 * max(cpu/60, gpu/60)) * flag, 0, 100))` with the
/// per-temperature ratios clamped to [0, 1] first. Rounding is half-up
/// (Java `Math.round` semantics); a cleared flag always yields 0 and a
/// fully saturated temperature with the flag set yields exactly 100.
pub fn formula(cpu_temp: f64, gpu_temp: f64, model_flag: bool) -> u8 {
    if !model_flag {
        return 0;
    }

    let f_cpu = (cpu_temp / SATURATION_TEMP).clamp(0.0, 1.0);
    let f_gpu = (gpu_temp / SATURATION_TEMP).clamp(0.0, 1.0);
    let pwm = (FORMULA_BASE + FORMULA_SPAN * f_cpu.max(f_gpu)).clamp(0.0, DUTY_MAX as f64);

    round_half_up(pwm)
}

/// Half-up rounding for non-negative values already clamped to the duty
/// range
fn round_half_up(value: f64) -> u8 {
    (value + 0.5).floor() as u8
}

impl FanController {
    /// Create a controller with a validated configuration and a fresh
    /// state (fan off, no previous tick)
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: ControllerState::new(),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn mode(&self) -> FanMode {
        self.config.mode
    }

    /// Duty commanded by the most recent tick
    pub fn last_pwm(&self) -> u8 {
        self.state.last_pwm
    }

    /// Switch control mode; unknown modes cannot reach this point because
    /// the enum is closed at the deserialization boundary
    pub fn set_mode(&mut self, mode: FanMode) {
        self.config.mode = mode;
    }

    /// Apply a partial configuration update, all-or-nothing
    pub fn update_config(&mut self, update: &ConfigUpdate) -> Result<()> {
        self.config.apply(update)
    }

    /// Advance the state machine by one tick and return the new duty
    pub fn step(&mut self, sample: &Sample, now: Instant) -> u8 {
        let cfg = &self.config;

        // 1. Target selection by mode
        let mut target = match cfg.mode {
            FanMode::Manual => cfg.manual_pwm.min(DUTY_MAX),
            FanMode::Range => {
                if sample.cpu_temp <= cfg.cpu_threshold as f64
                    && sample.gpu_temp <= cfg.gpu_threshold as f64
                {
                    cfg.min_duty
                } else {
                    // Above threshold the range mode is always fully
                    // model-enabled
                    formula(sample.cpu_temp, sample.gpu_temp, true)
                }
            }
            FanMode::Auto => formula(sample.cpu_temp, sample.gpu_temp, sample.model_flag),
        };

        // Force override: a threshold breach with a configured force duty
        // replaces the target outright, hysteresis included
        let forced = cfg.force_pwm.is_some()
            && (sample.cpu_temp >= cfg.cpu_threshold as f64
                || sample.gpu_temp >= cfg.gpu_threshold as f64);

        if let (true, Some(force)) = (forced, cfg.force_pwm) {
            target = force.min(DUTY_MAX);
        } else if cfg.mode != FanMode::Manual {
            // 2. Hysteresis gate: turning on requires t_on, staying on
            // only requires t_off
            let hottest = sample.hottest();
            let gate_open = if self.state.last_pwm == 0 {
                hottest >= cfg.t_on
            } else {
                hottest >= cfg.t_off
            };
            if !gate_open {
                target = 0;
            }
        }

        // 3. Floor enforcement: below min_duty the fan may stall, so the
        // output is either off or at floor
        if target > 0 && target < cfg.min_duty {
            target = cfg.min_duty;
        }

        // 4. Slew-rate limiting
        let dt = match self.state.last_tick {
            Some(previous) => now.duration_since(previous).as_secs_f64(),
            None => FIRST_TICK_DT,
        };
        let max_delta = (cfg.slew_per_sec as f64 * dt + 0.5).floor() as i64;
        let requested = target as i64 - self.state.last_pwm as i64;
        let applied = requested.clamp(-max_delta, max_delta);
        let next = (self.state.last_pwm as i64 + applied).clamp(0, DUTY_MAX as i64) as u8;

        self.state.last_pwm = next;
        self.state.last_tick = Some(now);

        next
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn controller(config: ControllerConfig) -> FanController {
        FanController::new(config).unwrap()
    }

    /// Run a sequence of samples through the controller, one second apart
    fn run_ticks(ctl: &mut FanController, samples: &[Sample]) -> Vec<u8> {
        let start = Instant::now();
        samples
            .iter()
            .enumerate()
            .map(|(i, sample)| ctl.step(sample, start + Duration::from_secs(i as u64)))
            .collect()
    }

    #[test]
    fn test_formula_zero_flag_is_always_zero() {
        assert_eq!(formula(0.0, 0.0, false), 0);
        assert_eq!(formula(60.0, 60.0, false), 0);
        assert_eq!(formula(95.0, 80.0, false), 0);
    }

    #[test]
    fn test_formula_saturates_at_100() {
        assert_eq!(formula(60.0, 60.0, true), 100);
        assert_eq!(formula(90.0, 20.0, true), 100);
        assert_eq!(formula(0.0, 75.0, true), 100);
    }

    #[test]
    fn test_formula_rounding_half_up() {
        // 12 + 88 * 50/60 = 85.333
        assert_eq!(formula(50.0, 20.0, true), 85);
        // 12 + 88 * 30/60 = 56.0
        assert_eq!(formula(30.0, 0.0, true), 56);
        // 12 + 88 * 15/60 = 34.0; 12 + 88 * 16/60 = 35.466 -> 35
        assert_eq!(formula(16.0, 0.0, true), 35);
        assert_eq!(round_half_up(0.5), 1);
        assert_eq!(round_half_up(84.5), 85);
    }

    #[test]
    fn test_formula_negative_temperatures_clamp_to_base() {
        assert_eq!(formula(-10.0, -5.0, true), 12);
    }

    #[test]
    fn test_hysteresis_stays_off_below_t_on() {
        let mut ctl = controller(ControllerConfig {
            slew_per_sec: 100,
            ..Default::default()
        });
        // t_on is 38.0; just below must never start the fan
        let sample = Sample::new(37.9, 30.0, true);
        for _ in 0..5 {
            let duty = run_ticks(&mut ctl, &[sample]);
            assert_eq!(duty, vec![0]);
        }
    }

    #[test]
    fn test_hysteresis_opens_at_t_on_and_holds_through_the_band() {
        let mut ctl = controller(ControllerConfig {
            slew_per_sec: 100,
            ..Default::default()
        });
        let duties = run_ticks(
            &mut ctl,
            &[
                Sample::new(38.0, 0.0, true), // reaches t_on, gate opens
                Sample::new(36.0, 0.0, true), // inside the band, stays on
            ],
        );
        assert!(duties[0] > 0);
        assert!(duties[1] > 0);
    }

    #[test]
    fn test_hysteresis_releases_below_t_off() {
        let mut ctl = controller(ControllerConfig {
            slew_per_sec: 100,
            ..Default::default()
        });
        let duties = run_ticks(
            &mut ctl,
            &[
                Sample::new(45.0, 0.0, true), // on
                Sample::new(34.9, 0.0, true), // below t_off, forced to 0
            ],
        );
        assert!(duties[0] > 0);
        assert_eq!(duties[1], 0);
    }

    #[test]
    fn test_floor_raises_small_targets_to_min_duty() {
        let mut ctl = controller(ControllerConfig {
            mode: FanMode::Manual,
            manual_pwm: 5,
            min_duty: 20,
            slew_per_sec: 100,
            ..Default::default()
        });
        let duties = run_ticks(&mut ctl, &[Sample::safe_default()]);
        assert_eq!(duties, vec![20]);
    }

    #[test]
    fn test_floor_leaves_zero_target_off() {
        let mut ctl = controller(ControllerConfig {
            mode: FanMode::Manual,
            manual_pwm: 0,
            min_duty: 20,
            slew_per_sec: 100,
            ..Default::default()
        });
        let duties = run_ticks(&mut ctl, &[Sample::new(80.0, 80.0, true)]);
        assert_eq!(duties, vec![0]);
    }

    #[test]
    fn test_manual_mode_ignores_temperatures() {
        let mut ctl = controller(ControllerConfig {
            mode: FanMode::Manual,
            manual_pwm: 73,
            ..Default::default()
        });
        let duties = run_ticks(
            &mut ctl,
            &[
                Sample::new(0.0, 0.0, false),
                Sample::new(95.0, 95.0, true),
                Sample::new(10.0, 10.0, false),
                Sample::new(50.0, 50.0, true),
            ],
        );
        // Slew cap of 25/s: 25, 50, 73, then steady state
        assert_eq!(duties, vec![25, 50, 73, 73]);
    }

    #[test]
    fn test_slew_bounds_every_consecutive_delta() {
        let mut ctl = controller(ControllerConfig {
            slew_per_sec: 15,
            ..Default::default()
        });
        let hot = Sample::new(60.0, 60.0, true);
        let cold = Sample::new(0.0, 0.0, true);
        let duties = run_ticks(&mut ctl, &[hot, hot, hot, hot, cold, cold, cold]);

        let mut previous = 0i64;
        for duty in duties {
            assert!((duty as i64 - previous).abs() <= 15);
            previous = duty as i64;
        }
    }

    #[test]
    fn test_slew_scales_with_elapsed_time() {
        let mut ctl = controller(ControllerConfig::default());
        let start = Instant::now();
        let hot = Sample::new(60.0, 60.0, true);

        // First tick uses the 1.0 s default: cap 25
        assert_eq!(ctl.step(&hot, start), 25);
        // Two seconds elapsed: cap 50
        assert_eq!(ctl.step(&hot, start + Duration::from_secs(2)), 75);
    }

    #[test]
    fn test_range_mode_runs_at_floor_below_thresholds() {
        let mut ctl = controller(ControllerConfig {
            mode: FanMode::Range,
            t_on: 20.0,
            t_off: 15.0,
            slew_per_sec: 100,
            ..Default::default()
        });
        // Both temperatures at the threshold count as "below"
        let duties = run_ticks(&mut ctl, &[Sample::new(40.0, 40.0, false)]);
        assert_eq!(duties, vec![20]);
    }

    #[test]
    fn test_range_mode_ignores_model_flag_above_threshold() {
        let mut ctl = controller(ControllerConfig {
            mode: FanMode::Range,
            slew_per_sec: 100,
            ..Default::default()
        });
        // Flag is false but range mode treats the hot case as enabled
        let duties = run_ticks(&mut ctl, &[Sample::new(50.0, 20.0, false)]);
        assert_eq!(duties, vec![85]);
    }

    #[test]
    fn test_force_pwm_overrides_on_threshold_breach() {
        let mut ctl = controller(ControllerConfig {
            force_pwm: Some(100),
            slew_per_sec: 100,
            ..Default::default()
        });
        let duties = run_ticks(
            &mut ctl,
            &[
                // Flag cleared would normally mean duty 0, but cpu >= 40
                Sample::new(45.0, 20.0, false),
                // Back under both thresholds: normal path again
                Sample::new(20.0, 20.0, false),
            ],
        );
        assert_eq!(duties, vec![100, 0]);
    }

    #[test]
    fn test_end_to_end_gate_then_slew_toward_formula_target() {
        // Scenario: t_on 38 / t_off 35, floor 20, slew 25/s
        let mut ctl = controller(ControllerConfig::default());
        let cool = Sample::new(20.0, 20.0, true);
        let warm = Sample::new(50.0, 20.0, true);
        let duties = run_ticks(&mut ctl, &[cool, warm, warm, warm, warm, warm]);

        // Gate closed, then opens at T=50 and slews toward the formula
        // target of 85 in 25/s increments
        assert_eq!(duties, vec![0, 25, 50, 75, 85, 85]);
    }

    #[test]
    fn test_safe_default_sample_spins_down() {
        let mut ctl = controller(ControllerConfig {
            slew_per_sec: 100,
            ..Default::default()
        });
        let duties = run_ticks(
            &mut ctl,
            &[Sample::new(60.0, 60.0, true), Sample::safe_default()],
        );
        assert_eq!(duties, vec![100, 0]);
    }

    #[test]
    fn test_update_config_round_trip() {
        let mut ctl = controller(ControllerConfig::default());
        let update: ConfigUpdate =
            serde_json::from_str(r#"{"mode":"range","cpu_threshold":45}"#).unwrap();
        ctl.update_config(&update).unwrap();

        assert_eq!(ctl.mode(), FanMode::Range);
        assert_eq!(ctl.config().cpu_threshold, 45);
        assert_eq!(ctl.config().gpu_threshold, 40);
    }

    #[test]
    fn test_new_rejects_invalid_hysteresis() {
        let config = ControllerConfig {
            t_on: 30.0,
            t_off: 30.0,
            ..Default::default()
        };
        assert!(FanController::new(config).is_err());
    }
}
