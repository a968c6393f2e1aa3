//! TOML configuration of the closed-loop scenarios.
//!
//! Every section is optional; missing sections and fields fall back to the
//! reference vehicle and its tuned gains.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::dynamics::STATE_LEN;
use crate::error::{Error, Result};
use crate::params::VehicleParams;
use crate::saturator::{Channel, Saturated};

/// Propeller speed of the reference vehicle at hover (rad/s).
pub const HOVER_PROP_SPEED: f64 = 2276.856764;

/// Proportional, integral and derivative gains, one entry per controller input.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PidGains {
    pub proportional: Vec<f64>,
    pub integral: Vec<f64>,
    pub derivative: Vec<f64>,
}

impl PidGains {
    pub fn new(proportional: &[f64], integral: &[f64], derivative: &[f64]) -> Self {
        Self {
            proportional: proportional.to_vec(),
            integral: integral.to_vec(),
            derivative: derivative.to_vec(),
        }
    }
}

/// Symmetric position and rate bounds applied to every channel of an actuator.
///
/// # Fields
///
/// * `max_position` - Largest absolute command
/// * `max_rate` - Largest absolute change of the command per second
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActuatorLimits {
    pub max_position: f64,
    pub max_rate: f64,
}

impl ActuatorLimits {
    /// Gimbal servos: ±15° and ±15°/s.
    pub const SERVOS: Self = Self {
        max_position: 0.261799,
        max_rate: 0.261799,
    };

    /// Propeller motor: ±3952.12 rad/s and ±100 rad/s².
    pub const PROPELLER: Self = Self {
        max_position: 3952.12,
        max_rate: 100.0,
    };

    pub fn apply<S: Saturated>(&self, target: &mut S) -> Result<()> {
        target.set_symmetric_limits(Channel::All, self.max_position, self.max_rate)
    }
}

/// Time grid of a simulation run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeSettings {
    pub initial_time: f64,
    pub final_time: f64,
    pub sampling_time: f64,
}

impl Default for TimeSettings {
    fn default() -> Self {
        Self {
            initial_time: 0.0,
            final_time: 25.0,
            sampling_time: 0.01,
        }
    }
}

impl TimeSettings {
    /// Number of sampling intervals between the initial and final time.
    pub fn iterations(&self) -> usize {
        let span = (self.final_time - self.initial_time) / self.sampling_time;
        // Absorb round-off such as 2.0 / 0.01 = 199.99999999999997
        (span + 1e-9).floor().max(0.0) as usize
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_time.is_finite() && self.sampling_time > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "sampling time must be positive, got {}",
                self.sampling_time
            )));
        }
        if !(self.final_time >= self.initial_time) {
            return Err(Error::InvalidParameter(format!(
                "final time {} precedes initial time {}",
                self.final_time, self.initial_time
            )));
        }
        Ok(())
    }
}

/// Configuration of the PID attitude and altitude hold.
///
/// The outer controller acts on `[roll, pitch, z]` and produces roll and
/// pitch rate references plus a propeller correction; the inner controller
/// turns the rate errors into gimbal angles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    pub time: TimeSettings,
    pub vehicle: VehicleParams,
    pub initial_state: [f64; STATE_LEN],
    /// `[roll, pitch, z]` setpoint.
    pub reference: [f64; 3],
    pub outer: PidGains,
    pub inner: PidGains,
    pub servos: ActuatorLimits,
    pub propeller: ActuatorLimits,
    /// Propeller speed added to the outer controller's correction (rad/s).
    pub hover_feed_forward: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        let mut initial_state = [0.0; STATE_LEN];
        initial_state[0] = 0.0872665;
        initial_state[1] = 0.0872665;
        initial_state[6] = 50.0;
        initial_state[7] = 50.0;
        initial_state[8] = -50.5;

        Self {
            time: TimeSettings::default(),
            vehicle: VehicleParams::default(),
            initial_state,
            reference: [-0.0872665, -0.0872665, -50.0],
            outer: PidGains::new(&[1.1, 0.9, -110.0], &[0.0, 0.0, 0.0], &[0.5, 0.7, -50.0]),
            inner: PidGains::new(&[-1.0, -1.0], &[-0.3, -0.3], &[0.0, 0.0]),
            servos: ActuatorLimits::SERVOS,
            propeller: ActuatorLimits::PROPELLER,
            hover_feed_forward: HOVER_PROP_SPEED,
        }
    }
}

impl LoopConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        parse(text)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load(path)
    }
}

/// Configuration of the INDI position hold.
///
/// Gains and output cut-offs of the position, velocity, attitude and rate
/// controllers. Actuators are left unbounded unless limits are given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PositionLoopConfig {
    pub time: TimeSettings,
    pub vehicle: VehicleParams,
    pub position: PidGains,
    pub velocity: PidGains,
    pub attitude: PidGains,
    pub rate: PidGains,
    pub position_cutoff: f64,
    pub velocity_cutoff: f64,
    pub attitude_cutoff: f64,
    pub rate_cutoff: f64,
    pub servos: Option<ActuatorLimits>,
    pub propeller: Option<ActuatorLimits>,
}

impl Default for PositionLoopConfig {
    fn default() -> Self {
        Self {
            time: TimeSettings::default(),
            vehicle: VehicleParams::default(),
            position: PidGains::new(&[0.7, 0.7, 1.0], &[2.0, 2.0, 2.0], &[0.0, 0.0, 0.0]),
            velocity: PidGains::new(&[2.0, 2.0, 2.0], &[10.0, 10.0, 10.0], &[0.0, 0.0, 0.0]),
            attitude: PidGains::new(&[3.0, 3.0], &[10.0, 10.0], &[0.0, 0.0]),
            rate: PidGains::new(&[-1.0, -1.0], &[0.0, 0.0], &[0.0, 0.0]),
            position_cutoff: 5.0,
            velocity_cutoff: 10.0,
            attitude_cutoff: 10.0,
            rate_cutoff: 10.0,
            servos: None,
            propeller: None,
        }
    }
}

impl PositionLoopConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        parse(text)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load(path)
    }
}

fn parse<T: DeserializeOwned>(text: &str) -> Result<T> {
    toml::from_str(text).map_err(|e| Error::Parse(e.to_string()))
}

fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse(&text).map_err(|e| match e {
        Error::Parse(msg) => Error::Parse(format!("{}: {msg}", path.display())),
        other => other,
    })
}
