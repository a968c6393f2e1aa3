use nalgebra::DVector;
use tracing::debug;

use crate::error::{ensure_len, Error, Result};

/// Magnitude of the default limits, effectively unbounded.
pub const UNBOUNDED: f64 = 1e6;

/// Addresses the channels touched by a per-channel limit setter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Every channel receives the same value.
    All,
    /// A single channel.
    Index(usize),
}

/// Position and rate bounds of a saturated signal, one entry per channel.
///
/// # Fields
///
/// * `lower`, `upper` - Static bounds on the signal
/// * `lower_rate`, `upper_rate` - Bounds on the change of the signal per second
#[derive(Clone, Debug, PartialEq)]
pub struct Limits {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    pub lower_rate: DVector<f64>,
    pub upper_rate: DVector<f64>,
}

impl Limits {
    /// Limits of `n` channels at ±[`UNBOUNDED`].
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: DVector::from_element(n, -UNBOUNDED),
            upper: DVector::from_element(n, UNBOUNDED),
            lower_rate: DVector::from_element(n, -UNBOUNDED),
            upper_rate: DVector::from_element(n, UNBOUNDED),
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Bounds for channel `i` after intersecting the static band with the
    /// band reachable from `last` within one interval `dt`.
    pub fn dynamic_bounds(&self, i: usize, last: f64, dt: f64) -> (f64, f64) {
        let lower = self.lower[i].max(last + self.lower_rate[i] * dt);
        let upper = self.upper[i].min(last + self.upper_rate[i] * dt);
        (lower, upper)
    }

    fn field_mut(&mut self, kind: LimitKind) -> &mut DVector<f64> {
        match kind {
            LimitKind::Lower => &mut self.lower,
            LimitKind::Upper => &mut self.upper,
            LimitKind::LowerRate => &mut self.lower_rate,
            LimitKind::UpperRate => &mut self.upper_rate,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum LimitKind {
    Lower,
    Upper,
    LowerRate,
    UpperRate,
}

impl LimitKind {
    fn name(self) -> &'static str {
        match self {
            LimitKind::Lower => "lower control limits",
            LimitKind::Upper => "upper control limits",
            LimitKind::LowerRate => "lower rate limits",
            LimitKind::UpperRate => "upper rate limits",
        }
    }
}

/// Clamps a signal to static bounds and to rate bounds around a previous value.
///
/// The saturator holds no signal history: the caller passes the previous
/// output explicitly, which keeps `saturate` free of side effects.
#[derive(Clone, Debug)]
pub struct Saturator {
    limits: Limits,
    sampling_time: f64,
}

impl Saturator {
    /// Creates an unbounded saturator over `n` channels.
    pub fn new(n: usize, sampling_time: f64) -> Self {
        Self {
            limits: Limits::unbounded(n),
            sampling_time,
        }
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn sampling_time(&self) -> f64 {
        self.sampling_time
    }

    /// Clamps `u` into `[max(lower, last + lower_rate·dt), min(upper, last + upper_rate·dt)]`.
    ///
    /// When the rate band and the static band do not overlap, the static
    /// lower bound wins.
    pub fn saturate(&self, u: &DVector<f64>, last: &DVector<f64>) -> Result<DVector<f64>> {
        ensure_len("control signal", self.len(), u.len())?;
        ensure_len("previous control signal", self.len(), last.len())?;

        Ok(DVector::from_fn(self.len(), |i, _| {
            let (lower, upper) = self.limits.dynamic_bounds(i, last[i], self.sampling_time);
            u[i].min(upper).max(lower)
        }))
    }

    fn set_all(&mut self, kind: LimitKind, values: &[f64]) -> Result<()> {
        ensure_len(kind.name(), self.len(), values.len())?;
        self.limits.field_mut(kind).copy_from_slice(values);
        Ok(())
    }

    fn set_channel(&mut self, kind: LimitKind, channel: Channel, value: f64) -> Result<()> {
        let len = self.len();
        let field = self.limits.field_mut(kind);
        match channel {
            Channel::All => field.fill(value),
            Channel::Index(i) if i < len => field[i] = value,
            Channel::Index(i) => return Err(Error::index(i, len)),
        }
        Ok(())
    }
}

/// Limit setters shared by everything that owns a [`Saturator`].
///
/// Vector setters need one value per channel. Per-channel setters broadcast
/// with [`Channel::All`]. A failing setter leaves every limit unchanged.
pub trait Saturated {
    fn saturator(&self) -> &Saturator;

    fn saturator_mut(&mut self) -> &mut Saturator;

    fn limits(&self) -> &Limits {
        &self.saturator().limits
    }

    fn set_lower_limits(&mut self, values: &[f64]) -> Result<()> {
        self.saturator_mut().set_all(LimitKind::Lower, values)
    }

    fn set_upper_limits(&mut self, values: &[f64]) -> Result<()> {
        self.saturator_mut().set_all(LimitKind::Upper, values)
    }

    fn set_lower_rate_limits(&mut self, values: &[f64]) -> Result<()> {
        self.saturator_mut().set_all(LimitKind::LowerRate, values)
    }

    fn set_upper_rate_limits(&mut self, values: &[f64]) -> Result<()> {
        self.saturator_mut().set_all(LimitKind::UpperRate, values)
    }

    fn set_lower_limit(&mut self, channel: Channel, value: f64) -> Result<()> {
        self.saturator_mut()
            .set_channel(LimitKind::Lower, channel, value)
    }

    fn set_upper_limit(&mut self, channel: Channel, value: f64) -> Result<()> {
        self.saturator_mut()
            .set_channel(LimitKind::Upper, channel, value)
    }

    fn set_lower_rate_limit(&mut self, channel: Channel, value: f64) -> Result<()> {
        self.saturator_mut()
            .set_channel(LimitKind::LowerRate, channel, value)
    }

    fn set_upper_rate_limit(&mut self, channel: Channel, value: f64) -> Result<()> {
        self.saturator_mut()
            .set_channel(LimitKind::UpperRate, channel, value)
    }

    /// Sets symmetric position and rate bounds on one or all channels.
    fn set_symmetric_limits(&mut self, channel: Channel, limit: f64, rate_limit: f64) -> Result<()> {
        self.set_lower_limit(channel, -limit)?;
        self.set_upper_limit(channel, limit)?;
        self.set_lower_rate_limit(channel, -rate_limit)?;
        self.set_upper_rate_limit(channel, rate_limit)
    }
}

impl Saturated for Saturator {
    fn saturator(&self) -> &Saturator {
        self
    }

    fn saturator_mut(&mut self) -> &mut Saturator {
        self
    }
}

/// A physical actuator with position and rate limits.
///
/// The actuator remembers the last command it applied, which is the rate
/// reference for the next call, and reports the realised control rate.
#[derive(Clone, Debug)]
pub struct Actuator {
    saturator: Saturator,
    last_u: DVector<f64>,
    control_rate: DVector<f64>,
}

impl Actuator {
    /// Creates an actuator over `n` channels.
    ///
    /// # Arguments
    ///
    /// * `n` - Number of channels
    /// * `initial` - Initial command; empty means zeros, otherwise one value per channel
    /// * `sampling_time` - Interval between calls to [`Actuator::actuate`] (s)
    pub fn new(n: usize, initial: &[f64], sampling_time: f64) -> Result<Self> {
        if !(sampling_time.is_finite() && sampling_time > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "actuator sampling time must be positive, got {sampling_time}"
            )));
        }
        let last_u = if initial.is_empty() {
            DVector::zeros(n)
        } else {
            ensure_len("initial command", n, initial.len())?;
            DVector::from_column_slice(initial)
        };

        debug!(channels = n, sampling_time, "actuator created");

        Ok(Self {
            saturator: Saturator::new(n, sampling_time),
            last_u,
            control_rate: DVector::zeros(n),
        })
    }

    pub fn len(&self) -> usize {
        self.saturator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saturator.is_empty()
    }

    /// Saturates `u`, records the realised rate and returns the applied command.
    pub fn actuate(&mut self, u: &[f64]) -> Result<DVector<f64>> {
        ensure_len("actuator command", self.len(), u.len())?;
        let applied = self
            .saturator
            .saturate(&DVector::from_column_slice(u), &self.last_u)?;

        self.control_rate = (&applied - &self.last_u) / self.saturator.sampling_time();
        self.last_u.copy_from(&applied);
        Ok(applied)
    }

    /// Last applied command.
    pub fn last_command(&self) -> &DVector<f64> {
        &self.last_u
    }

    /// Rate of change realised by the last call to [`Actuator::actuate`].
    pub fn control_rate(&self) -> &DVector<f64> {
        &self.control_rate
    }
}

impl Saturated for Actuator {
    fn saturator(&self) -> &Saturator {
        &self.saturator
    }

    fn saturator_mut(&mut self) -> &mut Saturator {
        &mut self.saturator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bounded(n: usize) -> Saturator {
        let mut saturator = Saturator::new(n, 0.1);
        saturator.set_symmetric_limits(Channel::All, 2.0, 5.0).unwrap();
        saturator
    }

    #[test]
    fn test_defaults_are_unbounded() {
        let saturator = Saturator::new(2, 0.01);
        let u = DVector::from_vec(vec![123.0, -456.0]);
        let out = saturator.saturate(&u, &DVector::zeros(2)).unwrap();
        assert_eq!(out, u);
        assert_eq!(saturator.limits().upper[0], UNBOUNDED);
    }

    #[test]
    fn test_static_and_rate_bounds() {
        let saturator = bounded(3);
        let last = DVector::from_vec(vec![0.0, 1.8, -1.0]);
        let u = DVector::from_vec(vec![10.0, 10.0, -10.0]);

        let out = saturator.saturate(&u, &last).unwrap();

        // rate band is last ± 0.5
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[1], 2.0);
        assert_relative_eq!(out[2], -1.5);
    }

    #[test]
    fn test_saturation_is_idempotent() {
        let saturator = bounded(4);
        let last = DVector::from_vec(vec![0.0, 1.9, -1.9, 0.3]);
        let candidates = [
            vec![3.0, -3.0, 0.1, 0.2],
            vec![-0.7, 2.5, -2.5, 100.0],
            vec![0.0, 0.0, 0.0, 0.0],
        ];

        for candidate in candidates {
            let u = DVector::from_vec(candidate);
            let once = saturator.saturate(&u, &last).unwrap();
            let twice = saturator.saturate(&once, &last).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_per_channel_setters() {
        let mut saturator = Saturator::new(3, 0.01);
        saturator.set_upper_limit(Channel::Index(1), 4.0).unwrap();
        assert_eq!(saturator.limits().upper[1], 4.0);
        assert_eq!(saturator.limits().upper[0], UNBOUNDED);

        saturator.set_lower_rate_limit(Channel::All, -3.0).unwrap();
        assert!(saturator.limits().lower_rate.iter().all(|&r| r == -3.0));

        let before = saturator.limits().clone();
        assert!(matches!(
            saturator.set_lower_limit(Channel::Index(3), 0.0),
            Err(Error::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert!(matches!(
            saturator.set_upper_limits(&[1.0, 2.0]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert_eq!(saturator.limits(), &before);
    }

    #[test]
    fn test_actuator_rate_limited_ramp() {
        let mut actuator = Actuator::new(1, &[0.0], 1.0).unwrap();
        actuator.set_lower_rate_limit(Channel::All, -1.0).unwrap();
        actuator.set_upper_rate_limit(Channel::All, 1.0).unwrap();

        let first = actuator.actuate(&[5.0]).unwrap();
        assert_relative_eq!(first[0], 1.0);
        assert_relative_eq!(actuator.control_rate()[0], 1.0);

        let second = actuator.actuate(&[5.0]).unwrap();
        assert_relative_eq!(second[0], 2.0);
        assert_relative_eq!(actuator.last_command()[0], 2.0);
    }

    #[test]
    fn test_actuator_rate_invariant() {
        let dt = 0.02;
        let mut actuator = Actuator::new(2, &[], dt).unwrap();
        actuator.set_symmetric_limits(Channel::All, 0.26, 0.26).unwrap();

        let mut previous = actuator.last_command().clone();
        for k in 0..200 {
            let t = k as f64 * dt;
            let command = [3.0 * (7.0 * t).sin(), if k % 3 == 0 { 10.0 } else { -10.0 }];
            let applied = actuator.actuate(&command).unwrap();
            for i in 0..2 {
                let rate = (applied[i] - previous[i]) / dt;
                assert!(rate.abs() <= 0.26 + 1e-9, "step {k}: rate {rate}");
                assert!(applied[i].abs() <= 0.26 + 1e-12);
            }
            previous = applied;
        }
    }

    #[test]
    fn test_actuator_rejects_bad_input() {
        assert!(Actuator::new(2, &[1.0], 0.01).is_err());
        assert!(Actuator::new(2, &[], 0.0).is_err());

        let mut actuator = Actuator::new(2, &[0.5, 0.5], 0.01).unwrap();
        assert!(actuator.actuate(&[1.0]).is_err());
        assert_eq!(actuator.last_command().as_slice(), &[0.5, 0.5]);
    }
}
