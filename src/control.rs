use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::error::{ensure_len, Error, Result};
use crate::filter::{Filter, FilterHistory};
use crate::saturator::{Limits, Saturated, Saturator};

pub mod indi;
pub mod pid;

pub use indi::{Indi, IndiParams, MIN_PROP_SPEED_FRACTION, SINGULARITY_TOLERANCE};
pub use pid::Pid;

/// Mutable accumulation of a control law.
///
/// One record per controller, mutated once per step and never reset
/// implicitly. Cloning it gives a snapshot that can be restored for replay.
///
/// # Fields
///
/// * `integral`, `derivative`, `proportional` - Per-input PID terms of the
///   last step. Only the PID law writes them; under INDI they stay at zero.
/// * `last_error` - Error of the previous step, per input
/// * `last_output` - Output of the previous step, the rate reference for saturation
/// * `filter` - History of the output filter
/// * `revision` - Number of `init` and `step` calls applied to this record
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerState {
    pub integral: DVector<f64>,
    pub derivative: DVector<f64>,
    pub proportional: DVector<f64>,
    pub last_error: DVector<f64>,
    pub last_output: DVector<f64>,
    pub filter: FilterHistory,
    pub revision: u64,
}

impl ControllerState {
    pub fn new(n_inputs: usize, n_outputs: usize) -> Self {
        Self {
            integral: DVector::zeros(n_inputs),
            derivative: DVector::zeros(n_inputs),
            proportional: DVector::zeros(n_inputs),
            last_error: DVector::zeros(n_inputs),
            last_output: DVector::zeros(n_outputs),
            filter: FilterHistory::new(n_outputs),
            revision: 0,
        }
    }

    /// Zeroes every term and the revision counter.
    pub fn reset(&mut self) {
        self.integral.fill(0.0);
        self.derivative.fill(0.0);
        self.proportional.fill(0.0);
        self.last_error.fill(0.0);
        self.last_output.fill(0.0);
        self.filter.reset();
        self.revision = 0;
    }
}

/// The control law plugged into a [`Controller`].
#[derive(Clone, Debug, PartialEq)]
pub enum ControlLaw {
    Pid(Pid),
    Indi(Indi),
}

impl ControlLaw {
    /// Turns an error into a raw, unsaturated command.
    pub fn compute_action(
        &mut self,
        error: &DVector<f64>,
        state: &mut ControllerState,
        limits: &Limits,
    ) -> Result<DVector<f64>> {
        match self {
            ControlLaw::Pid(pid) => pid.compute_action(error, state, limits),
            ControlLaw::Indi(indi) => indi.determine_control_action(error),
        }
    }
}

/// Feedback controller: reference handling, a control law, output saturation
/// and an output low-pass filter.
///
/// Each step computes `error = reference − x`, lets the law turn it into a
/// raw command, saturates it against the controller's limits with the
/// previous output as rate reference, and filters the result.
///
/// The reference of a step is, in order of precedence, the explicit
/// reference passed to the call, the stored polynomial evaluated at the
/// current time, or zero.
#[derive(Clone, Debug)]
pub struct Controller {
    n_inputs: usize,
    n_outputs: usize,
    sampling_time: f64,
    reference_coeffs: Option<DMatrix<f64>>,
    reference: DVector<f64>,
    u: DVector<f64>,
    state: ControllerState,
    saturator: Saturator,
    filter: Filter,
    law: ControlLaw,
}

impl Controller {
    /// Creates a PID controller with zero gains.
    ///
    /// `n_outputs` must equal `n_inputs` or be 1 (summed mode); anything else
    /// is forced to 1.
    pub fn pid(n_inputs: usize, n_outputs: usize, sampling_time: f64) -> Result<Self> {
        let n_outputs = Self::output_count(n_inputs, n_outputs);
        let law = ControlLaw::Pid(Pid::new(n_inputs, n_outputs, sampling_time));
        Self::with_law(n_inputs, n_outputs, sampling_time, law)
    }

    /// Creates a three-channel INDI controller on the earth-frame acceleration.
    pub fn indi(params: IndiParams, sampling_time: f64) -> Result<Self> {
        let law = ControlLaw::Indi(Indi::new(params)?);
        Self::with_law(Indi::CHANNELS, Indi::CHANNELS, sampling_time, law)
    }

    fn output_count(n_inputs: usize, n_outputs: usize) -> usize {
        if n_outputs == n_inputs || n_outputs == 1 {
            n_outputs
        } else {
            warn!(
                n_inputs,
                requested = n_outputs,
                "output count must match input count or be 1, using summed mode"
            );
            1
        }
    }

    fn with_law(
        n_inputs: usize,
        n_outputs: usize,
        sampling_time: f64,
        law: ControlLaw,
    ) -> Result<Self> {
        if !(sampling_time.is_finite() && sampling_time > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "controller sampling time must be positive, got {sampling_time}"
            )));
        }

        debug!(n_inputs, n_outputs, sampling_time, "controller created");

        Ok(Self {
            n_inputs,
            n_outputs,
            sampling_time,
            reference_coeffs: None,
            reference: DVector::zeros(n_inputs),
            u: DVector::zeros(n_outputs),
            state: ControllerState::new(n_inputs, n_outputs),
            saturator: Saturator::new(n_outputs, sampling_time),
            filter: Filter::identity(n_outputs),
            law,
        })
    }

    /// Low-pass filters the output with cut-off `cutoff` (rad/s).
    pub fn with_output_filter(mut self, cutoff: f64) -> Result<Self> {
        self.filter = Filter::low_pass(cutoff, self.n_outputs, self.sampling_time)?;
        Ok(self)
    }

    /// Low-pass filters the PID derivative term with cut-off `cutoff` (rad/s).
    pub fn with_derivative_cutoff(mut self, cutoff: f64) -> Result<Self> {
        match &mut self.law {
            ControlLaw::Pid(pid) => pid.set_derivative_cutoff(cutoff)?,
            ControlLaw::Indi(_) => {
                return Err(Error::InvalidParameter(
                    "derivative cut-off applies to PID controllers only".into(),
                ))
            }
        }
        Ok(self)
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn sampling_time(&self) -> f64 {
        self.sampling_time
    }

    pub fn law(&self) -> &ControlLaw {
        &self.law
    }

    pub fn pid_mut(&mut self) -> Option<&mut Pid> {
        match &mut self.law {
            ControlLaw::Pid(pid) => Some(pid),
            ControlLaw::Indi(_) => None,
        }
    }

    pub fn indi_mut(&mut self) -> Option<&mut Indi> {
        match &mut self.law {
            ControlLaw::Indi(indi) => Some(indi),
            ControlLaw::Pid(_) => None,
        }
    }

    /// Stores a polynomial reference, one row of coefficients per input.
    ///
    /// Row `i` holds `[c₀, c₁, …, cₙ]` for `r_i(t) = c₀·tⁿ + c₁·tⁿ⁻¹ + … + cₙ`.
    pub fn set_polynomial_reference(&mut self, coeffs: DMatrix<f64>) -> Result<()> {
        ensure_len("reference polynomial rows", self.n_inputs, coeffs.nrows())?;
        self.reference_coeffs = Some(coeffs);
        Ok(())
    }

    pub fn clear_polynomial_reference(&mut self) {
        self.reference_coeffs = None;
    }

    fn resolve_reference(&self, t: f64, y_ref: Option<&[f64]>) -> Result<DVector<f64>> {
        if let Some(y_ref) = y_ref {
            ensure_len("reference", self.n_inputs, y_ref.len())?;
            return Ok(DVector::from_column_slice(y_ref));
        }
        Ok(match &self.reference_coeffs {
            Some(coeffs) => DVector::from_fn(self.n_inputs, |i, _| {
                coeffs.row(i).iter().fold(0.0, |acc, c| acc * t + c)
            }),
            None => DVector::zeros(self.n_inputs),
        })
    }

    /// Prepares the controller for its first step.
    ///
    /// # Arguments
    ///
    /// * `x0` - Initial measurement, one value per input
    /// * `init_u` - Initial output; empty means zeros, otherwise one value per output
    /// * `y_ref` - Explicit reference, or `None` to use the stored polynomial
    /// * `start_time` - Time at which the polynomial reference is evaluated
    pub fn init(
        &mut self,
        x0: &[f64],
        init_u: &[f64],
        y_ref: Option<&[f64]>,
        start_time: f64,
    ) -> Result<()> {
        ensure_len("initial measurement", self.n_inputs, x0.len())?;
        if !init_u.is_empty() {
            ensure_len("initial output", self.n_outputs, init_u.len())?;
        }
        let reference = self.resolve_reference(start_time, y_ref)?;

        self.state.last_error = &reference - DVector::from_column_slice(x0);
        if init_u.is_empty() {
            self.state.last_output.fill(0.0);
        } else {
            self.state.last_output.copy_from_slice(init_u);
        }
        self.u.copy_from(&self.state.last_output);
        self.reference = reference;
        self.state.revision += 1;
        Ok(())
    }

    /// Runs one control step and returns the new output.
    ///
    /// On error nothing is modified, except that an INDI law without a valid
    /// effectiveness matrix leaves the previous output in place.
    pub fn step(&mut self, t: f64, x: &[f64], y_ref: Option<&[f64]>) -> Result<&DVector<f64>> {
        ensure_len("controller input", self.n_inputs, x.len())?;
        let reference = self.resolve_reference(t, y_ref)?;
        let error = &reference - DVector::from_column_slice(x);

        let raw = self
            .law
            .compute_action(&error, &mut self.state, self.saturator.limits())?;
        let saturated = self.saturator.saturate(&raw, &self.state.last_output)?;
        let filtered = self.filter.apply(&saturated, &mut self.state.filter)?;

        self.state.last_error = error;
        self.state.last_output.copy_from(&filtered);
        self.state.revision += 1;
        self.u = filtered;
        self.reference = reference;
        Ok(&self.u)
    }

    /// Copies the current output into `out`, which must hold `n_outputs` values.
    pub fn get_u(&self, out: &mut [f64]) -> Result<()> {
        ensure_len("output buffer", self.n_outputs, out.len())?;
        out.copy_from_slice(self.u.as_slice());
        Ok(())
    }

    pub fn output(&self) -> &DVector<f64> {
        &self.u
    }

    /// Reference resolved by the last `init` or `step`.
    pub fn reference(&self) -> &DVector<f64> {
        &self.reference
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Restores a snapshot taken with [`Controller::state`].
    pub fn restore_state(&mut self, state: ControllerState) -> Result<()> {
        ensure_len("snapshot inputs", self.n_inputs, state.last_error.len())?;
        ensure_len("snapshot outputs", self.n_outputs, state.last_output.len())?;
        ensure_len("snapshot filter history", self.n_outputs, state.filter.len())?;
        self.u.copy_from(&state.last_output);
        self.state = state;
        Ok(())
    }

    /// Returns the controller to its freshly constructed state, keeping
    /// gains, limits and the polynomial reference.
    pub fn reset(&mut self) {
        self.state.reset();
        self.u.fill(0.0);
        self.reference.fill(0.0);
    }
}

impl Saturated for Controller {
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
    use crate::saturator::Channel;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn proportional(n: usize, kp: f64, dt: f64) -> Controller {
        let mut controller = Controller::pid(n, n, dt).unwrap();
        controller
            .pid_mut()
            .unwrap()
            .set_proportional_gains(&vec![kp; n])
            .unwrap();
        controller
    }

    #[test]
    fn test_pure_proportional_sequence() {
        let mut controller = proportional(1, 1.0, 1.0);

        let outputs: Vec<f64> = (0..3)
            .map(|_| controller.step(0.0, &[0.0], Some(&[1.0])).unwrap()[0])
            .collect();

        assert_eq!(outputs, vec![1.0, 1.0, 1.0]);
        assert_eq!(controller.state().revision, 3);
    }

    #[test]
    fn test_output_count_is_forced() {
        let controller = Controller::pid(3, 2, 0.01).unwrap();
        assert_eq!(controller.n_outputs(), 1);
        assert_eq!(controller.limits().len(), 1);

        let controller = Controller::pid(3, 3, 0.01).unwrap();
        assert_eq!(controller.n_outputs(), 3);
    }

    #[test]
    fn test_summed_mode_output() {
        let mut controller = Controller::pid(3, 1, 0.1).unwrap();
        controller
            .pid_mut()
            .unwrap()
            .set_proportional_gains(&[1.0, 2.0, 3.0])
            .unwrap();

        let u = controller.step(0.0, &[0.0, 0.0, 0.0], Some(&[1.0, 1.0, 1.0])).unwrap();
        assert_eq!(u.len(), 1);
        assert_relative_eq!(u[0], 6.0);
    }

    #[test]
    fn test_reference_precedence() {
        let mut controller = proportional(2, 1.0, 0.5);
        // r0(t) = 2t + 1, r1(t) = t² - 1
        let coeffs = DMatrix::from_row_slice(2, 3, &[0.0, 2.0, 1.0, 1.0, 0.0, -1.0]);
        controller.set_polynomial_reference(coeffs).unwrap();

        controller.step(2.0, &[0.0, 0.0], None).unwrap();
        assert_relative_eq!(controller.reference()[0], 5.0);
        assert_relative_eq!(controller.reference()[1], 3.0);

        controller.step(2.0, &[1.0, 1.0], Some(&[4.0, 4.0])).unwrap();
        assert_relative_eq!(controller.output()[0], 3.0);

        controller.clear_polynomial_reference();
        controller.step(2.0, &[1.0, -1.0], None).unwrap();
        assert_relative_eq!(controller.output()[0], -1.0);
        assert_relative_eq!(controller.output()[1], 1.0);
    }

    #[test]
    fn test_polynomial_reference_row_check() {
        let mut controller = proportional(2, 1.0, 0.5);
        let good = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        controller.set_polynomial_reference(good).unwrap();

        let bad = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 3.0]);
        assert!(controller.set_polynomial_reference(bad).is_err());

        controller.step(0.0, &[0.0, 0.0], None).unwrap();
        assert_eq!(controller.reference().as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_init_sets_error_and_output() {
        let mut controller = Controller::pid(2, 2, 0.1).unwrap();
        controller
            .pid_mut()
            .unwrap()
            .set_derivative_gains(&[1.0, 1.0])
            .unwrap();

        controller.init(&[1.0, 2.0], &[0.3, 0.4], Some(&[1.5, 1.0]), 0.0).unwrap();
        assert_eq!(controller.state().last_error.as_slice(), &[0.5, -1.0]);
        assert_eq!(controller.output().as_slice(), &[0.3, 0.4]);

        // derivative sees no jump for an unchanged error
        let u = controller.step(0.1, &[1.0, 2.0], Some(&[1.5, 1.0])).unwrap();
        assert_relative_eq!(u[0], 0.0);
        assert_relative_eq!(u[1], 0.0);

        assert!(controller.init(&[1.0], &[], None, 0.0).is_err());
        assert!(controller.init(&[1.0, 2.0], &[0.1], None, 0.0).is_err());
    }

    #[test]
    fn test_step_rejects_bad_dimensions() {
        let mut controller = proportional(2, 1.0, 0.1);
        let before = controller.state().clone();

        assert!(controller.step(0.0, &[1.0], None).is_err());
        assert!(controller.step(0.0, &[1.0, 1.0], Some(&[1.0])).is_err());
        assert_eq!(controller.state(), &before);

        let mut buffer = [0.0; 3];
        assert!(matches!(
            controller.get_u(&mut buffer),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_output_is_saturated_then_filtered() {
        let mut controller = proportional(1, 10.0, 0.1).with_output_filter(5.0).unwrap();
        controller.set_upper_limit(Channel::All, 2.0).unwrap();

        let u = controller.step(0.0, &[0.0], Some(&[1.0])).unwrap()[0];
        let (_, b0, _) = Filter::low_pass(5.0, 1, 0.1).unwrap().coefficients();
        assert_relative_eq!(u, b0 * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_output_rate_limit_uses_last_output() {
        let mut controller = proportional(1, 10.0, 0.1);
        controller.set_upper_rate_limit(Channel::All, 1.0).unwrap();

        let mut out = [0.0];
        for k in 1..=3 {
            controller.step(0.0, &[0.0], Some(&[1.0])).unwrap();
            controller.get_u(&mut out).unwrap();
            assert_relative_eq!(out[0], 0.1 * k as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_snapshot_and_reset() {
        let mut controller = Controller::pid(1, 1, 0.1).unwrap();
        controller.pid_mut().unwrap().set_integral_gains(&[1.0]).unwrap();

        controller.step(0.0, &[0.0], Some(&[1.0])).unwrap();
        let snapshot = controller.state().clone();
        let first = controller.step(0.1, &[0.0], Some(&[1.0])).unwrap()[0];

        controller.restore_state(snapshot).unwrap();
        let replayed = controller.step(0.1, &[0.0], Some(&[1.0])).unwrap()[0];
        assert_eq!(first, replayed);

        controller.reset();
        assert_eq!(controller.state().revision, 0);
        assert_eq!(controller.state().integral[0], 0.0);
        assert_eq!(controller.output()[0], 0.0);
    }

    #[test]
    fn test_snapshot_replays_filtered_output() {
        let mut controller = proportional(1, 1.0, 0.1).with_output_filter(5.0).unwrap();

        let first = controller.step(0.0, &[0.0], Some(&[1.0])).unwrap()[0];
        let snapshot = controller.state().clone();
        let second = controller.step(0.1, &[0.0], Some(&[1.0])).unwrap()[0];
        assert!(second > first);

        controller.restore_state(snapshot).unwrap();
        let replayed = controller.step(0.1, &[0.0], Some(&[1.0])).unwrap()[0];
        assert_eq!(second, replayed);

        // a fresh controller starts from an empty filter history
        controller.reset();
        let restarted = controller.step(0.0, &[0.0], Some(&[1.0])).unwrap()[0];
        assert_eq!(first, restarted);

        let mut foreign = controller.state().clone();
        foreign.filter = FilterHistory::new(2);
        assert!(controller.restore_state(foreign).is_err());
    }

    #[test]
    fn test_indi_controller_without_effectiveness_fails() {
        let params = IndiParams::new(1.75, -0.00754, 0.0).unwrap();
        let mut controller = Controller::indi(params, 0.01).unwrap();
        assert_eq!(controller.n_inputs(), 3);

        let result = controller.step(0.0, &[0.0, 0.0, 0.0], Some(&[0.0, 0.0, 1.0]));
        assert!(matches!(result, Err(Error::ControlUnavailable(_))));
        assert_eq!(controller.state().revision, 0);

        controller
            .indi_mut()
            .unwrap()
            .compute_control_effectiveness(&Vector3::zeros(), &[0.0, 0.0], 2000.0)
            .unwrap();
        controller
            .step(0.01, &[0.0, 0.0, 0.0], Some(&[0.0, 0.0, 1.0]))
            .unwrap();
        assert_eq!(controller.state().revision, 1);
        // PID terms are untouched by the INDI law
        assert!(controller.state().integral.iter().all(|&v| v == 0.0));
        assert!(controller.state().proportional.iter().all(|&v| v == 0.0));

        assert!(controller.with_derivative_cutoff(10.0).is_err());
    }
}
