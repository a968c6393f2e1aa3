//! Discrete PID law with trapezoidal integration, integral anti-windup and an
//! optionally filtered derivative.

use nalgebra::DVector;

use super::ControllerState;
use crate::config::PidGains;
use crate::error::{ensure_len, Error, Result};
use crate::saturator::Limits;

/// Per-channel PID gains and discretisation settings.
///
/// With `n_outputs == 1` the law runs in summed mode: all channel
/// contributions are added into the single output, and every channel's
/// integral is bounded by that output's limits.
#[derive(Clone, Debug, PartialEq)]
pub struct Pid {
    kp: DVector<f64>,
    ki: DVector<f64>,
    kd: DVector<f64>,
    n_outputs: usize,
    sampling_time: f64,
    derivative_cutoff: Option<f64>,
}

impl Pid {
    /// Creates a PID law with all gains at zero.
    pub fn new(n_inputs: usize, n_outputs: usize, sampling_time: f64) -> Self {
        Self {
            kp: DVector::zeros(n_inputs),
            ki: DVector::zeros(n_inputs),
            kd: DVector::zeros(n_inputs),
            n_outputs,
            sampling_time,
            derivative_cutoff: None,
        }
    }

    pub fn n_inputs(&self) -> usize {
        self.kp.len()
    }

    pub fn proportional_gains(&self) -> &DVector<f64> {
        &self.kp
    }

    pub fn integral_gains(&self) -> &DVector<f64> {
        &self.ki
    }

    pub fn derivative_gains(&self) -> &DVector<f64> {
        &self.kd
    }

    pub fn derivative_cutoff(&self) -> Option<f64> {
        self.derivative_cutoff
    }

    /// Low-pass filters the derivative term with cut-off `omega` (rad/s).
    pub fn set_derivative_cutoff(&mut self, omega: f64) -> Result<()> {
        if !(omega.is_finite() && omega > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "derivative cut-off must be positive, got {omega}"
            )));
        }
        self.derivative_cutoff = Some(omega);
        Ok(())
    }

    pub fn set_proportional_gains(&mut self, gains: &[f64]) -> Result<()> {
        ensure_len("proportional gains", self.n_inputs(), gains.len())?;
        self.kp.copy_from_slice(gains);
        Ok(())
    }

    pub fn set_integral_gains(&mut self, gains: &[f64]) -> Result<()> {
        ensure_len("integral gains", self.n_inputs(), gains.len())?;
        self.ki.copy_from_slice(gains);
        Ok(())
    }

    pub fn set_derivative_gains(&mut self, gains: &[f64]) -> Result<()> {
        ensure_len("derivative gains", self.n_inputs(), gains.len())?;
        self.kd.copy_from_slice(gains);
        Ok(())
    }

    /// Sets all three gain vectors, or none of them if any has the wrong length.
    pub fn set_gains(&mut self, gains: &PidGains) -> Result<()> {
        ensure_len("proportional gains", self.n_inputs(), gains.proportional.len())?;
        ensure_len("integral gains", self.n_inputs(), gains.integral.len())?;
        ensure_len("derivative gains", self.n_inputs(), gains.derivative.len())?;

        self.kp.copy_from_slice(&gains.proportional);
        self.ki.copy_from_slice(&gains.integral);
        self.kd.copy_from_slice(&gains.derivative);
        Ok(())
    }

    /// Turns `error` into a raw command, updating the integral, derivative
    /// and proportional values in `state`.
    ///
    /// `limits` are the output limits of the owning controller; they bound
    /// the integral so that `P + I` stays inside them.
    pub fn compute_action(
        &self,
        error: &DVector<f64>,
        state: &mut ControllerState,
        limits: &Limits,
    ) -> Result<DVector<f64>> {
        let n = self.n_inputs();
        ensure_len("error", n, error.len())?;
        ensure_len("output limits", self.n_outputs, limits.len())?;

        let dt = self.sampling_time;
        let mut output = DVector::zeros(self.n_outputs);

        for i in 0..n {
            let e = error[i];
            let last = state.last_error[i];

            state.integral[i] += self.ki[i] * (e + last) * dt / 2.0;
            state.derivative[i] = match self.derivative_cutoff {
                Some(omega) => {
                    let tau = 2.0 / omega;
                    2.0 * self.kd[i] / (tau + dt) * (e - last)
                        + (tau - dt) / (tau + dt) * state.derivative[i]
                }
                None => self.kd[i] * (e - last) / dt,
            };
            let p = self.kp[i] * e;
            state.proportional[i] = p;

            // Anti-windup: keep P + I inside the output band
            let channel = if self.n_outputs == 1 { 0 } else { i };
            let upper = if limits.upper[channel] > p {
                limits.upper[channel] - p
            } else {
                0.0
            };
            let lower = if limits.lower[channel] < p {
                limits.lower[channel] - p
            } else {
                0.0
            };
            if state.integral[i] > upper {
                state.integral[i] = upper;
            } else if state.integral[i] < lower {
                state.integral[i] = lower;
            }

            let contribution = p + state.integral[i] + state.derivative[i];
            if self.n_outputs == 1 {
                output[0] += contribution;
            } else {
                output[i] = contribution;
            }
        }

        state.last_error.copy_from(error);
        Ok(output)
    }
}
