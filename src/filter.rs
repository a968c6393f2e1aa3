use nalgebra::DVector;

use crate::error::{ensure_len, Error, Result};

/// Previous input and output of a [`Filter`], one entry per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterHistory {
    pub input: DVector<f64>,
    pub output: DVector<f64>,
}

impl FilterHistory {
    pub fn new(n: usize) -> Self {
        Self {
            input: DVector::zeros(n),
            output: DVector::zeros(n),
        }
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn reset(&mut self) {
        self.input.fill(0.0);
        self.output.fill(0.0);
    }
}

/// Single-pole low-pass filter discretised with Tustin's bilinear transform.
///
/// `y[k] = a0·y[k-1] + b0·x[k] + b1·x[k-1]`, evaluated per channel. The filter
/// keeps the previous input and output, so it must be called exactly once
/// per sampling interval. [`Filter::apply`] runs the same recursion on a
/// history owned by the caller.
#[derive(Clone, Debug)]
pub struct Filter {
    cutoff: f64,
    a0: f64,
    b0: f64,
    b1: f64,
    history: FilterHistory,
}

impl Filter {
    /// Pass-through filter over `n` channels.
    pub fn identity(n: usize) -> Self {
        Self {
            cutoff: 0.0,
            a0: 0.0,
            b0: 1.0,
            b1: 0.0,
            history: FilterHistory::new(n),
        }
    }

    /// Low-pass filter with cut-off frequency `cutoff` (rad/s).
    ///
    /// A cut-off of zero yields the identity filter.
    pub fn low_pass(cutoff: f64, n: usize, sampling_time: f64) -> Result<Self> {
        if !(cutoff.is_finite() && cutoff >= 0.0) {
            return Err(Error::InvalidParameter(format!(
                "filter cut-off must be non-negative, got {cutoff}"
            )));
        }
        if !(sampling_time.is_finite() && sampling_time > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "filter sampling time must be positive, got {sampling_time}"
            )));
        }
        if cutoff == 0.0 {
            return Ok(Self::identity(n));
        }

        let wt = cutoff * sampling_time;
        let b = wt / (2.0 + wt);
        Ok(Self {
            cutoff,
            a0: (2.0 - wt) / (2.0 + wt),
            b0: b,
            b1: b,
            history: FilterHistory::new(n),
        })
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Returns `(a0, b0, b1)`.
    pub fn coefficients(&self) -> (f64, f64, f64) {
        (self.a0, self.b0, self.b1)
    }

    pub fn history(&self) -> &FilterHistory {
        &self.history
    }

    /// Filters one sample per channel and stores it as the new history.
    pub fn filter_signal(&mut self, x: &DVector<f64>) -> Result<DVector<f64>> {
        let coefficients = self.coefficients();
        Self::advance(coefficients, x, &mut self.history)
    }

    /// Filters one sample per channel against an external `history`, which
    /// must have as many channels as the filter.
    pub fn apply(&self, x: &DVector<f64>, history: &mut FilterHistory) -> Result<DVector<f64>> {
        ensure_len("filter history", self.len(), history.len())?;
        Self::advance(self.coefficients(), x, history)
    }

    fn advance(
        (a0, b0, b1): (f64, f64, f64),
        x: &DVector<f64>,
        history: &mut FilterHistory,
    ) -> Result<DVector<f64>> {
        ensure_len("filter input", history.len(), x.len())?;

        let y = &history.output * a0 + x * b0 + &history.input * b1;
        history.input.copy_from(x);
        history.output.copy_from(&y);
        Ok(y)
    }

    /// Clears the history.
    pub fn reset(&mut self) {
        self.history.reset();
    }
}
