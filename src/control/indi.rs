//! Incremental nonlinear dynamic inversion on the earth-frame acceleration.
//!
//! The law linearises the map from `[roll, pitch, propeller speed]` to the
//! earth-frame acceleration around the current operating point and inverts it:
//!
//! ```text
//! u = u₀ + G · (a_ref − a)
//! G = (m / k_f) · [∂R/∂φ·g·ω | ∂R/∂θ·g·ω | R·g]⁻¹
//! ```
//!
//! where `g` is the thrust direction set by the gimbal.

use nalgebra::{DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ensure_len, Error, Result};
use crate::geometry::{rotation_matrix, rotation_matrix_dpitch, rotation_matrix_droll};
use crate::params::VehicleParams;

/// Composed matrices with a smaller determinant magnitude are treated as singular.
pub const SINGULARITY_TOLERANCE: f64 = 1e-9;

/// Fraction of the hover speed below which [`IndiParams::from_vehicle`]
/// considers the attitude channels uncontrollable.
pub const MIN_PROP_SPEED_FRACTION: f64 = 0.1;

/// Physical parameters used to scale the inverted effectiveness.
///
/// # Fields
///
/// * `mass` - Vehicle mass (kg)
/// * `force_constant` - Thrust per unit propeller speed along `g` (N⋅s/rad)
/// * `min_prop_speed` - Smallest propeller speed magnitude at which the
///   effectiveness is computed (rad/s). The roll and pitch columns scale with
///   the propeller speed, so their inverse grows without bound near zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndiParams {
    pub mass: f64,
    pub force_constant: f64,
    #[serde(default)]
    pub min_prop_speed: f64,
}

impl IndiParams {
    pub fn new(mass: f64, force_constant: f64, min_prop_speed: f64) -> Result<Self> {
        let params = Self {
            mass,
            force_constant,
            min_prop_speed,
        };
        params.validate()?;
        Ok(params)
    }

    /// Parameters of `vehicle`.
    ///
    /// Thrust acts along `-g`, so the force constant enters with a negative sign.
    /// The minimum propeller speed is [`MIN_PROP_SPEED_FRACTION`] of hover.
    pub fn from_vehicle(vehicle: &VehicleParams) -> Self {
        Self {
            mass: vehicle.mass,
            force_constant: -vehicle.force_constant(),
            min_prop_speed: MIN_PROP_SPEED_FRACTION * vehicle.hover_speed().abs(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "INDI mass must be positive, got {}",
                self.mass
            )));
        }
        if !self.force_constant.is_finite() || self.force_constant == 0.0 {
            return Err(Error::InvalidParameter(format!(
                "INDI force constant must be finite and non-zero, got {}",
                self.force_constant
            )));
        }
        if !(self.min_prop_speed.is_finite() && self.min_prop_speed >= 0.0) {
            return Err(Error::InvalidParameter(format!(
                "INDI minimum propeller speed must be non-negative, got {}",
                self.min_prop_speed
            )));
        }
        Ok(())
    }
}

/// INDI law over three channels: `[roll, pitch, propeller speed]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Indi {
    params: IndiParams,
    effectiveness: Option<Matrix3<f64>>,
    current_input: Vector3<f64>,
}

impl Indi {
    pub const CHANNELS: usize = 3;

    pub fn new(params: IndiParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            effectiveness: None,
            current_input: Vector3::zeros(),
        })
    }

    pub fn params(&self) -> &IndiParams {
        &self.params
    }

    /// Most recent valid control-effectiveness matrix.
    pub fn effectiveness(&self) -> Option<&Matrix3<f64>> {
        self.effectiveness.as_ref()
    }

    /// Operating point `[roll, pitch, propeller speed]` of the last valid update.
    pub fn current_input(&self) -> &Vector3<f64> {
        &self.current_input
    }

    /// Recomputes the control-effectiveness matrix at the current operating point.
    ///
    /// # Arguments
    ///
    /// * `attitude` - Euler angles `[roll, pitch, yaw]` (rad)
    /// * `gimbal` - Gimbal angles `[gimbal_x, gimbal_y]` (rad)
    /// * `prop_speed` - Propeller speed (rad/s)
    ///
    /// # Errors
    ///
    /// [`Error::SingularMatrix`] when the composed matrix cannot be inverted
    /// or the propeller speed is below `min_prop_speed`, where the roll and
    /// pitch columns are too small to invert meaningfully. The previous
    /// matrix and operating point are kept.
    pub fn compute_control_effectiveness(
        &mut self,
        attitude: &Vector3<f64>,
        gimbal: &[f64],
        prop_speed: f64,
    ) -> Result<()> {
        ensure_len("gimbal angles", 2, gimbal.len())?;
        let (sin_t1, cos_t1) = gimbal[0].sin_cos();
        let (sin_t2, cos_t2) = gimbal[1].sin_cos();
        let g = Vector3::new(sin_t2, -sin_t1 * cos_t2, cos_t1 * cos_t2);

        let composed = Matrix3::from_columns(&[
            rotation_matrix_droll(attitude) * g * prop_speed,
            rotation_matrix_dpitch(attitude) * g * prop_speed,
            rotation_matrix(attitude) * g,
        ]);

        let determinant = composed.determinant();
        if !determinant.is_finite()
            || determinant.abs() < SINGULARITY_TOLERANCE
            || prop_speed.abs() < self.params.min_prop_speed
        {
            return Err(Error::SingularMatrix { determinant });
        }
        let inverse = composed
            .try_inverse()
            .ok_or(Error::SingularMatrix { determinant })?;

        self.effectiveness = Some(inverse * (self.params.mass / self.params.force_constant));
        self.current_input = Vector3::new(attitude[0], attitude[1], prop_speed);

        trace!(determinant, prop_speed, "control effectiveness updated");
        Ok(())
    }

    /// Returns `current_input + G · error`.
    ///
    /// # Errors
    ///
    /// [`Error::ControlUnavailable`] until a first call to
    /// [`Indi::compute_control_effectiveness`] has succeeded.
    pub fn determine_control_action(&self, error: &DVector<f64>) -> Result<DVector<f64>> {
        ensure_len("acceleration error", Self::CHANNELS, error.len())?;
        let effectiveness = self.effectiveness.ok_or(Error::ControlUnavailable(
            "no control effectiveness computed yet",
        ))?;

        let error = Vector3::new(error[0], error[1], error[2]);
        let action = self.current_input + effectiveness * error;
        Ok(DVector::from_column_slice(action.as_slice()))
    }
}
