use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Physical constants and properties of the thrust-vectored vehicle.
///
/// The vehicle carries two coaxial, contra-rotating propellers mounted on a
/// two-axis gimbal below the centre of gravity. All quantities are SI and
/// body-frame (x forward, y right, z down).
///
/// # Fields
///
/// * `mass` - Total mass (kg)
/// * `gravity` - Gravitational acceleration (m/s²)
/// * `air_density` - Air density used by the drag model (kg/m³)
/// * `ixx` .. `iyz` - Inertia tensor entries and products of inertia (kg⋅m²)
/// * `rcg` - Distance from the centre of gravity to the propellers (m)
/// * `rcp` - Distance from the centre of gravity to the centre of pressure (m)
/// * `area_*` - Drag reference areas (m²)
/// * `cd_*` - Drag coefficients (-)
/// * `kf_*`, `km_*` - Propeller force and moment constants, upper and lower rotor
/// * `thrust_offset_*` - Lateral offset between the thrust line and the centre of gravity (m)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    pub mass: f64,
    pub gravity: f64,
    pub air_density: f64,
    pub ixx: f64,
    pub iyy: f64,
    pub izz: f64,
    pub ixy: f64,
    pub ixz: f64,
    pub iyz: f64,
    pub rcg: f64,
    pub rcp: f64,
    pub area_x: f64,
    pub area_y: f64,
    pub area_z: f64,
    pub cd_x: f64,
    pub cd_y: f64,
    pub cd_z: f64,
    pub kf_upper: f64,
    pub kf_lower: f64,
    pub km_upper: f64,
    pub km_lower: f64,
    pub thrust_offset_x: f64,
    pub thrust_offset_y: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            mass: 1.75,
            gravity: 9.81,
            air_density: 1.225,
            ixx: 0.118825,
            iyy: 0.118825,
            izz: 0.0735875,
            ixy: 0.0,
            ixz: 0.0,
            iyz: 0.0,
            rcg: 0.5,
            rcp: 0.3,
            area_x: 0.01,
            area_y: 0.01,
            area_z: 0.126,
            cd_x: 0.7,
            cd_y: 0.7,
            cd_z: 0.45,
            kf_upper: 0.00377,
            kf_lower: -0.00377,
            km_upper: 0.01,
            km_lower: 0.01,
            thrust_offset_x: 0.01,
            thrust_offset_y: 0.01,
        }
    }
}

impl VehicleParams {
    /// Full inertia tensor built from the principal moments and products of inertia.
    pub fn inertia(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.ixx, -self.ixy, -self.ixz, //
            -self.ixy, self.iyy, -self.iyz, //
            -self.ixz, -self.iyz, self.izz,
        )
    }

    /// Net thrust magnitude of the propeller pair spinning at `omega` (upper) and `-omega` (lower).
    pub fn thrust(&self, omega: f64) -> f64 {
        self.kf_upper * omega + self.kf_lower * -omega
    }

    /// Net reaction torque of the propeller pair.
    pub fn reaction_torque(&self, omega: f64) -> f64 {
        self.km_upper * omega + self.km_lower * -omega
    }

    /// Combined force constant of both rotors, `dT/dω`.
    pub fn force_constant(&self) -> f64 {
        self.kf_upper - self.kf_lower
    }

    /// Propeller speed at which thrust balances weight with zero gimbal deflection.
    pub fn hover_speed(&self) -> f64 {
        self.mass * self.gravity / self.force_constant()
    }

    /// Rejects non-physical parameter sets.
    pub fn validate(&self) -> Result<()> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "mass must be positive, got {}",
                self.mass
            )));
        }
        if !self.gravity.is_finite() || !self.air_density.is_finite() || self.air_density < 0.0 {
            return Err(Error::InvalidParameter(
                "gravity and air density must be finite, air density non-negative".into(),
            ));
        }
        if self.force_constant() == 0.0 {
            return Err(Error::InvalidParameter(
                "propeller force constants cancel out".into(),
            ));
        }
        let inertia = self.inertia();
        let determinant = inertia.determinant();
        if self.ixx <= 0.0 || self.iyy <= 0.0 || self.izz <= 0.0 || determinant.abs() < 1e-12 {
            return Err(Error::SingularMatrix { determinant });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_hover_speed() {
        let params = VehicleParams::default();
        assert_relative_eq!(params.hover_speed(), 2276.856764, epsilon = 1e-3);
        assert_relative_eq!(
            params.thrust(params.hover_speed()),
            params.mass * params.gravity,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_reaction_torque_cancels_for_matched_rotors() {
        let params = VehicleParams::default();
        assert_eq!(params.reaction_torque(1500.0), 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_mass_and_inertia() {
        assert!(VehicleParams::default().validate().is_ok());

        let massless = VehicleParams {
            mass: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            massless.validate(),
            Err(Error::InvalidParameter(_))
        ));

        let flat = VehicleParams {
            izz: 0.0,
            ..Default::default()
        };
        assert!(matches!(flat.validate(), Err(Error::SingularMatrix { .. })));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let params: VehicleParams = toml::from_str("mass = 2.0\nrcg = 0.4\n").unwrap();
        assert_eq!(params.mass, 2.0);
        assert_eq!(params.rcg, 0.4);
        assert_eq!(params.izz, VehicleParams::default().izz);
    }
}
