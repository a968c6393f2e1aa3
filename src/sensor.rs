use nalgebra::{Vector3, Vector4};

use crate::dynamics::OBSERVATION_LEN;
use crate::error::{ensure_len, Result};
use crate::geometry::euler_to_quaternion;

/// Named quantities decoded by the [`Sensor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantity {
    EulerAngles,
    Quaternion,
    AngularVelocity,
    Position,
    Acceleration,
    LinearAcceleration,
    Gravity,
}

impl Quantity {
    /// Number of values in the quantity.
    pub fn len(self) -> usize {
        match self {
            Quantity::Quaternion => 4,
            _ => 3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Quantity::EulerAngles => "euler angles",
            Quantity::Quaternion => "quaternion",
            Quantity::AngularVelocity => "angular velocity",
            Quantity::Position => "position",
            Quantity::Acceleration => "acceleration",
            Quantity::LinearAcceleration => "linear acceleration",
            Quantity::Gravity => "gravity vector",
        }
    }
}

/// IMU-like decoder of the 18-slot dynamics observation.
///
/// Holds the most recent decode; a rejected observation leaves it unchanged.
#[derive(Clone, Debug, Default)]
pub struct Sensor {
    euler: Vector3<f64>,
    quaternion: Vector4<f64>,
    angular_velocity: Vector3<f64>,
    position: Vector3<f64>,
    acceleration: Vector3<f64>,
    gravity: Vector3<f64>,
    linear_acceleration: Vector3<f64>,
}

impl Sensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a raw observation of exactly 18 values.
    pub fn process_output(&mut self, raw: &[f64]) -> Result<()> {
        ensure_len("system output", OBSERVATION_LEN, raw.len())?;

        let slot = |i: usize| Vector3::new(raw[i], raw[i + 1], raw[i + 2]);
        self.euler = slot(0);
        self.angular_velocity = slot(3);
        self.position = slot(6);
        self.acceleration = slot(12);
        self.gravity = slot(15);
        self.quaternion = euler_to_quaternion(&self.euler);
        self.linear_acceleration = self.acceleration - self.gravity;
        Ok(())
    }

    pub fn euler_angles(&self) -> Vector3<f64> {
        self.euler
    }

    /// Attitude quaternion `[w, x, y, z]`.
    pub fn quaternion(&self) -> Vector4<f64> {
        self.quaternion
    }

    pub fn angular_velocity(&self) -> Vector3<f64> {
        self.angular_velocity
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    /// Body-frame acceleration including gravity.
    pub fn acceleration(&self) -> Vector3<f64> {
        self.acceleration
    }

    /// Body-frame acceleration with gravity removed.
    pub fn linear_acceleration(&self) -> Vector3<f64> {
        self.linear_acceleration
    }

    pub fn gravity(&self) -> Vector3<f64> {
        self.gravity
    }

    /// Copies `quantity` into `out`, whose length must match the quantity.
    pub fn read(&self, quantity: Quantity, out: &mut [f64]) -> Result<()> {
        ensure_len(quantity.name(), quantity.len(), out.len())?;
        match quantity {
            Quantity::Quaternion => out.copy_from_slice(self.quaternion.as_slice()),
            Quantity::EulerAngles => out.copy_from_slice(self.euler.as_slice()),
            Quantity::AngularVelocity => out.copy_from_slice(self.angular_velocity.as_slice()),
            Quantity::Position => out.copy_from_slice(self.position.as_slice()),
            Quantity::Acceleration => out.copy_from_slice(self.acceleration.as_slice()),
            Quantity::LinearAcceleration => {
                out.copy_from_slice(self.linear_acceleration.as_slice())
            }
            Quantity::Gravity => out.copy_from_slice(self.gravity.as_slice()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use approx::assert_relative_eq;

    fn raw() -> Vec<f64> {
        (0..OBSERVATION_LEN).map(|i| i as f64 * 0.1).collect()
    }

    #[test]
    fn test_decodes_fixed_slots() {
        let mut sensor = Sensor::new();
        sensor.process_output(&raw()).unwrap();

        assert_relative_eq!(sensor.euler_angles(), Vector3::new(0.0, 0.1, 0.2));
        assert_relative_eq!(sensor.angular_velocity(), Vector3::new(0.3, 0.4, 0.5));
        assert_relative_eq!(sensor.position(), Vector3::new(0.6, 0.7, 0.8));
        assert_relative_eq!(sensor.acceleration(), Vector3::new(1.2, 1.3, 1.4));
        assert_relative_eq!(sensor.gravity(), Vector3::new(1.5, 1.6, 1.7));
        assert_relative_eq!(
            sensor.linear_acceleration(),
            Vector3::from_element(-0.3),
            epsilon = 1e-12
        );
        assert_relative_eq!(sensor.quaternion().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_read_checks_buffer_length() {
        let mut sensor = Sensor::new();
        sensor.process_output(&raw()).unwrap();

        let mut q = [0.0; 4];
        sensor.read(Quantity::Quaternion, &mut q).unwrap();
        assert_eq!(q, <[f64; 4]>::from(sensor.quaternion()));

        let mut short = [0.0; 3];
        assert!(matches!(
            sensor.read(Quantity::Quaternion, &mut short),
            Err(Error::DimensionMismatch {
                expected: 4,
                actual: 3,
                ..
            })
        ));
        sensor.read(Quantity::Position, &mut short).unwrap();
        assert_relative_eq!(Vector3::from(short), Vector3::new(0.6, 0.7, 0.8));
    }

    #[test]
    fn test_wrong_length_keeps_previous_decode() {
        let mut sensor = Sensor::new();
        sensor.process_output(&raw()).unwrap();

        assert!(sensor.process_output(&[0.0; 12]).is_err());
        assert_relative_eq!(sensor.position(), Vector3::new(0.6, 0.7, 0.8));
    }
}
