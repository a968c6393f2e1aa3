//! Attitude and frame helpers.
//!
//! Euler angles are `[roll, pitch, yaw]` in radians. The body-to-earth rotation
//! is `R = Rz(ψ) * Ry(θ) * Rx(φ)`, the same convention as
//! `nalgebra::Rotation3::from_euler_angles`.

use nalgebra::{Matrix3, Vector3, Vector4};

/// Converts Euler angles to a quaternion `[w, x, y, z]` by half-angle composition.
pub fn euler_to_quaternion(euler: &Vector3<f64>) -> Vector4<f64> {
    let (sr, cr) = (euler[0] * 0.5).sin_cos();
    let (sp, cp) = (euler[1] * 0.5).sin_cos();
    let (sy, cy) = (euler[2] * 0.5).sin_cos();

    Vector4::new(
        cr * cp * cy + sr * sp * sy,
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
    )
}

/// Body-to-earth rotation matrix.
pub fn rotation_matrix(euler: &Vector3<f64>) -> Matrix3<f64> {
    let (sin_phi, cos_phi) = euler[0].sin_cos();
    let (sin_theta, cos_theta) = euler[1].sin_cos();
    let (sin_psi, cos_psi) = euler[2].sin_cos();

    Matrix3::new(
        cos_psi * cos_theta,
        -sin_psi * cos_phi + cos_psi * sin_theta * sin_phi,
        sin_psi * sin_phi + cos_psi * sin_theta * cos_phi,
        sin_psi * cos_theta,
        cos_psi * cos_phi + sin_psi * sin_theta * sin_phi,
        -cos_psi * sin_phi + sin_psi * sin_theta * cos_phi,
        -sin_theta,
        cos_theta * sin_phi,
        cos_theta * cos_phi,
    )
}

/// Partial derivative of [`rotation_matrix`] with respect to roll.
pub fn rotation_matrix_droll(euler: &Vector3<f64>) -> Matrix3<f64> {
    let (sin_phi, cos_phi) = euler[0].sin_cos();
    let (sin_theta, cos_theta) = euler[1].sin_cos();
    let (sin_psi, cos_psi) = euler[2].sin_cos();

    Matrix3::new(
        0.0,
        sin_psi * sin_phi + cos_psi * sin_theta * cos_phi,
        sin_psi * cos_phi - cos_psi * sin_theta * sin_phi,
        0.0,
        -cos_psi * sin_phi + sin_psi * sin_theta * cos_phi,
        -cos_psi * cos_phi - sin_psi * sin_theta * sin_phi,
        0.0,
        cos_theta * cos_phi,
        -cos_theta * sin_phi,
    )
}

/// Partial derivative of [`rotation_matrix`] with respect to pitch.
pub fn rotation_matrix_dpitch(euler: &Vector3<f64>) -> Matrix3<f64> {
    let (sin_phi, cos_phi) = euler[0].sin_cos();
    let (sin_theta, cos_theta) = euler[1].sin_cos();
    let (sin_psi, cos_psi) = euler[2].sin_cos();

    Matrix3::new(
        -cos_psi * sin_theta,
        cos_psi * cos_theta * sin_phi,
        cos_psi * cos_theta * cos_phi,
        -sin_psi * sin_theta,
        sin_psi * cos_theta * sin_phi,
        sin_psi * cos_theta * cos_phi,
        -cos_theta,
        -sin_theta * sin_phi,
        -sin_theta * cos_phi,
    )
}

/// Rotates a body-frame vector into the earth (NED) frame.
pub fn body_to_earth(euler: &Vector3<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    rotation_matrix(euler) * v
}

/// Rotates an earth-frame vector into the body frame.
pub fn earth_to_body(euler: &Vector3<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    rotation_matrix(euler).transpose() * v
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, UnitQuaternion};

    #[test]
    fn test_rotation_matches_nalgebra() {
        let euler = Vector3::new(0.3, -0.2, 1.1);
        let expected = Rotation3::from_euler_angles(euler[0], euler[1], euler[2]);
        assert_relative_eq!(rotation_matrix(&euler), *expected.matrix(), epsilon = 1e-12);
    }

    #[test]
    fn test_quaternion_matches_nalgebra() {
        let euler = Vector3::new(-0.4, 0.25, 2.0);
        let q = euler_to_quaternion(&euler);
        let expected = UnitQuaternion::from_euler_angles(euler[0], euler[1], euler[2]);
        assert_relative_eq!(q[0], expected.w, epsilon = 1e-12);
        assert_relative_eq!(q[1], expected.i, epsilon = 1e-12);
        assert_relative_eq!(q[2], expected.j, epsilon = 1e-12);
        assert_relative_eq!(q[3], expected.k, epsilon = 1e-12);
        assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_partials_match_finite_difference() {
        let euler = Vector3::new(0.2, 0.1, -0.7);
        let h = 1e-6;

        let d_roll = (rotation_matrix(&(euler + Vector3::new(h, 0.0, 0.0)))
            - rotation_matrix(&(euler - Vector3::new(h, 0.0, 0.0))))
            / (2.0 * h);
        assert_relative_eq!(rotation_matrix_droll(&euler), d_roll, epsilon = 1e-8);

        let d_pitch = (rotation_matrix(&(euler + Vector3::new(0.0, h, 0.0)))
            - rotation_matrix(&(euler - Vector3::new(0.0, h, 0.0))))
            / (2.0 * h);
        assert_relative_eq!(rotation_matrix_dpitch(&euler), d_pitch, epsilon = 1e-8);
    }

    #[test]
    fn test_frame_round_trip() {
        let euler = Vector3::new(0.1, 0.2, 0.3);
        let v = Vector3::new(1.0, -2.0, 0.5);
        let back = earth_to_body(&euler, &body_to_earth(&euler, &v));
        assert_relative_eq!(back, v, epsilon = 1e-12);
    }
}
