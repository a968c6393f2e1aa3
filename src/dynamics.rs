use fast_ode::{Coord, DifferentialEquation};
use nalgebra::{Matrix3, SVector, Vector3};
use tracing::{debug, trace};

use crate::error::{ensure_len, Error, Result};
use crate::geometry::rotation_matrix;
use crate::integrator::{rk4_step, solve_adaptive};
use crate::params::VehicleParams;

/// Number of state variables.
pub const STATE_LEN: usize = 12;
/// Number of control inputs accepted by the dynamics.
pub const CONTROL_LEN: usize = 3;
/// Number of slots in an [`Observation`].
pub const OBSERVATION_LEN: usize = 18;

/// Fixed-layout system output produced by [`RigidBodyDynamics::step`].
///
/// | slots | content                                   |
/// |-------|-------------------------------------------|
/// | 0-2   | roll, pitch, yaw (rad)                    |
/// | 3-5   | body rates p, q, r (rad/s)                |
/// | 6-8   | earth-frame position x, y, z (m, NED)     |
/// | 9-11  | body-frame velocity u, v, w (m/s)         |
/// | 12-14 | body-frame acceleration `F/m` (m/s²)      |
/// | 15-17 | body-frame gravity vector (m/s²)          |
pub type Observation = SVector<f64, OBSERVATION_LEN>;

/// Represents the complete state of the vehicle.
///
/// # Fields
///
/// * `roll`, `pitch`, `yaw` - Euler angles of the body relative to the earth frame (radians)
/// * `roll_rate`, `pitch_rate`, `yaw_rate` - Angular velocities in the body frame (rad/s)
/// * `x`, `y`, `z` - Position in the earth frame, NED, so `z` is negative above ground (meters)
/// * `u`, `v`, `w` - Linear velocities in the body frame (m/s)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct State {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll_rate: f64,
    pub pitch_rate: f64,
    pub yaw_rate: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub u: f64,
    pub v: f64,
    pub w: f64,
}

impl State {
    /// Converts the state structure to a fixed-size array.
    ///
    /// # Returns
    ///
    /// A 12-element array in the order
    /// [roll, pitch, yaw, roll_rate, pitch_rate, yaw_rate, x, y, z, u, v, w]
    pub fn to_array(&self) -> [f64; STATE_LEN] {
        [
            self.roll,
            self.pitch,
            self.yaw,
            self.roll_rate,
            self.pitch_rate,
            self.yaw_rate,
            self.x,
            self.y,
            self.z,
            self.u,
            self.v,
            self.w,
        ]
    }

    /// Creates a state structure from an array in the order of [`State::to_array`].
    pub fn from_array(arr: &[f64; STATE_LEN]) -> Self {
        State {
            roll: arr[0],
            pitch: arr[1],
            yaw: arr[2],
            roll_rate: arr[3],
            pitch_rate: arr[4],
            yaw_rate: arr[5],
            x: arr[6],
            y: arr[7],
            z: arr[8],
            u: arr[9],
            v: arr[10],
            w: arr[11],
        }
    }

    /// Creates a state from a slice, which must hold exactly 12 values.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        ensure_len("state", STATE_LEN, values.len())?;
        let mut arr = [0.0; STATE_LEN];
        arr.copy_from_slice(values);
        Ok(Self::from_array(&arr))
    }

    pub fn to_vector(&self) -> SVector<f64, STATE_LEN> {
        SVector::from(self.to_array())
    }

    pub fn from_vector(x: &SVector<f64, STATE_LEN>) -> Self {
        let mut arr = [0.0; STATE_LEN];
        arr.copy_from_slice(x.as_slice());
        Self::from_array(&arr)
    }

    pub fn euler(&self) -> Vector3<f64> {
        Vector3::new(self.roll, self.pitch, self.yaw)
    }

    pub fn body_rates(&self) -> Vector3<f64> {
        Vector3::new(self.roll_rate, self.pitch_rate, self.yaw_rate)
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn body_velocity(&self) -> Vector3<f64> {
        Vector3::new(self.u, self.v, self.w)
    }
}

/// Command accepted by the dynamics: two gimbal angles and the propeller speed.
///
/// The upper propeller spins at `prop_speed`, the lower one at `-prop_speed`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlInput {
    /// Gimbal rotation about the body x-axis (rad)
    pub gimbal_x: f64,
    /// Gimbal rotation about the body y-axis (rad)
    pub gimbal_y: f64,
    /// Rotational velocity of the upper propeller (rad/s)
    pub prop_speed: f64,
}

impl ControlInput {
    /// Unpacks `[gimbal_x, gimbal_y, prop_speed]`.
    pub fn from_slice(u: &[f64]) -> Result<Self> {
        ensure_len("control input", CONTROL_LEN, u.len())?;
        Ok(Self {
            gimbal_x: u[0],
            gimbal_y: u[1],
            prop_speed: u[2],
        })
    }

    /// Straight-down thrust that balances the weight of the vehicle.
    pub fn hover(params: &VehicleParams) -> Self {
        Self {
            gimbal_x: 0.0,
            gimbal_y: 0.0,
            prop_speed: params.hover_speed(),
        }
    }

    pub fn to_array(&self) -> [f64; CONTROL_LEN] {
        [self.gimbal_x, self.gimbal_y, self.prop_speed]
    }
}

/// Equations of motion of the vehicle under a constant command.
///
/// This structure implements the rigid-body model used by both the fixed-step
/// integrator and the adaptive reference solver.
///
/// # Fields
///
/// * `params` - Physical constants and vehicle properties
/// * `inertia` - Inertia tensor, including products of inertia
/// * `inertia_inv` - Inverse of `inertia`
/// * `command` - Gimbal angles and propeller speed held over the interval
pub struct VehicleOde<'a> {
    pub params: &'a VehicleParams,
    pub inertia: Matrix3<f64>,
    pub inertia_inv: Matrix3<f64>,
    pub command: ControlInput,
}

impl VehicleOde<'_> {
    /// Gravity resolved in the body frame (N).
    pub fn gravity_force(&self, x: &SVector<f64, STATE_LEN>) -> Vector3<f64> {
        let weight = self.params.mass * self.params.gravity;
        let (sin_phi, cos_phi) = x[0].sin_cos();
        let (sin_theta, cos_theta) = x[1].sin_cos();

        Vector3::new(
            -sin_theta * weight,
            sin_phi * cos_theta * weight,
            cos_phi * cos_theta * weight,
        )
    }

    /// Net body-frame force: gravity, gimbaled thrust and quadratic drag (N).
    pub fn force(&self, x: &SVector<f64, STATE_LEN>) -> Vector3<f64> {
        let p = self.params;
        let (sin_t1, cos_t1) = self.command.gimbal_x.sin_cos();
        let (sin_t2, cos_t2) = self.command.gimbal_y.sin_cos();
        let thrust = p.thrust(self.command.prop_speed);

        let thrust_force = Vector3::new(-sin_t2, sin_t1 * cos_t2, -cos_t1 * cos_t2) * thrust;

        // Drag opposes the body velocity on each axis
        let q = 0.5 * p.air_density;
        let drag = Vector3::new(
            -q * x[9] * x[9].abs() * p.cd_x * p.area_x,
            -q * x[10] * x[10].abs() * p.cd_y * p.area_y,
            -q * x[11] * x[11].abs() * p.cd_z * p.area_z,
        );

        self.gravity_force(x) + thrust_force + drag
    }

    /// Gyroscopic moment of the spinning propellers.
    ///
    /// Always zero: the counter-rotating pair is modelled without rotor inertia.
    pub fn gyroscopic_moment(&self) -> Vector3<f64> {
        Vector3::zeros()
    }

    /// Net body-frame moment: control, aerodynamic and thrust-offset terms (N⋅m).
    pub fn moment(&self, x: &SVector<f64, STATE_LEN>) -> Vector3<f64> {
        let p = self.params;
        let (sin_t1, cos_t1) = self.command.gimbal_x.sin_cos();
        let (sin_t2, cos_t2) = self.command.gimbal_y.sin_cos();
        let thrust = p.thrust(self.command.prop_speed);
        let torque = p.reaction_torque(self.command.prop_speed);

        // Thrust acts at the gimbal, `rcg` below the centre of gravity
        let control = Vector3::new(
            -p.rcg * sin_t1 * cos_t2 * thrust - sin_t2 * torque,
            -p.rcg * sin_t2 * thrust + sin_t1 * cos_t2 * torque,
            -cos_t1 * cos_t2 * torque,
        );

        let q = 0.5 * p.air_density;
        let drag = Vector3::new(
            -q * x[9] * x[9].abs() * p.cd_x * p.area_x,
            -q * x[10] * x[10].abs() * p.cd_y * p.area_y,
            -q * x[11] * x[11].abs() * p.cd_z * p.area_z,
        );
        let aerodynamic = Vector3::new(0.0, 0.0, p.rcp).cross(&drag);

        let vertical_thrust = cos_t1 * cos_t2 * thrust;
        let offset = Vector3::new(
            vertical_thrust * p.thrust_offset_y,
            -vertical_thrust * p.thrust_offset_x,
            0.0,
        );

        control + aerodynamic + offset - self.gyroscopic_moment()
    }

    /// Computes the time derivative of the 12-element state.
    ///
    /// # Physics Implementation
    ///
    /// 1. Attitude derivatives: Euler angle kinematics (singular at θ = ±π/2)
    /// 2. Body-rate derivatives: ω̇ = I⁻¹ (M − ω × Iω)
    /// 3. Position derivatives: body velocity rotated into the earth frame
    /// 4. Body-velocity derivatives: v̇ = F/m − ω × v
    pub fn state_derivative(&self, x: &SVector<f64, STATE_LEN>) -> SVector<f64, STATE_LEN> {
        let phi = x[0];
        let theta = x[1];
        let omega = Vector3::new(x[3], x[4], x[5]);
        let velocity = Vector3::new(x[9], x[10], x[11]);

        let (sin_phi, cos_phi) = phi.sin_cos();
        let cos_theta = theta.cos();
        let tan_theta = theta.tan();

        let force = self.force(x);
        let moment = self.moment(x);

        let mut dot_y = SVector::<f64, STATE_LEN>::zeros();

        // Attitude derivatives (Euler angle rates)
        let (p, q, r) = (omega.x, omega.y, omega.z);
        dot_y[0] = p + (q * sin_phi + r * cos_phi) * tan_theta; // φ̇
        dot_y[1] = q * cos_phi - r * sin_phi; // θ̇
        dot_y[2] = (q * sin_phi + r * cos_phi) / cos_theta; // ψ̇

        // Angular velocity derivatives (Euler's equations)
        let omega_dot = self.inertia_inv * (moment - omega.cross(&(self.inertia * omega)));
        dot_y.fixed_rows_mut::<3>(3).copy_from(&omega_dot);

        // Position derivatives (earth frame)
        let euler = Vector3::new(x[0], x[1], x[2]);
        let position_dot = rotation_matrix(&euler) * velocity;
        dot_y.fixed_rows_mut::<3>(6).copy_from(&position_dot);

        // Body velocity derivatives
        let velocity_dot = force / self.params.mass - omega.cross(&velocity);
        dot_y.fixed_rows_mut::<3>(9).copy_from(&velocity_dot);

        dot_y
    }
}

impl DifferentialEquation<STATE_LEN> for VehicleOde<'_> {
    fn ode_dot_y(&self, _t: f64, y: &Coord<STATE_LEN>) -> (Coord<STATE_LEN>, bool) {
        let x = SVector::<f64, STATE_LEN>::from(y.0);
        let dot_y = self.state_derivative(&x);

        let mut out = [0.0; STATE_LEN];
        out.copy_from_slice(dot_y.as_slice());
        let finite = out.iter().all(|v| v.is_finite());
        (Coord(out), finite)
    }
}

/// Rigid-body dynamics of the vehicle, integrated at a fixed sampling time.
///
/// Owns the state exclusively: it changes only through [`RigidBodyDynamics::step`].
#[derive(Clone, Debug)]
pub struct RigidBodyDynamics {
    params: VehicleParams,
    inertia: Matrix3<f64>,
    inertia_inv: Matrix3<f64>,
    state: SVector<f64, STATE_LEN>,
    time: f64,
    sampling_time: f64,
}

impl RigidBodyDynamics {
    /// Creates the dynamics of the reference vehicle.
    ///
    /// # Arguments
    ///
    /// * `initial_state` - 12 state values in the order of [`State::to_array`]
    /// * `initial_time` - Simulation time of `initial_state` (s)
    /// * `sampling_time` - Fixed integration step (s)
    pub fn new(initial_state: &[f64], initial_time: f64, sampling_time: f64) -> Result<Self> {
        Self::with_params(
            VehicleParams::default(),
            initial_state,
            initial_time,
            sampling_time,
        )
    }

    /// Creates the dynamics of a vehicle with the given parameters.
    pub fn with_params(
        params: VehicleParams,
        initial_state: &[f64],
        initial_time: f64,
        sampling_time: f64,
    ) -> Result<Self> {
        let state = State::from_slice(initial_state)?.to_vector();
        if !(sampling_time.is_finite() && sampling_time > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "sampling time must be positive, got {sampling_time}"
            )));
        }
        params.validate()?;

        let inertia = params.inertia();
        let inertia_inv = inertia.try_inverse().ok_or(Error::SingularMatrix {
            determinant: inertia.determinant(),
        })?;

        debug!(
            initial_time,
            sampling_time,
            mass = params.mass,
            "rigid-body dynamics initialised"
        );

        Ok(Self {
            params,
            inertia,
            inertia_inv,
            state,
            time: initial_time,
            sampling_time,
        })
    }

    fn ode(&self, command: ControlInput) -> VehicleOde<'_> {
        VehicleOde {
            params: &self.params,
            inertia: self.inertia,
            inertia_inv: self.inertia_inv,
            command,
        }
    }

    /// Advances the state by one sampling interval and returns the new observation.
    ///
    /// `u` is `[gimbal_x, gimbal_y, prop_speed]`; any other length is rejected
    /// before the state is touched.
    pub fn step(&mut self, u: &[f64]) -> Result<Observation> {
        let command = ControlInput::from_slice(u)?;

        let next = rk4_step(&self.ode(command), self.time, &self.state, self.sampling_time);
        self.state = next;
        self.time += self.sampling_time;

        trace!(
            time = self.time,
            altitude = self.state[8],
            roll = self.state[0],
            pitch = self.state[1],
            "dynamics step"
        );

        Ok(self.observe(&command))
    }

    /// State derivative for an arbitrary state and command.
    pub fn eom(&self, _t: f64, x: &SVector<f64, STATE_LEN>, u: &ControlInput) -> SVector<f64, STATE_LEN> {
        self.ode(*u).state_derivative(x)
    }

    /// Builds the 18-slot observation of the current state under `command`.
    pub fn observe(&self, command: &ControlInput) -> Observation {
        let ode = self.ode(*command);
        let acceleration = ode.force(&self.state) / self.params.mass;
        let gravity = ode.gravity_force(&self.state) / self.params.mass;

        let mut y = Observation::zeros();
        y.fixed_rows_mut::<STATE_LEN>(0).copy_from(&self.state);
        y.fixed_rows_mut::<3>(12).copy_from(&acceleration);
        y.fixed_rows_mut::<3>(15).copy_from(&gravity);
        y
    }

    /// Integrates from the current state over `duration` with the adaptive solver.
    ///
    /// The command is held constant. The owned state is not modified; the
    /// result is meant as a reference for the fixed-step propagation.
    pub fn propagate_adaptive(&self, u: &[f64], duration: f64, tolerance: f64) -> Result<State> {
        let command = ControlInput::from_slice(u)?;
        let span = (self.time, self.time + duration);
        let final_state = solve_adaptive(&self.ode(command), span, &self.state, tolerance)?;
        Ok(State::from_vector(&final_state))
    }

    pub fn state(&self) -> State {
        State::from_vector(&self.state)
    }

    pub fn state_vector(&self) -> &SVector<f64, STATE_LEN> {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn sampling_time(&self) -> f64 {
        self.sampling_time
    }

    pub fn params(&self) -> &VehicleParams {
        &self.params
    }

    /// Velocity expressed in the earth frame (m/s).
    pub fn earth_velocity(&self) -> Vector3<f64> {
        let state = self.state();
        rotation_matrix(&state.euler()) * state.body_velocity()
    }
}
