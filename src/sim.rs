//! Closed-loop scenarios.
//!
//! Each loop runs a fixed number of sampling intervals in the order
//! sensor → controllers → actuators → dynamics and records a [`Trajectory`].
//! Integration stops once the vehicle touches the ground (`z > 0` in NED);
//! the remaining samples repeat the last recorded values.

use std::fs;
use std::path::Path;

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::{info, warn};

use crate::config::{LoopConfig, PositionLoopConfig, TimeSettings};
use crate::control::{Controller, IndiParams};
use crate::dynamics::{ControlInput, RigidBodyDynamics, State, STATE_LEN};
use crate::error::{ensure_len, Error, Result};
use crate::geometry::body_to_earth;
use crate::io::save_matrix;
use crate::saturator::Actuator;
use crate::sensor::Sensor;

/// Rows of [`Trajectory::inputs`]: applied command followed by the realised
/// servo and propeller rates.
pub const INPUT_ROWS: usize = 6;

const PROGRESS_INTERVAL: usize = 50;

/// Recorded signals of a closed-loop run, one column per sample.
///
/// Column 0 holds the initial condition; column `k` the values after `k`
/// sampling intervals.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub states: DMatrix<f64>,
    pub inputs: DMatrix<f64>,
    pub references: DMatrix<f64>,
    pub times: DMatrix<f64>,
}

impl Trajectory {
    fn new(state_rows: usize, reference_rows: usize, samples: usize) -> Self {
        Self {
            states: DMatrix::zeros(state_rows, samples),
            inputs: DMatrix::zeros(INPUT_ROWS, samples),
            references: DMatrix::zeros(reference_rows, samples),
            times: DMatrix::zeros(1, samples),
        }
    }

    fn record(&mut self, k: usize, state: &[f64], input: &[f64], reference: &[f64], time: f64) {
        self.states.column_mut(k).copy_from_slice(state);
        self.inputs.column_mut(k).copy_from_slice(input);
        self.references.column_mut(k).copy_from_slice(reference);
        self.times[(0, k)] = time;
    }

    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        self.times.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.times.ncols() == 0
    }

    /// Vehicle state of sample `k`.
    pub fn state(&self, k: usize) -> Option<State> {
        if k >= self.len() {
            return None;
        }
        let column: Vec<f64> = self.states.column(k).iter().take(STATE_LEN).copied().collect();
        State::from_slice(&column).ok()
    }

    pub fn final_state(&self) -> Option<State> {
        self.len().checked_sub(1).and_then(|k| self.state(k))
    }

    /// Writes `state.csv`, `input.csv`, `ref.csv` and `time.csv` into `dir`,
    /// creating it if needed.
    pub fn export(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        save_matrix(dir.join("state.csv"), &self.states)?;
        save_matrix(dir.join("input.csv"), &self.inputs)?;
        save_matrix(dir.join("ref.csv"), &self.references)?;
        save_matrix(dir.join("time.csv"), &self.times)?;

        info!(dir = %dir.display(), samples = self.len(), "trajectory exported");
        Ok(())
    }
}

fn airborne(dynamics: &RigidBodyDynamics) -> bool {
    dynamics.state().z <= 0.0
}

fn report_ground_contact(dynamics: &RigidBodyDynamics, landed: &mut bool) {
    if !*landed {
        warn!(
            time = dynamics.time(),
            altitude = dynamics.state().z,
            "ground contact, integration stopped"
        );
        *landed = true;
    }
}

fn log_progress(iteration: usize, total: usize, dynamics: &RigidBodyDynamics) {
    if iteration % PROGRESS_INTERVAL == 0 {
        info!(
            iteration,
            total,
            altitude = dynamics.state().z,
            time = dynamics.time(),
            "closed-loop simulation"
        );
    }
}

fn input_column(command: &[f64], servos: &Actuator, propeller: &Actuator) -> [f64; INPUT_ROWS] {
    [
        command[0],
        command[1],
        command[2],
        servos.control_rate()[0],
        servos.control_rate()[1],
        propeller.control_rate()[0],
    ]
}

/// PID attitude and altitude hold.
///
/// The outer controller acts on `[roll, pitch, z]`. Its first two outputs are
/// roll and pitch rate references for the inner controller, which commands
/// the gimbal servos. The third output corrects the hover propeller speed.
pub struct AttitudeLoop {
    time: TimeSettings,
    reference: [f64; 3],
    hover_feed_forward: f64,
    dynamics: RigidBodyDynamics,
    sensor: Sensor,
    outer: Controller,
    inner: Controller,
    servos: Actuator,
    propeller: Actuator,
}

impl AttitudeLoop {
    pub fn new(config: &LoopConfig) -> Result<Self> {
        let time = config.time;
        time.validate()?;
        let dt = time.sampling_time;

        let dynamics = RigidBodyDynamics::with_params(
            config.vehicle,
            &config.initial_state,
            time.initial_time,
            dt,
        )?;

        let mut outer = Controller::pid(3, 3, dt)?;
        if let Some(pid) = outer.pid_mut() {
            pid.set_gains(&config.outer)?;
        }
        let mut inner = Controller::pid(2, 2, dt)?;
        if let Some(pid) = inner.pid_mut() {
            pid.set_gains(&config.inner)?;
        }

        let mut servos = Actuator::new(2, &[0.0, 0.0], dt)?;
        config.servos.apply(&mut servos)?;
        let mut propeller = Actuator::new(1, &[config.hover_feed_forward], dt)?;
        config.propeller.apply(&mut propeller)?;

        let mut sensor = Sensor::new();
        let initial_command = ControlInput {
            prop_speed: config.hover_feed_forward,
            ..Default::default()
        };
        sensor.process_output(dynamics.observe(&initial_command).as_slice())?;

        let state = dynamics.state();
        outer.init(
            &[state.roll, state.pitch, state.z],
            &[],
            Some(&config.reference),
            time.initial_time,
        )?;
        inner.init(&[state.roll_rate, state.pitch_rate], &[], None, time.initial_time)?;

        Ok(Self {
            time,
            reference: config.reference,
            hover_feed_forward: config.hover_feed_forward,
            dynamics,
            sensor,
            outer,
            inner,
            servos,
            propeller,
        })
    }

    pub fn dynamics(&self) -> &RigidBodyDynamics {
        &self.dynamics
    }

    /// Runs the configured number of iterations.
    pub fn run(&mut self) -> Result<Trajectory> {
        let n = self.time.iterations();
        let dt = self.time.sampling_time;
        let t0 = self.time.initial_time;
        let mut trajectory = Trajectory::new(STATE_LEN, 3, n + 1);

        let mut command = [
            self.servos.last_command()[0],
            self.servos.last_command()[1],
            self.propeller.last_command()[0],
        ];
        trajectory.record(
            0,
            &self.dynamics.state().to_array(),
            &[command[0], command[1], command[2], 0.0, 0.0, 0.0],
            &self.reference,
            t0,
        );

        info!(iterations = n, sampling_time = dt, "attitude hold started");

        let mut landed = false;
        for i in 0..n {
            if airborne(&self.dynamics) {
                let t = self.dynamics.time();
                let attitude = self.sensor.euler_angles();
                let position = self.sensor.position();
                let rates = self.sensor.angular_velocity();

                let u = self
                    .outer
                    .step(t, &[attitude.x, attitude.y, position.z], Some(&self.reference))?
                    .clone();
                let servo_command = self
                    .inner
                    .step(t, &[rates.x, rates.y], Some(&[u[0], u[1]]))?
                    .clone();

                let servos = self.servos.actuate(servo_command.as_slice())?;
                let propeller = self.propeller.actuate(&[u[2] + self.hover_feed_forward])?;
                command = [servos[0], servos[1], propeller[0]];

                let observation = self.dynamics.step(&command)?;
                self.sensor.process_output(observation.as_slice())?;
            } else {
                report_ground_contact(&self.dynamics, &mut landed);
            }

            trajectory.record(
                i + 1,
                &self.dynamics.state().to_array(),
                &input_column(&command, &self.servos, &self.propeller),
                &self.reference,
                t0 + (i + 1) as f64 * dt,
            );
            log_progress(i + 1, n, &self.dynamics);
        }

        Ok(trajectory)
    }
}

/// Rows of the position loop's reference record: rate, attitude,
/// acceleration, velocity and position references.
pub const POSITION_REFERENCE_ROWS: usize = 13;

/// Rows of the position loop's state record: the vehicle state followed by
/// the earth-frame velocity and acceleration.
pub const POSITION_STATE_ROWS: usize = 18;

/// INDI position hold.
///
/// Cascade per step: position PID → velocity PID → INDI on the earth-frame
/// acceleration → attitude reference limiter → attitude PID → rate PID →
/// servos and propeller → dynamics.
pub struct PositionLoop {
    time: TimeSettings,
    reference: DMatrix<f64>,
    dynamics: RigidBodyDynamics,
    sensor: Sensor,
    position: Controller,
    velocity: Controller,
    indi: Controller,
    attitude_reference: Actuator,
    attitude: Controller,
    rate: Controller,
    servos: Actuator,
    propeller: Actuator,
}

impl PositionLoop {
    /// Creates the loop.
    ///
    /// # Arguments
    ///
    /// * `config` - Gains, cut-offs, limits and time grid
    /// * `initial_state` - 12 state values
    /// * `reference` - Earth-frame position reference, 3 rows and at least one
    ///   column per iteration
    pub fn new(
        config: &PositionLoopConfig,
        initial_state: &[f64],
        reference: DMatrix<f64>,
    ) -> Result<Self> {
        let time = config.time;
        time.validate()?;
        let dt = time.sampling_time;

        ensure_len("position reference rows", 3, reference.nrows())?;
        let n = time.iterations();
        if reference.ncols() < n {
            return Err(Error::dimension("position reference columns", n, reference.ncols()));
        }

        let dynamics =
            RigidBodyDynamics::with_params(config.vehicle, initial_state, time.initial_time, dt)?;
        let hover = config.vehicle.hover_speed();

        let mut position = Controller::pid(3, 3, dt)?.with_output_filter(config.position_cutoff)?;
        let mut velocity = Controller::pid(3, 3, dt)?.with_output_filter(config.velocity_cutoff)?;
        let mut attitude = Controller::pid(2, 2, dt)?.with_output_filter(config.attitude_cutoff)?;
        let mut rate = Controller::pid(2, 2, dt)?.with_output_filter(config.rate_cutoff)?;
        for (controller, gains) in [
            (&mut position, &config.position),
            (&mut velocity, &config.velocity),
            (&mut attitude, &config.attitude),
            (&mut rate, &config.rate),
        ] {
            if let Some(pid) = controller.pid_mut() {
                pid.set_gains(gains)?;
            }
        }
        let mut indi = Controller::indi(IndiParams::from_vehicle(&config.vehicle), dt)?;

        let mut servos = Actuator::new(2, &[0.0, 0.0], dt)?;
        if let Some(limits) = &config.servos {
            limits.apply(&mut servos)?;
        }
        let mut propeller = Actuator::new(1, &[hover], dt)?;
        if let Some(limits) = &config.propeller {
            limits.apply(&mut propeller)?;
        }

        let state = dynamics.state();
        let attitude_reference = Actuator::new(2, &[state.roll, state.pitch], dt)?;

        let mut sensor = Sensor::new();
        sensor.process_output(dynamics.observe(&ControlInput::hover(&config.vehicle)).as_slice())?;

        let t0 = time.initial_time;
        let velocity_0 = dynamics.earth_velocity();
        let reference_0: Vec<f64> = reference.column(0).iter().copied().collect();
        position.init(state.position().as_slice(), &[], Some(reference_0.as_slice()), t0)?;
        velocity.init(velocity_0.as_slice(), &[], None, t0)?;
        indi.init(&[0.0, 0.0, 0.0], &[0.0, 0.0, hover], None, t0)?;
        attitude.init(&[state.roll, state.pitch], &[], None, t0)?;
        rate.init(&[state.roll_rate, state.pitch_rate], &[], None, t0)?;

        Ok(Self {
            time,
            reference,
            dynamics,
            sensor,
            position,
            velocity,
            indi,
            attitude_reference,
            attitude,
            rate,
            servos,
            propeller,
        })
    }

    pub fn dynamics(&self) -> &RigidBodyDynamics {
        &self.dynamics
    }

    fn earth_acceleration(&self) -> Vector3<f64> {
        body_to_earth(&self.sensor.euler_angles(), &self.sensor.acceleration())
    }

    fn reference_column(
        &self,
        rate: &DVector<f64>,
        attitude: &[f64],
        acceleration: &DVector<f64>,
        velocity: &DVector<f64>,
    ) -> [f64; POSITION_REFERENCE_ROWS] {
        let position = self.position.reference();
        [
            rate[0],
            rate[1],
            attitude[0],
            attitude[1],
            acceleration[0],
            acceleration[1],
            acceleration[2],
            velocity[0],
            velocity[1],
            velocity[2],
            position[0],
            position[1],
            position[2],
        ]
    }

    fn state_column(&self) -> [f64; POSITION_STATE_ROWS] {
        let mut column = [0.0; POSITION_STATE_ROWS];
        column[..STATE_LEN].copy_from_slice(&self.dynamics.state().to_array());
        column[12..15].copy_from_slice(self.dynamics.earth_velocity().as_slice());
        column[15..18].copy_from_slice(self.earth_acceleration().as_slice());
        column
    }

    /// Runs the configured number of iterations.
    pub fn run(&mut self) -> Result<Trajectory> {
        let n = self.time.iterations();
        let dt = self.time.sampling_time;
        let t0 = self.time.initial_time;
        let mut trajectory = Trajectory::new(POSITION_STATE_ROWS, POSITION_REFERENCE_ROWS, n + 1);

        let mut indi_command = self.indi.output().clone();
        let mut command = [0.0, 0.0, indi_command[2]];
        let mut ref_rate = DVector::zeros(2);
        let mut ref_attitude = [0.0; 2];
        let mut ref_acceleration = DVector::zeros(3);
        let mut ref_velocity = DVector::zeros(3);

        trajectory.record(
            0,
            &self.state_column(),
            &[command[0], command[1], command[2], 0.0, 0.0, 0.0],
            &self.reference_column(&ref_rate, &ref_attitude, &ref_acceleration, &ref_velocity),
            t0,
        );

        info!(iterations = n, sampling_time = dt, "position hold started");

        let mut landed = false;
        for i in 0..n {
            if airborne(&self.dynamics) {
                let t = self.dynamics.time();
                let attitude = self.sensor.euler_angles();
                let rates = self.sensor.angular_velocity();
                let position = self.sensor.position();
                let velocity = self.dynamics.earth_velocity();
                let target: Vec<f64> = self.reference.column(i).iter().copied().collect();

                ref_velocity = self
                    .position
                    .step(t, position.as_slice(), Some(target.as_slice()))?
                    .clone();
                ref_acceleration = self
                    .velocity
                    .step(t, velocity.as_slice(), Some(ref_velocity.as_slice()))?
                    .clone();

                let acceleration = self.earth_acceleration();
                if let Some(indi) = self.indi.indi_mut() {
                    let update = indi.compute_control_effectiveness(
                        &attitude,
                        self.servos.last_command().as_slice(),
                        self.propeller.last_command()[0],
                    );
                    match update {
                        Ok(()) => {}
                        Err(Error::SingularMatrix { determinant }) => {
                            warn!(t, determinant, "singular control effectiveness, keeping previous")
                        }
                        Err(e) => return Err(e),
                    }
                }
                match self.indi.step(
                    t,
                    acceleration.as_slice(),
                    Some(ref_acceleration.as_slice()),
                ) {
                    Ok(u) => indi_command = u.clone(),
                    Err(Error::ControlUnavailable(reason)) => {
                        warn!(t, reason, "INDI unavailable, holding last command")
                    }
                    Err(e) => return Err(e),
                }

                let limited = self
                    .attitude_reference
                    .actuate(&[indi_command[0], indi_command[1]])?;
                ref_attitude = [limited[0], limited[1]];

                ref_rate = self
                    .attitude
                    .step(t, &[attitude.x, attitude.y], Some(&ref_attitude))?
                    .clone();
                let servo_command = self
                    .rate
                    .step(t, &[rates.x, rates.y], Some(ref_rate.as_slice()))?
                    .clone();

                let servos = self.servos.actuate(servo_command.as_slice())?;
                let propeller = self.propeller.actuate(&[indi_command[2]])?;
                command = [servos[0], servos[1], propeller[0]];

                let observation = self.dynamics.step(&command)?;
                self.sensor.process_output(observation.as_slice())?;
            } else {
                report_ground_contact(&self.dynamics, &mut landed);
            }

            trajectory.record(
                i + 1,
                &self.state_column(),
                &input_column(&command, &self.servos, &self.propeller),
                &self.reference_column(&ref_rate, &ref_attitude, &ref_acceleration, &ref_velocity),
                t0 + (i + 1) as f64 * dt,
            );
            log_progress(i + 1, n, &self.dynamics);
        }

        Ok(trajectory)
    }
}
