use approx::{assert_abs_diff_eq, assert_relative_eq};
use tvc_sim::dynamics::STATE_LEN;
use tvc_sim::{
    Actuator, Channel, ControlInput, Controller, Error, Quantity, RigidBodyDynamics, Saturated,
    Sensor, VehicleParams,
};

#[test]
fn hover_command_keeps_vertical_motion_at_rest() {
    let mut dynamics = RigidBodyDynamics::new(&[0.0; STATE_LEN], 0.0, 0.01).unwrap();
    let hover = [0.0, 0.0, VehicleParams::default().hover_speed()];

    let observation = dynamics.step(&hover).unwrap();

    assert_abs_diff_eq!(dynamics.state().w, 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(dynamics.earth_velocity().z, 0.0, epsilon = 1e-6);
    // vertical specific force balances gravity
    assert_abs_diff_eq!(observation[14], 0.0, epsilon = 1e-6);
}

#[test]
fn proportional_controller_passes_constant_error() {
    let mut controller = Controller::pid(1, 1, 1.0).unwrap();
    let pid = controller.pid_mut().unwrap();
    pid.set_proportional_gains(&[1.0]).unwrap();
    pid.set_integral_gains(&[0.0]).unwrap();
    pid.set_derivative_gains(&[0.0]).unwrap();

    let mut out = [0.0];
    for _ in 0..3 {
        controller.step(0.0, &[0.0], Some(&[1.0])).unwrap();
        controller.get_u(&mut out).unwrap();
        assert_eq!(out, [1.0]);
    }
}

#[test]
fn actuator_ramps_at_rate_limit() {
    let mut actuator = Actuator::new(1, &[0.0], 1.0).unwrap();
    actuator.set_lower_rate_limit(Channel::All, -1.0).unwrap();
    actuator.set_upper_rate_limit(Channel::All, 1.0).unwrap();

    assert_eq!(actuator.actuate(&[5.0]).unwrap()[0], 1.0);
    assert_eq!(actuator.actuate(&[5.0]).unwrap()[0], 2.0);
}

#[test]
fn rejected_inputs_leave_components_untouched() {
    let mut dynamics = RigidBodyDynamics::new(&[0.0; STATE_LEN], 0.0, 0.01).unwrap();
    assert!(matches!(
        dynamics.step(&[0.0; 4]),
        Err(Error::DimensionMismatch { expected: 3, actual: 4, .. })
    ));
    assert_eq!(dynamics.time(), 0.0);

    let mut actuator = Actuator::new(2, &[], 0.01).unwrap();
    assert!(matches!(
        actuator.set_upper_limit(Channel::Index(2), 1.0),
        Err(Error::IndexOutOfRange { index: 2, len: 2 })
    ));

    let mut sensor = Sensor::new();
    let mut buffer = [0.0; 2];
    assert!(sensor.process_output(&[0.0; 17]).is_err());
    assert!(sensor.read(Quantity::Gravity, &mut buffer).is_err());
}

/// Roll and pitch hold wired by hand: sensor, PID, servo actuator, dynamics.
#[test]
fn attitude_cascade_levels_the_vehicle() {
    let params = VehicleParams::default();
    let dt = 0.01;

    let mut initial = [0.0; STATE_LEN];
    initial[0] = 0.05;
    initial[1] = -0.05;
    initial[8] = -100.0;
    let mut dynamics = RigidBodyDynamics::new(&initial, 0.0, dt).unwrap();
    let mut sensor = Sensor::new();
    sensor
        .process_output(dynamics.observe(&ControlInput::hover(&params)).as_slice())
        .unwrap();

    let mut attitude = Controller::pid(2, 2, dt).unwrap();
    attitude
        .pid_mut()
        .unwrap()
        .set_proportional_gains(&[3.0, 3.0])
        .unwrap();
    let mut rate = Controller::pid(2, 2, dt).unwrap();
    rate.pid_mut()
        .unwrap()
        .set_proportional_gains(&[-1.0, -1.0])
        .unwrap();
    attitude.init(&[initial[0], initial[1]], &[], None, 0.0).unwrap();
    rate.init(&[0.0, 0.0], &[], None, 0.0).unwrap();

    let mut servos = Actuator::new(2, &[], dt).unwrap();
    servos.set_symmetric_limits(Channel::All, 0.26, 5.0).unwrap();

    let initial_tilt = initial[0].abs() + initial[1].abs();
    for _ in 0..300 {
        let t = dynamics.time();
        let euler = sensor.euler_angles();
        let omega = sensor.angular_velocity();

        let rate_ref = attitude.step(t, &[euler.x, euler.y], None).unwrap().clone();
        let servo_cmd = rate
            .step(t, &[omega.x, omega.y], Some(rate_ref.as_slice()))
            .unwrap()
            .clone();
        let applied = servos.actuate(servo_cmd.as_slice()).unwrap();

        let observation = dynamics
            .step(&[applied[0], applied[1], params.hover_speed()])
            .unwrap();
        sensor.process_output(observation.as_slice()).unwrap();
    }

    let state = dynamics.state();
    assert!(state.roll.abs() + state.pitch.abs() < 0.5 * initial_tilt);
    assert!(state.z < 0.0);
    assert_relative_eq!(dynamics.time(), 3.0, epsilon = 1e-9);
}
