//! Integration of any `fast_ode::DifferentialEquation`.
//!
//! The closed loop uses [`rk4_step`], a classical fixed-step Runge-Kutta
//! scheme, so that every sampling interval costs exactly four derivative
//! evaluations. [`solve_adaptive`] wraps the adaptive solver of `fast_ode`
//! and is used to produce reference solutions.

use fast_ode::{Coord, DifferentialEquation};
use nalgebra::SVector;

use crate::error::{Error, Result};

fn to_coord<const N: usize>(x: &SVector<f64, N>) -> Coord<N> {
    let mut arr = [0.0; N];
    arr.copy_from_slice(x.as_slice());
    Coord(arr)
}

fn derivative<const N: usize, E>(ode: &E, t: f64, x: &SVector<f64, N>) -> SVector<f64, N>
where
    E: DifferentialEquation<N>,
{
    // The validity flag only steers step rejection in the adaptive solver.
    let (dot_y, _) = ode.ode_dot_y(t, &to_coord(x));
    SVector::from_column_slice(&dot_y.0)
}

/// Advances `x` from `t` to `t + dt` with the classical 4th-order Runge-Kutta method.
///
/// Stages are evaluated at `t`, `t + dt/2` (twice) and `t + dt` and combined
/// with weights 1, 2, 2, 1.
pub fn rk4_step<const N: usize, E>(ode: &E, t: f64, x: &SVector<f64, N>, dt: f64) -> SVector<f64, N>
where
    E: DifferentialEquation<N>,
{
    let half = 0.5 * dt;

    let k1 = derivative(ode, t, x);
    let k2 = derivative(ode, t + half, &(x + k1 * half));
    let k3 = derivative(ode, t + half, &(x + k2 * half));
    let k4 = derivative(ode, t + dt, &(x + k3 * dt));

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// Integrates over `time_span` with the adaptive solver of `fast_ode`.
///
/// `tolerance` is the absolute tolerance; the relative tolerance is ten times larger.
pub fn solve_adaptive<const N: usize, E>(
    ode: &E,
    time_span: (f64, f64),
    x0: &SVector<f64, N>,
    tolerance: f64,
) -> Result<SVector<f64, N>>
where
    E: DifferentialEquation<N>,
{
    let result = fast_ode::solve_ivp(
        ode,
        time_span,
        to_coord(x0),
        |_, _| true,
        tolerance,
        tolerance * 10.0,
    );

    match result {
        fast_ode::IvpResult::FinalTimeReached(final_coord) => {
            Ok(SVector::from_column_slice(&final_coord.0))
        }
        _ => Err(Error::InvalidParameter(format!(
            "adaptive integration over {:?} did not reach the final time",
            time_span
        ))),
    }
}
