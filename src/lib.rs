//! Closed-loop flight-control simulation of a thrust-vectored vehicle.
//!
//! A rigid-body model with a gimbaled, contra-rotating propeller pair is
//! integrated with fixed-step RK4 and driven by cascaded PID and INDI
//! controllers through rate- and position-limited actuators.
//!
//! ```no_run
//! use tvc_sim::{config::LoopConfig, sim::AttitudeLoop};
//!
//! let mut sim = AttitudeLoop::new(&LoopConfig::default())?;
//! let trajectory = sim.run()?;
//! trajectory.export("data")?;
//! # Ok::<(), tvc_sim::Error>(())
//! ```

pub mod config;
pub mod control;
pub mod dynamics;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod integrator;
pub mod io;
pub mod params;
pub mod saturator;
pub mod sensor;
pub mod sim;

pub use config::{ActuatorLimits, LoopConfig, PidGains, PositionLoopConfig};
pub use control::{ControlLaw, Controller, ControllerState, Indi, IndiParams, Pid};
pub use dynamics::{ControlInput, Observation, RigidBodyDynamics, State};
pub use error::{Error, Result};
pub use filter::{Filter, FilterHistory};
pub use params::VehicleParams;
pub use saturator::{Actuator, Channel, Limits, Saturated, Saturator};
pub use sensor::{Quantity, Sensor};
pub use sim::{AttitudeLoop, PositionLoop, Trajectory};
