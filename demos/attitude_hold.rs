use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tvc_sim::{AttitudeLoop, LoopConfig};

/// PID attitude and altitude hold of the thrust-vectored vehicle.
#[derive(Parser, Debug)]
#[command(name = "attitude_hold")]
#[command(version)]
struct Args {
    /// TOML configuration; the reference vehicle and gains are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the final simulation time (s)
    #[arg(long)]
    final_time: Option<f64>,

    /// Directory receiving state.csv, input.csv, ref.csv and time.csv
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LoopConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LoopConfig::default(),
    };
    if let Some(final_time) = args.final_time {
        config.time.final_time = final_time;
    }

    let mut sim = AttitudeLoop::new(&config).context("setting up the closed loop")?;
    let trajectory = sim.run().context("running the closed loop")?;

    if let Some(state) = trajectory.final_state() {
        println!("Final time:     {:.2} s", sim.dynamics().time());
        println!(
            "Final attitude: roll {:.4} rad, pitch {:.4} rad, yaw {:.4} rad",
            state.roll, state.pitch, state.yaw
        );
        println!(
            "Final position: x {:.3} m, y {:.3} m, z {:.3} m",
            state.x, state.y, state.z
        );
    }

    if let Some(dir) = &args.output_dir {
        trajectory
            .export(dir)
            .with_context(|| format!("exporting to {}", dir.display()))?;
    }

    Ok(())
}
