//! # motion-core
//!
//! The motion core of a 3D-printer / CNC / laser firmware: a bounded
//! lookahead planner that turns absolute cartesian targets into
//! trapezoid-profiled step blocks, and a timer-driven stepper engine that
//! traces them with a multi-axis Bresenham pulse generator.
//!
//! ## Features
//!
//! - **Two-pass lookahead**: junction entry speeds are re-solved across the
//!   whole ring on every append, so adjacent segments chain smoothly
//! - **Jerk-limited junctions**: per-axis instantaneous speed-change limits
//! - **Cartesian and Core mechanics**: CoreXY/YX and CoreXZ/ZX step mixing,
//!   with head-frame endstop logic and position readback
//! - **embedded-hal 1.0**: a ready-made [`GpioBoard`](hal::GpioBoard)
//!   adapter drives step/dir/enable and endstop pins
//! - **Configuration-driven**: machine limits load from TOML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use motion_core::{split, load_config};
//!
//! let config = load_config("machine.toml")?;
//! let (mut planner, mut engine) = split::<_, 16>(&config, board)?;
//!
//! // Consumer context: drive engine.tick() from the step timer.
//! // Producer context:
//! planner.buffer_line(10.0, 0.0, 0.0, 0.0, 3600.0, 0, 0);
//! planner.synchronize();
//! ```
//!
//! The two halves share a lock-protected block ring; the planner may be
//! suspended by the engine at any point and never touches hardware.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

// Core modules
pub mod config;
pub mod error;
pub mod hal;
pub mod kinematics;
pub mod planner;
pub mod stepper;

// Re-exports for ergonomic API
pub use config::{load_config, parse_config, validate_config, MachineConfig};
pub use error::{ConfigError, Error, Result};
pub use kinematics::{Axis, DirectionBits, Mechanics};
pub use planner::{Block, BlockRing, Planner};
pub use stepper::{EndstopHits, StepperEngine};

use std::sync::Arc;

use config::{EngineConfig, PlannerTuning};
use hal::Board;

/// Build the two halves of the motion core from a configuration.
///
/// `CAP` is the block ring capacity and must be a power of two of at least
/// 4. The returned [`Planner`] belongs to the producer context (the g-code
/// layer); the [`StepperEngine`] owns the board and is driven from the step
/// timer.
///
/// # Errors
///
/// Returns an error if the configuration fails validation or `CAP` is not a
/// power of two.
pub fn split<B: Board, const CAP: usize>(
    config: &MachineConfig,
    board: B,
) -> Result<(Planner<CAP>, StepperEngine<B, CAP>)> {
    if !CAP.is_power_of_two() || CAP < 4 {
        return Err(Error::Config(ConfigError::InvalidRingCapacity(CAP)));
    }
    validate_config(config)?;
    let ring = Arc::new(BlockRing::new());
    let planner = Planner::new(Arc::clone(&ring), PlannerTuning::from_config(config));
    let engine = StepperEngine::new(ring, EngineConfig::from_config(config), board);
    Ok((planner, engine))
}
