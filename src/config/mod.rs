//! Configuration module for motion-core.
//!
//! Provides types for loading and validating machine configuration from TOML
//! files or pre-parsed data, plus the derived runtime tables handed to the
//! planner and stepper halves.

mod loader;
mod machine;
mod tuning;
pub mod units;
mod validation;

pub use loader::{load_config, parse_config};
pub use machine::{
    AxesConfig, EndstopConfig, ExtruderConfig, MachineConfig, PlannerConfig, StepperConfig,
    MAX_EXTRUDERS,
};
pub use tuning::{EngineConfig, PlannerTuning};
pub use validation::validate_config;

// Re-export unit types at config level
pub use units::{Millimeters, MmPerSec, MmPerSecSq, Steps};

#[cfg(test)]
pub(crate) mod test_support {
    use super::machine::*;
    use super::units::{MmPerSec, MmPerSecSq};

    /// Reference machine used across the unit tests: 80 steps/mm on X/Y,
    /// 300 mm/s and 1000 mm/s² limits, 20 mm/s XY jerk.
    pub fn basic_config() -> MachineConfig {
        let mut extruders = heapless::Vec::new();
        let _ = extruders.push(ExtruderConfig {
            steps_per_unit: 500.0,
            max_feedrate: MmPerSec(45.0),
            max_acceleration: MmPerSecSq(10_000.0),
            retract_acceleration: MmPerSecSq(3000.0),
            max_jerk: MmPerSec(5.0),
        });
        MachineConfig {
            mechanics: Default::default(),
            core_mix_factor: 1.0,
            axes: AxesConfig {
                steps_per_unit: [80.0, 80.0, 4000.0],
                max_feedrate: [MmPerSec(300.0), MmPerSec(300.0), MmPerSec(5.0)],
                max_acceleration: [
                    MmPerSecSq(3000.0),
                    MmPerSecSq(3000.0),
                    MmPerSecSq(100.0),
                ],
            },
            extruders,
            planner: PlannerConfig {
                acceleration: MmPerSecSq(1000.0),
                travel_acceleration: MmPerSecSq(1000.0),
                ..Default::default()
            },
            stepper: Default::default(),
            endstops: Default::default(),
        }
    }
}
