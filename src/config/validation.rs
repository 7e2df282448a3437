//! Configuration validation.

use crate::error::{ConfigError, Error, Result};
use crate::kinematics::Axis;

use super::machine::{MachineConfig, MAX_EXTRUDERS};

/// Validate a machine configuration.
///
/// Checks:
/// - At least one and at most [`MAX_EXTRUDERS`] extruders
/// - All steps-per-unit, feed rate and acceleration tables are positive
/// - Jerk limits and the minimum planner speed are positive
/// - The core mixing factor is positive
pub fn validate_config(config: &MachineConfig) -> Result<()> {
    if config.extruders.is_empty() {
        return Err(Error::Config(ConfigError::NoExtruders));
    }
    if config.extruders.len() > MAX_EXTRUDERS {
        return Err(Error::Config(ConfigError::TooManyExtruders(
            config.extruders.len(),
        )));
    }

    const LINEAR: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
    for (i, axis) in LINEAR.into_iter().enumerate() {
        let spu = config.axes.steps_per_unit[i];
        if spu <= 0.0 {
            return Err(Error::Config(ConfigError::InvalidStepsPerUnit {
                axis,
                value: spu,
            }));
        }
        let mf = config.axes.max_feedrate[i].0;
        if mf <= 0.0 {
            return Err(Error::Config(ConfigError::InvalidMaxFeedrate {
                axis,
                value: mf,
            }));
        }
        let ma = config.axes.max_acceleration[i].0;
        if ma <= 0.0 {
            return Err(Error::Config(ConfigError::InvalidMaxAcceleration {
                axis,
                value: ma,
            }));
        }
    }

    for e in config.extruders.iter() {
        if e.steps_per_unit <= 0.0 {
            return Err(Error::Config(ConfigError::InvalidStepsPerUnit {
                axis: Axis::E,
                value: e.steps_per_unit,
            }));
        }
        if e.max_feedrate.0 <= 0.0 {
            return Err(Error::Config(ConfigError::InvalidMaxFeedrate {
                axis: Axis::E,
                value: e.max_feedrate.0,
            }));
        }
        if e.max_acceleration.0 <= 0.0 {
            return Err(Error::Config(ConfigError::InvalidMaxAcceleration {
                axis: Axis::E,
                value: e.max_acceleration.0,
            }));
        }
        if e.retract_acceleration.0 <= 0.0 {
            return Err(Error::Config(ConfigError::InvalidAcceleration(
                e.retract_acceleration.0,
            )));
        }
        if e.max_jerk.0 <= 0.0 {
            return Err(Error::Config(ConfigError::InvalidJerk(e.max_jerk.0)));
        }
    }

    if config.planner.acceleration.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidAcceleration(
            config.planner.acceleration.0,
        )));
    }
    if config.planner.travel_acceleration.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidAcceleration(
            config.planner.travel_acceleration.0,
        )));
    }
    if config.planner.max_xy_jerk.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidJerk(
            config.planner.max_xy_jerk.0,
        )));
    }
    if config.planner.max_z_jerk.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidJerk(
            config.planner.max_z_jerk.0,
        )));
    }
    if config.planner.minimum_planner_speed.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidMinimumPlannerSpeed(
            config.planner.minimum_planner_speed.0,
        )));
    }
    if config.core_mix_factor <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidCoreMixFactor(
            config.core_mix_factor,
        )));
    }

    Ok(())
}
