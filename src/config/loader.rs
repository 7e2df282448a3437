//! Configuration loading from files.

use std::fs;
use std::path::Path;

use crate::error::{ConfigError, Error, Result};

use super::MachineConfig;

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
///
/// ```rust,ignore
/// use motion_core::load_config;
///
/// let config = load_config("machine.toml")?;
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MachineConfig> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| {
        let msg = heapless::String::try_from(e.to_string().as_str()).unwrap_or_default();
        Error::Config(ConfigError::IoError(msg))
    })?;

    parse_config(&content)
}

/// Parse configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is invalid or fails validation.
pub fn parse_config(content: &str) -> Result<MachineConfig> {
    let config: MachineConfig = toml::from_str(content).map_err(|e| {
        let msg = heapless::String::try_from(e.message()).unwrap_or_default();
        Error::Config(ConfigError::ParseError(msg))
    })?;

    // Validate the configuration
    super::validation::validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::Mechanics;

    const MINIMAL: &str = r#"
[axes]
steps_per_unit = [80.0, 80.0, 4000.0]
max_feedrate_mm_per_sec = [300.0, 300.0, 5.0]
max_acceleration_mm_per_sec2 = [3000.0, 3000.0, 100.0]

[[extruders]]
steps_per_unit = 500.0
max_feedrate_mm_per_sec = 45.0
max_acceleration_mm_per_sec2 = 10000.0
retract_acceleration_mm_per_sec2 = 3000.0
max_jerk_mm_per_sec = 5.0
"#;

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.mechanics, Mechanics::Cartesian);
        assert_eq!(config.extruders.len(), 1);
        assert_eq!(config.axes.steps_per_unit[2], 4000.0);
        // section defaults kick in
        assert_eq!(config.planner.minimum_planner_speed.0, 0.05);
        assert_eq!(config.stepper.max_step_frequency, 40_000);
    }

    #[test]
    fn test_parse_corexy_with_overrides() {
        let toml = format!(
            "mechanics = \"corexy\"\n{}\n[planner]\nmax_xy_jerk = 10.0\n\n[endstops]\ndual_z = true\n",
            MINIMAL
        );
        let config = parse_config(&toml).unwrap();
        assert_eq!(config.mechanics, Mechanics::CoreXy);
        assert_eq!(config.planner.max_xy_jerk.0, 10.0);
        assert!(config.endstops.dual_z);
        assert!(!config.endstops.abort_on_hit);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_config("mechanics = \"polar\"").is_err());
    }
}
