//! Error types for motion-core.
//!
//! All runtime planner and stepper paths clamp, drop, or report conditions
//! out-of-band through the `log` facade, so the error tree only covers
//! configuration loading and validation.

use core::fmt;

use crate::kinematics::Axis;

/// Result type alias using the library's Error type.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for all motion-core operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration parsing or validation error
    Config(ConfigError),
}

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Failed to parse TOML configuration
    ParseError(heapless::String<128>),
    /// File I/O error
    IoError(heapless::String<128>),
    /// No extruder sections configured; the E axis needs at least one
    NoExtruders,
    /// More extruders configured than the firmware supports
    TooManyExtruders(usize),
    /// Ring capacity must be a power of two, at least 4
    InvalidRingCapacity(usize),
    /// Steps-per-millimeter must be > 0
    InvalidStepsPerUnit {
        /// Axis the invalid value was configured for
        axis: Axis,
        /// The offending value
        value: f32,
    },
    /// Per-axis feed rate limit must be > 0
    InvalidMaxFeedrate {
        /// Axis the invalid value was configured for
        axis: Axis,
        /// The offending value
        value: f32,
    },
    /// Per-axis acceleration limit must be > 0
    InvalidMaxAcceleration {
        /// Axis the invalid value was configured for
        axis: Axis,
        /// The offending value
        value: f32,
    },
    /// Default / travel / retract acceleration must be > 0
    InvalidAcceleration(f32),
    /// Jerk limits must be > 0
    InvalidJerk(f32),
    /// Minimum planner speed must be > 0
    InvalidMinimumPlannerSpeed(f32),
    /// Core mechanics mixing factor must be > 0
    InvalidCoreMixFactor(f32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::IoError(msg) => write!(f, "I/O error: {}", msg),
            ConfigError::NoExtruders => write!(f, "At least one extruder must be configured"),
            ConfigError::TooManyExtruders(n) => write!(
                f,
                "{} extruders configured, maximum is {}",
                n,
                crate::config::MAX_EXTRUDERS
            ),
            ConfigError::InvalidRingCapacity(n) => {
                write!(f, "Ring capacity {} is not a power of two >= 4", n)
            }
            ConfigError::InvalidStepsPerUnit { axis, value } => {
                write!(f, "Invalid steps-per-mm for {}: {}. Must be > 0", axis, value)
            }
            ConfigError::InvalidMaxFeedrate { axis, value } => {
                write!(f, "Invalid max feed rate for {}: {}. Must be > 0", axis, value)
            }
            ConfigError::InvalidMaxAcceleration { axis, value } => {
                write!(f, "Invalid max acceleration for {}: {}. Must be > 0", axis, value)
            }
            ConfigError::InvalidAcceleration(v) => {
                write!(f, "Invalid acceleration: {}. Must be > 0", v)
            }
            ConfigError::InvalidJerk(v) => write!(f, "Invalid jerk limit: {}. Must be > 0", v),
            ConfigError::InvalidMinimumPlannerSpeed(v) => {
                write!(f, "Invalid minimum planner speed: {}. Must be > 0", v)
            }
            ConfigError::InvalidCoreMixFactor(v) => {
                write!(f, "Invalid core mixing factor: {}. Must be > 0", v)
            }
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl std::error::Error for Error {}

impl std::error::Error for ConfigError {}
