//! Machine configuration from TOML.

use heapless::Vec;
use serde::Deserialize;

use crate::kinematics::Mechanics;

use super::units::{MmPerSec, MmPerSecSq};

/// Maximum number of extruder drivers the firmware supports.
pub const MAX_EXTRUDERS: usize = 4;

/// Complete machine configuration from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    /// Mechanics selector (cartesian, corexy, coreyx, corexz, corezx).
    #[serde(default)]
    pub mechanics: Mechanics,

    /// Core belt mixing factor `k`, 1.0 on standard Core* machines.
    #[serde(default = "default_core_mix_factor")]
    pub core_mix_factor: f32,

    /// Per-axis tables for the three linear axes.
    pub axes: AxesConfig,

    /// One entry per extruder driver; the E axis uses the active entry.
    pub extruders: Vec<ExtruderConfig, MAX_EXTRUDERS>,

    /// Planner tunables.
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Stepper engine tunables.
    #[serde(default)]
    pub stepper: StepperConfig,

    /// Endstop behavior.
    #[serde(default)]
    pub endstops: EndstopConfig,
}

/// Tables for the X, Y and Z axes, in that order.
#[derive(Debug, Clone, Deserialize)]
pub struct AxesConfig {
    /// Motor steps per millimeter of axis travel.
    pub steps_per_unit: [f32; 3],

    /// Maximum speed per axis in mm/s.
    #[serde(rename = "max_feedrate_mm_per_sec")]
    pub max_feedrate: [MmPerSec; 3],

    /// Maximum acceleration per axis in mm/s².
    #[serde(rename = "max_acceleration_mm_per_sec2")]
    pub max_acceleration: [MmPerSecSq; 3],
}

/// Per-extruder tables.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtruderConfig {
    /// Motor steps per millimeter of filament.
    pub steps_per_unit: f32,

    /// Maximum filament speed in mm/s.
    #[serde(rename = "max_feedrate_mm_per_sec")]
    pub max_feedrate: MmPerSec,

    /// Maximum filament acceleration in mm/s².
    #[serde(rename = "max_acceleration_mm_per_sec2")]
    pub max_acceleration: MmPerSecSq,

    /// Acceleration for pure retract / prime moves in mm/s².
    #[serde(rename = "retract_acceleration_mm_per_sec2")]
    pub retract_acceleration: MmPerSecSq,

    /// Allowed instantaneous filament speed change at a junction in mm/s.
    #[serde(rename = "max_jerk_mm_per_sec")]
    pub max_jerk: MmPerSec,
}

/// Planner tunables with firmware-typical defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Default acceleration for printing moves in mm/s².
    pub acceleration: MmPerSecSq,

    /// Acceleration for moves without extrusion in mm/s².
    pub travel_acceleration: MmPerSecSq,

    /// Allowed instantaneous XY speed change at a junction in mm/s.
    pub max_xy_jerk: MmPerSec,

    /// Allowed instantaneous Z speed change at a junction in mm/s.
    pub max_z_jerk: MmPerSec,

    /// Junction floor; every block can decelerate to this speed.
    pub minimum_planner_speed: MmPerSec,

    /// Feed rate floor for extruding moves in mm/s.
    pub min_feedrate: MmPerSec,

    /// Feed rate floor for travel moves in mm/s.
    pub min_travel_feedrate: MmPerSec,

    /// Target minimum segment duration in microseconds; short segments are
    /// stretched toward this when the queue starts to drain.
    pub min_segment_time_us: u32,

    /// Moves mapping to no more than this many master-axis steps are dropped.
    pub drop_segments: u32,

    /// Stretch segment time when the queue is below half full.
    pub slowdown: bool,

    /// Zero the E component of a move longer than this many millimeters of
    /// filament. 0 disables the guard.
    pub max_extrude_length: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            acceleration: MmPerSecSq(3000.0),
            travel_acceleration: MmPerSecSq(3000.0),
            max_xy_jerk: MmPerSec(20.0),
            max_z_jerk: MmPerSec(0.4),
            minimum_planner_speed: MmPerSec(0.05),
            min_feedrate: MmPerSec(0.0),
            min_travel_feedrate: MmPerSec(0.0),
            min_segment_time_us: 20_000,
            drop_segments: 0,
            slowdown: true,
            max_extrude_length: 0.0,
        }
    }
}

/// Stepper engine tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StepperConfig {
    /// Hard step frequency ceiling in steps/s.
    pub max_step_frequency: u32,

    /// Above this rate the engine emits two steps per tick; above twice it,
    /// four.
    pub double_step_frequency: u32,

    /// Power down extruder drivers that have been idle for a while.
    pub disable_inactive_extruder: bool,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            max_step_frequency: 40_000,
            double_step_frequency: 10_000,
            disable_inactive_extruder: true,
        }
    }
}

/// Endstop behavior.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndstopConfig {
    /// Purge the queue and report a fault when an endstop triggers mid-move.
    pub abort_on_hit: bool,

    /// Two Z motors with individual endstops (gantry squaring).
    pub dual_z: bool,
}

fn default_core_mix_factor() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_defaults() {
        let p = PlannerConfig::default();
        assert_eq!(p.minimum_planner_speed.0, 0.05);
        assert!(p.slowdown);
        assert_eq!(p.drop_segments, 0);
    }

    #[test]
    fn test_stepper_defaults() {
        let s = StepperConfig::default();
        assert_eq!(s.max_step_frequency, 40_000);
        assert_eq!(s.double_step_frequency, 10_000);
    }
}
