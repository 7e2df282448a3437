//! Runtime tables derived from machine configuration.
//!
//! Computed once at split time and handed to the two halves of the core: the
//! planner gets the full mm- and step-domain tables (mutable, since M92/M201
//! style overrides re-derive them), the stepper engine gets the small
//! read-only subset it needs for readback and endstop decisions.

use heapless::Vec;
use libm::ceilf;

use crate::kinematics::Mechanics;

use super::machine::{MachineConfig, MAX_EXTRUDERS};

/// Mutable planner-side tables, the step-domain mirror of [`MachineConfig`].
///
/// The steps/s² tables are derived from the mm/s² limits; after changing any
/// mm-domain value call [`reset_acceleration_rates`](Self::reset_acceleration_rates).
#[derive(Debug, Clone)]
pub struct PlannerTuning {
    /// Mechanics selector.
    pub mechanics: Mechanics,
    /// Core belt mixing factor.
    pub core_mix_factor: f32,
    /// Steps per mm for X, Y, Z.
    pub axis_steps_per_unit: [f32; 3],
    /// Steps per mm of filament, per extruder.
    pub e_steps_per_unit: Vec<f32, MAX_EXTRUDERS>,
    /// Speed ceiling per axis in mm/s.
    pub max_feedrate: [f32; 3],
    /// Filament speed ceiling per extruder in mm/s.
    pub e_max_feedrate: Vec<f32, MAX_EXTRUDERS>,
    /// Acceleration ceiling per axis in mm/s².
    pub max_acceleration: [f32; 3],
    /// Filament acceleration ceiling per extruder in mm/s².
    pub e_max_acceleration: Vec<f32, MAX_EXTRUDERS>,
    /// Derived acceleration ceiling per axis in steps/s².
    pub axis_steps_per_sqr_second: [u32; 3],
    /// Derived filament acceleration ceiling per extruder in steps/s².
    pub e_steps_per_sqr_second: Vec<u32, MAX_EXTRUDERS>,
    /// Default acceleration for printing moves in mm/s².
    pub acceleration: f32,
    /// Acceleration for travel moves in mm/s².
    pub travel_acceleration: f32,
    /// Acceleration for pure E moves, per extruder, in mm/s².
    pub retract_acceleration: Vec<f32, MAX_EXTRUDERS>,
    /// Allowed instantaneous XY speed change at a junction in mm/s.
    pub max_xy_jerk: f32,
    /// Allowed instantaneous Z speed change at a junction in mm/s.
    pub max_z_jerk: f32,
    /// Allowed instantaneous E speed change per extruder in mm/s.
    pub max_e_jerk: Vec<f32, MAX_EXTRUDERS>,
    /// Junction floor in mm/s.
    pub minimum_planner_speed: f32,
    /// Feed rate floor for extruding moves in mm/s.
    pub min_feedrate: f32,
    /// Feed rate floor for travel moves in mm/s.
    pub min_travel_feedrate: f32,
    /// Target minimum segment duration in microseconds.
    pub min_segment_time_us: u32,
    /// Master-axis step threshold below which a move is dropped.
    pub drop_segments: u32,
    /// Stretch segment time when the queue is below half full.
    pub slowdown: bool,
    /// E guard length in mm of filament; 0 disables.
    pub max_extrude_length: f32,
}

impl PlannerTuning {
    /// Derive the planner tables from a validated configuration.
    pub fn from_config(config: &MachineConfig) -> Self {
        let mut tuning = Self {
            mechanics: config.mechanics,
            core_mix_factor: config.core_mix_factor,
            axis_steps_per_unit: config.axes.steps_per_unit,
            e_steps_per_unit: config.extruders.iter().map(|e| e.steps_per_unit).collect(),
            max_feedrate: config.axes.max_feedrate.map(|v| v.0),
            e_max_feedrate: config.extruders.iter().map(|e| e.max_feedrate.0).collect(),
            max_acceleration: config.axes.max_acceleration.map(|v| v.0),
            e_max_acceleration: config
                .extruders
                .iter()
                .map(|e| e.max_acceleration.0)
                .collect(),
            axis_steps_per_sqr_second: [0; 3],
            e_steps_per_sqr_second: config.extruders.iter().map(|_| 0).collect(),
            acceleration: config.planner.acceleration.0,
            travel_acceleration: config.planner.travel_acceleration.0,
            retract_acceleration: config
                .extruders
                .iter()
                .map(|e| e.retract_acceleration.0)
                .collect(),
            max_xy_jerk: config.planner.max_xy_jerk.0,
            max_z_jerk: config.planner.max_z_jerk.0,
            max_e_jerk: config.extruders.iter().map(|e| e.max_jerk.0).collect(),
            minimum_planner_speed: config.planner.minimum_planner_speed.0,
            min_feedrate: config.planner.min_feedrate.0,
            min_travel_feedrate: config.planner.min_travel_feedrate.0,
            min_segment_time_us: config.planner.min_segment_time_us,
            drop_segments: config.planner.drop_segments,
            slowdown: config.planner.slowdown,
            max_extrude_length: config.planner.max_extrude_length,
        };
        tuning.reset_acceleration_rates();
        tuning
    }

    /// Number of configured extruders.
    #[inline]
    pub fn extruder_count(&self) -> usize {
        self.e_steps_per_unit.len()
    }

    /// Re-derive the steps/s² tables after a mm-domain parameter change.
    pub fn reset_acceleration_rates(&mut self) {
        for i in 0..3 {
            self.axis_steps_per_sqr_second[i] =
                ceilf(self.max_acceleration[i] * self.axis_steps_per_unit[i]) as u32;
        }
        for i in 0..self.e_steps_per_unit.len() {
            self.e_steps_per_sqr_second[i] =
                ceilf(self.e_max_acceleration[i] * self.e_steps_per_unit[i]) as u32;
        }
    }

    /// Steps per mm for the E axis of the given extruder.
    #[inline]
    pub fn e_steps(&self, extruder: u8) -> f32 {
        self.e_steps_per_unit[extruder as usize]
    }
}

/// Read-only engine-side subset of the configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Mechanics selector.
    pub mechanics: Mechanics,
    /// Core belt mixing factor.
    pub core_mix_factor: f32,
    /// Steps per mm for X, Y, Z (position readback).
    pub axis_steps_per_unit: [f32; 3],
    /// Steps per mm of filament, per extruder.
    pub e_steps_per_unit: Vec<f32, MAX_EXTRUDERS>,
    /// Hard step frequency ceiling in steps/s.
    pub max_step_frequency: u32,
    /// Double/quad stepping threshold in steps/s.
    pub double_step_frequency: u32,
    /// Power down idle extruder drivers.
    pub disable_inactive_extruder: bool,
    /// Purge the queue when an endstop triggers.
    pub abort_on_endstop_hit: bool,
    /// Two Z motors with individual endstops.
    pub dual_z: bool,
}

impl EngineConfig {
    /// Derive the engine subset from a validated configuration.
    pub fn from_config(config: &MachineConfig) -> Self {
        Self {
            mechanics: config.mechanics,
            core_mix_factor: config.core_mix_factor,
            axis_steps_per_unit: config.axes.steps_per_unit,
            e_steps_per_unit: config.extruders.iter().map(|e| e.steps_per_unit).collect(),
            max_step_frequency: config.stepper.max_step_frequency,
            double_step_frequency: config.stepper.double_step_frequency,
            disable_inactive_extruder: config.stepper.disable_inactive_extruder,
            abort_on_endstop_hit: config.endstops.abort_on_hit,
            dual_z: config.endstops.dual_z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::basic_config;

    #[test]
    fn test_sqr_second_tables_derived() {
        let tuning = PlannerTuning::from_config(&basic_config());
        // 3000 mm/s^2 * 80 steps/mm = 240000 steps/s^2
        assert_eq!(tuning.axis_steps_per_sqr_second[0], 240_000);
    }

    #[test]
    fn test_reset_after_override() {
        let mut tuning = PlannerTuning::from_config(&basic_config());
        tuning.max_acceleration[0] = 1000.0;
        tuning.reset_acceleration_rates();
        assert_eq!(tuning.axis_steps_per_sqr_second[0], 80_000);
    }
}
