//! The block: one straight-line motion segment with its trapezoid profile.

use crate::kinematics::{DirectionBits, NUM_AXIS};

/// Laser output state carried on a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaserState {
    /// Beam off for this segment.
    #[default]
    Off,
    /// Beam on for this segment.
    On,
}

/// How the beam fires during the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaserMode {
    /// Fire continuously while the block executes.
    #[default]
    Continuous,
    /// Fire once per planned pulse, interleaved with steps.
    Pulsed,
}

/// Laser annotation for one block.
///
/// The core only schedules firings against the Bresenham clock; the actual
/// beam driver is the board's concern.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LaserPlan {
    /// Whether the beam is on for this segment.
    pub state: LaserState,
    /// How the beam fires.
    pub mode: LaserMode,
    /// Power setting handed to the board, 0-255.
    pub intensity: u8,
    /// Maximum firing duration in microseconds; 0 means unlimited.
    pub duration_us: u32,
    /// Number of pulses over the whole segment (pulsed mode).
    pub pulse_events: u32,
}

/// One straight-line motion segment in step space, annotated with a
/// symmetric-trapezoid speed profile.
///
/// Field ownership follows the producer/consumer protocol: the planner fills
/// and re-solves a block only while `busy` is false; the stepper sets `busy`
/// on latch and treats every other field as read-only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    /// Unsigned step count per motor slot (after kinematic mixing).
    pub steps: [u32; NUM_AXIS],
    /// Maximum across all slots; the master tick count.
    pub step_event_count: u32,
    /// Motor and head direction bits, set for negative travel.
    pub direction_bits: DirectionBits,
    /// Extruder driver executing this block's E steps.
    pub active_driver: u8,
    /// Fan speed captured at plan time, 0-255.
    pub fan_speed: u8,
    /// Euclidean length of the head's real displacement in mm.
    pub millimeters: f32,
    /// Cruise target in mm/s, always > 0 once planned.
    pub nominal_speed: f32,
    /// Cruise target in steps/s, always > 0 once planned.
    pub nominal_rate: u32,
    /// Junction speed at block start in mm/s.
    pub entry_speed: f32,
    /// Upper bound for `entry_speed` from the jerk model, in mm/s.
    pub max_entry_speed: f32,
    /// Acceleration in mm/s².
    pub acceleration: f32,
    /// Acceleration in steps/s².
    pub acceleration_st: u32,
    /// 24.8 fixed-point acceleration scale used by the stepper integration.
    pub acceleration_rate: u32,
    /// Step rate at block start in steps/s.
    pub initial_rate: u32,
    /// Step rate at block end in steps/s.
    pub final_rate: u32,
    /// Master step index where acceleration ends.
    pub accelerate_until: u32,
    /// Master step index where deceleration begins.
    pub decelerate_after: u32,
    /// Long enough to reach nominal speed from rest; lookahead may skip its
    /// reverse update.
    pub nominal_length: bool,
    /// A junction speed moved since the last trapezoid solve.
    pub recalculate: bool,
    /// Latched by the stepper; trapezoid fields are frozen.
    pub busy: bool,
    /// Optional laser annotation.
    pub laser: Option<LaserPlan>,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            steps: [0; NUM_AXIS],
            step_event_count: 0,
            direction_bits: DirectionBits::empty(),
            active_driver: 0,
            fan_speed: 0,
            millimeters: 0.0,
            nominal_speed: 0.0,
            nominal_rate: 0,
            entry_speed: 0.0,
            max_entry_speed: 0.0,
            acceleration: 0.0,
            acceleration_st: 0,
            acceleration_rate: 0,
            initial_rate: 0,
            final_rate: 0,
            accelerate_until: 0,
            decelerate_after: 0,
            nominal_length: false,
            recalculate: false,
            busy: false,
            laser: None,
        }
    }
}

impl Block {
    /// Exit speed implied by the trapezoid corners, in mm/s.
    #[inline]
    pub fn exit_speed(&self) -> f32 {
        if self.nominal_rate == 0 {
            return 0.0;
        }
        self.nominal_speed * self.final_rate as f32 / self.nominal_rate as f32
    }

    /// Whether any of the three linear motor slots step in this block.
    #[inline]
    pub fn has_linear_steps(&self) -> bool {
        self.steps[0] != 0 || self.steps[1] != 0 || self.steps[2] != 0
    }
}
