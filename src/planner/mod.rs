//! The lookahead planner.
//!
//! Converts absolute cartesian targets into [`Block`]s, computes jerk-limited
//! junction speeds, and re-solves the speed profile of every queued block so
//! adjacent segments chain smoothly under one constant acceleration per
//! block.

mod block;
mod ring;
mod trapezoid;

pub use block::{Block, LaserMode, LaserPlan, LaserState};
pub use ring::BlockRing;

pub(crate) use ring::RingState;

use std::sync::Arc;

use heapless::Vec;
use libm::{ceilf, fabsf, roundf, sqrtf};
use log::warn;

use crate::config::{PlannerTuning, MAX_EXTRUDERS};
use crate::kinematics::{Mechanics, NUM_AXIS};
use crate::stepper::STEPPER_TIMER_RATE;

use trapezoid::{calculate_trapezoid, max_allowable_speed};

/// Laser output settings applied to subsequently planned blocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaserSettings {
    /// Whether the beam is on.
    pub state: LaserState,
    /// Continuous burn or per-distance pulses.
    pub mode: LaserMode,
    /// Power setting handed to the board, 0-255.
    pub intensity: u8,
    /// Maximum firing duration in microseconds; 0 means unlimited.
    pub duration_us: u32,
    /// Pulses per millimeter of head travel (pulsed mode).
    pub pulses_per_mm: f32,
}

/// Which axes have steps queued, plus the fan speed of the executing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxesActivity {
    /// Per-slot: any queued block steps this motor.
    pub active: [bool; NUM_AXIS],
    /// Fan speed of the block at the tail, if any is queued.
    pub fan_speed: Option<u8>,
}

/// Producer half of the motion core.
///
/// Single-threaded by contract: one caller appends moves and owns the
/// mm-domain position. The stepper half runs concurrently and only ever
/// consumes from the shared ring.
#[derive(Debug)]
pub struct Planner<const CAP: usize> {
    ring: Arc<BlockRing<CAP>>,
    tuning: PlannerTuning,
    /// Planned absolute position in head-frame steps.
    position: [i64; NUM_AXIS],
    previous_speed: [f32; NUM_AXIS],
    previous_nominal_speed: f32,
    last_extruder: u8,
    fan_speed: u8,
    volumetric_multiplier: Vec<f32, MAX_EXTRUDERS>,
    flow_percent: Vec<u16, MAX_EXTRUDERS>,
    extrusion_enabled: bool,
    laser: Option<LaserSettings>,
}

impl<const CAP: usize> Planner<CAP> {
    pub(crate) fn new(ring: Arc<BlockRing<CAP>>, tuning: PlannerTuning) -> Self {
        let extruders = tuning.extruder_count();
        Self {
            ring,
            tuning,
            position: [0; NUM_AXIS],
            previous_speed: [0.0; NUM_AXIS],
            previous_nominal_speed: 0.0,
            last_extruder: 0,
            fan_speed: 0,
            volumetric_multiplier: (0..extruders).map(|_| 1.0).collect(),
            flow_percent: (0..extruders).map(|_| 100).collect(),
            extrusion_enabled: true,
            laser: None,
        }
    }

    /// The shared ring, for queries and cross-context control.
    #[inline]
    pub fn ring(&self) -> &Arc<BlockRing<CAP>> {
        &self.ring
    }

    /// Number of blocks in the ring.
    #[inline]
    pub fn moves_planned(&self) -> usize {
        self.ring.moves_planned()
    }

    /// Block until every buffered step has executed.
    pub fn synchronize(&self) {
        self.ring.synchronize();
    }

    /// Drop all queued motion and abort the block in flight.
    pub fn quick_stop(&mut self) {
        self.ring.quick_stop();
        self.previous_speed = [0.0; NUM_AXIS];
        self.previous_nominal_speed = 0.0;
    }

    /// Drain the queue, then ask the stepper to power down all motors.
    pub fn finish_and_disable(&self) {
        self.synchronize();
        self.ring.request_disable();
    }

    /// Planner tables (jerk, acceleration, steps-per-unit overrides).
    ///
    /// After changing mm-domain values call
    /// [`PlannerTuning::reset_acceleration_rates`] on the returned reference.
    #[inline]
    pub fn tuning_mut(&mut self) -> &mut PlannerTuning {
        &mut self.tuning
    }

    /// Read-only view of the planner tables.
    #[inline]
    pub fn tuning(&self) -> &PlannerTuning {
        &self.tuning
    }

    /// Fan speed recorded on subsequently planned blocks, 0-255.
    pub fn set_fan_speed(&mut self, speed: u8) {
        self.fan_speed = speed;
    }

    /// Volumetric cross-section multiplier for one extruder (M200-style).
    pub fn set_volumetric_multiplier(&mut self, extruder: u8, multiplier: f32) {
        if let Some(slot) = self.volumetric_multiplier.get_mut(extruder as usize) {
            *slot = multiplier;
        }
    }

    /// Flow percentage for one extruder (M221-style).
    pub fn set_flow_percent(&mut self, extruder: u8, percent: u16) {
        if let Some(slot) = self.flow_percent.get_mut(extruder as usize) {
            *slot = percent;
        }
    }

    /// Allow or inhibit extrusion; while inhibited the E component of every
    /// move is dropped with a diagnostic.
    pub fn set_extrusion_enabled(&mut self, enabled: bool) {
        self.extrusion_enabled = enabled;
    }

    /// Laser settings stamped onto subsequently planned blocks.
    pub fn set_laser(&mut self, laser: Option<LaserSettings>) {
        self.laser = laser;
    }

    /// Planned head position in mm (x, y, z).
    pub fn position_mm(&self) -> [f32; 3] {
        let spu = &self.tuning.axis_steps_per_unit;
        [
            self.position[0] as f32 / spu[0],
            self.position[1] as f32 / spu[1],
            self.position[2] as f32 / spu[2],
        ]
    }

    /// Planned E position in mm of filament for the active extruder.
    pub fn e_position_mm(&self) -> f32 {
        self.position[3] as f32 / self.tuning.e_steps(self.last_extruder)
    }

    /// Re-seed the planner and stepper positions atomically.
    ///
    /// Junction chaining restarts from rest: previous-move speeds are zeroed.
    pub fn set_position(&mut self, x: f32, y: f32, z: f32, e: f32) {
        let t = &self.tuning;
        self.position = [
            roundf(x * t.axis_steps_per_unit[0]) as i64,
            roundf(y * t.axis_steps_per_unit[1]) as i64,
            roundf(z * t.axis_steps_per_unit[2]) as i64,
            roundf(e * t.e_steps(self.last_extruder)) as i64,
        ];
        // count_position holds motor counts; mix the head position through
        // the kinematics so Core* readback stays consistent.
        let motors = t.mechanics.motor_deltas(
            t.core_mix_factor,
            self.position[0],
            self.position[1],
            self.position[2],
        );
        for (slot, value) in motors.iter().enumerate() {
            self.ring.set_count_position(slot, *value);
        }
        self.ring.set_count_position(3, self.position[3]);
        self.previous_speed = [0.0; NUM_AXIS];
        self.previous_nominal_speed = 0.0;
    }

    /// Re-seed only the E coordinate.
    pub fn set_e_position(&mut self, e: f32) {
        self.position[3] = roundf(e * self.tuning.e_steps(self.last_extruder)) as i64;
        self.ring.set_count_position(3, self.position[3]);
    }

    /// Which axes have queued steps and the executing block's fan speed.
    pub fn axes_activity(&self) -> AxesActivity {
        let guard = self.ring.lock();
        let mut activity = AxesActivity::default();
        let n = guard.len();
        if n > 0 {
            activity.fan_speed = Some(guard.blocks[guard.tail].fan_speed);
        }
        for k in 0..n {
            let block = &guard.blocks[(guard.tail + k) & (CAP - 1)];
            for slot in 0..NUM_AXIS {
                if block.steps[slot] != 0 {
                    activity.active[slot] = true;
                }
            }
        }
        activity
    }

    /// Append one straight-line move to an absolute target.
    ///
    /// Blocks while the ring is full. On return the move has been appended
    /// (or dropped because it mapped to no more than `drop_segments` master
    /// steps) and the whole plan has been re-solved.
    ///
    /// `feed_rate` is in mm/min as received from the g-code layer.
    #[allow(clippy::too_many_arguments)]
    pub fn buffer_line(
        &mut self,
        x: f32,
        y: f32,
        z: f32,
        e: f32,
        feed_rate: f32,
        extruder: u8,
        driver: u8,
    ) {
        let extruder = if (extruder as usize) < self.tuning.extruder_count() {
            extruder
        } else {
            warn!("extruder {} not configured, using 0", extruder);
            0
        };

        let mut guard = self.ring.wait_for_space();

        let target = [
            roundf(x * self.tuning.axis_steps_per_unit[0]) as i64,
            roundf(y * self.tuning.axis_steps_per_unit[1]) as i64,
            roundf(z * self.tuning.axis_steps_per_unit[2]) as i64,
            roundf(e * self.tuning.e_steps(extruder)) as i64,
        ];

        // New extruder: rescale the stored E position to its steps-per-mm.
        if self.last_extruder != extruder
            && self.tuning.e_steps(extruder) != self.tuning.e_steps(self.last_extruder)
        {
            let factor =
                self.tuning.e_steps(extruder) / self.tuning.e_steps(self.last_extruder);
            self.position[3] = roundf(self.position[3] as f32 * factor) as i64;
        }
        self.last_extruder = extruder;

        let dx = target[0] - self.position[0];
        let dy = target[1] - self.position[1];
        let dz = target[2] - self.position[2];
        let mut de = target[3] - self.position[3];

        if de != 0 {
            if !self.extrusion_enabled {
                // Behave as if the extrusion happened, but do not move E.
                self.position[3] = target[3];
                de = 0;
                warn!("cold extrusion prevented, E movement dropped");
            } else if self.tuning.max_extrude_length > 0.0
                && de.unsigned_abs() as f32
                    > self.tuning.e_steps(extruder) * self.tuning.max_extrude_length
            {
                self.position[3] = target[3];
                de = 0;
                warn!(
                    "extrusion longer than {} mm prevented, E movement dropped",
                    self.tuning.max_extrude_length
                );
            }
        }

        let mechanics = self.tuning.mechanics;
        let motors = mechanics.motor_deltas(self.tuning.core_mix_factor, dx, dy, dz);

        let volumetric = self.volumetric_multiplier[extruder as usize];
        let flow = self.flow_percent[extruder as usize] as f32 / 100.0;
        let e_steps =
            roundf(de.unsigned_abs() as f32 * volumetric * flow) as u32;

        let mut block = Block {
            steps: [
                motors[0].unsigned_abs() as u32,
                motors[1].unsigned_abs() as u32,
                motors[2].unsigned_abs() as u32,
                e_steps,
            ],
            active_driver: driver,
            fan_speed: self.fan_speed,
            ..Block::default()
        };
        block.step_event_count = *block.steps.iter().max().unwrap_or(&0);

        if self.laser.is_none() && block.step_event_count <= self.tuning.drop_segments {
            return;
        }

        block.direction_bits = mechanics.direction_bits(dx, dy, dz, de, &motors);

        let mut feed_mm_s = feed_rate / 60.0;
        feed_mm_s = if block.steps[3] > 0 {
            feed_mm_s.max(self.tuning.min_feedrate)
        } else {
            feed_mm_s.max(self.tuning.min_travel_feedrate)
        };
        feed_mm_s = feed_mm_s.max(self.tuning.minimum_planner_speed);

        // The head's real displacement per axis; on Core* machines this is
        // distinct from what the motors travel.
        let spu = self.tuning.axis_steps_per_unit;
        let head_mm = [
            dx as f32 / spu[0],
            dy as f32 / spu[1],
            dz as f32 / spu[2],
        ];
        let e_mm = de as f32 / self.tuning.e_steps(extruder) * volumetric * flow;
        let mut delta_mm = [0.0f32; NUM_AXIS];
        match mechanics {
            Mechanics::Cartesian => {
                delta_mm[0] = head_mm[0];
                delta_mm[1] = head_mm[1];
                delta_mm[2] = head_mm[2];
            }
            Mechanics::CoreXy | Mechanics::CoreYx => {
                delta_mm[0] = motors[0] as f32 / spu[0];
                delta_mm[1] = motors[1] as f32 / spu[1];
                delta_mm[2] = head_mm[2];
            }
            Mechanics::CoreXz | Mechanics::CoreZx => {
                delta_mm[0] = motors[0] as f32 / spu[0];
                delta_mm[1] = head_mm[1];
                delta_mm[2] = motors[2] as f32 / spu[2];
            }
        }
        delta_mm[3] = e_mm;

        let linear_dropped = block.steps[0] <= self.tuning.drop_segments
            && block.steps[1] <= self.tuning.drop_segments
            && block.steps[2] <= self.tuning.drop_segments;
        block.millimeters = if linear_dropped {
            fabsf(delta_mm[3])
        } else {
            sqrtf(
                head_mm[0] * head_mm[0] + head_mm[1] * head_mm[1] + head_mm[2] * head_mm[2],
            )
        };

        if let Some(laser) = self.laser {
            let pulse_events = if laser.mode == LaserMode::Pulsed {
                fabsf(block.millimeters * laser.pulses_per_mm) as u32
            } else {
                0
            };
            block.laser = Some(LaserPlan {
                state: laser.state,
                mode: laser.mode,
                intensity: laser.intensity,
                duration_us: laser.duration_us,
                pulse_events,
            });
            block.step_event_count = block.step_event_count.max(pulse_events);
        }
        if block.step_event_count == 0 {
            return;
        }

        let inverse_millimeters = 1.0 / block.millimeters;
        let mut inverse_second = feed_mm_s * inverse_millimeters;

        let moves_queued = guard.len();

        // Slow down when the buffer starts to drain rather than stalling at
        // a corner waiting for a refill.
        if self.tuning.slowdown && moves_queued > 1 && moves_queued < CAP / 2 {
            let segment_time = roundf(1_000_000.0 / inverse_second) as u32;
            if segment_time < self.tuning.min_segment_time_us {
                let stretch = 2 * (self.tuning.min_segment_time_us - segment_time)
                    / moves_queued as u32;
                inverse_second = 1_000_000.0 / (segment_time + stretch) as f32;
            }
        }

        block.nominal_speed = block.millimeters * inverse_second;
        block.nominal_rate = ceilf(block.step_event_count as f32 * inverse_second) as u32;

        // Per-axis speed clamp: scale the whole move down by the worst ratio.
        let mut current_speed = [0.0f32; NUM_AXIS];
        let mut speed_factor = 1.0f32;
        for i in 0..NUM_AXIS {
            current_speed[i] = delta_mm[i] * inverse_second;
            let cs = fabsf(current_speed[i]);
            let max_feedrate = if i < 3 {
                self.tuning.max_feedrate[i]
            } else {
                self.tuning.e_max_feedrate[extruder as usize]
            };
            if cs > max_feedrate {
                speed_factor = speed_factor.min(max_feedrate / cs);
            }
        }
        if speed_factor < 1.0 {
            for speed in current_speed.iter_mut() {
                *speed *= speed_factor;
            }
            block.nominal_speed *= speed_factor;
            block.nominal_rate = (block.nominal_rate as f32 * speed_factor) as u32;
        }

        // Acceleration: print / travel / retract base, clamped per axis.
        let steps_per_mm = block.step_event_count as f32 * inverse_millimeters;
        let base_acceleration = if !block.has_linear_steps() {
            self.tuning.retract_acceleration[extruder as usize]
        } else if block.steps[3] == 0 {
            self.tuning.travel_acceleration
        } else {
            self.tuning.acceleration
        };
        let mut acceleration_st = ceilf(base_acceleration * steps_per_mm) as u32;
        let limits = [
            self.tuning.axis_steps_per_sqr_second[0],
            self.tuning.axis_steps_per_sqr_second[1],
            self.tuning.axis_steps_per_sqr_second[2],
            self.tuning.e_steps_per_sqr_second[extruder as usize],
        ];
        for (slot, limit) in limits.into_iter().enumerate() {
            let share = acceleration_st as f32 * block.steps[slot] as f32
                / block.step_event_count as f32;
            if share > limit as f32 {
                acceleration_st = limit;
            }
        }
        block.acceleration_st = acceleration_st;
        block.acceleration = acceleration_st as f32 / steps_per_mm;
        block.acceleration_rate =
            (((acceleration_st as u64) << 24) / STEPPER_TIMER_RATE as u64) as u32;

        // Junction jerk model. Start from a safe speed any junction can take,
        // then relax it against the previous move when one exists.
        let mut vmax_junction = self.tuning.max_xy_jerk / 2.0;
        let half_z_jerk = self.tuning.max_z_jerk / 2.0;
        let half_e_jerk = self.tuning.max_e_jerk[extruder as usize] / 2.0;
        if fabsf(current_speed[2]) > half_z_jerk {
            vmax_junction = vmax_junction.min(half_z_jerk);
        }
        if fabsf(current_speed[3]) > half_e_jerk {
            vmax_junction = vmax_junction.min(half_e_jerk);
        }
        vmax_junction = vmax_junction.min(block.nominal_speed);
        let safe_speed = vmax_junction;

        if moves_queued > 0 && self.previous_nominal_speed > 0.0001 {
            let dsx = current_speed[0] - self.previous_speed[0];
            let dsy = current_speed[1] - self.previous_speed[1];
            let dsz = fabsf(current_speed[2] - self.previous_speed[2]);
            let dse = fabsf(current_speed[3] - self.previous_speed[3]);
            let jerk = sqrtf(dsx * dsx + dsy * dsy);
            let mut factor = 1.0f32;
            if jerk > self.tuning.max_xy_jerk {
                factor = self.tuning.max_xy_jerk / jerk;
            }
            if dsz > self.tuning.max_z_jerk {
                factor = factor.min(self.tuning.max_z_jerk / dsz);
            }
            if dse > self.tuning.max_e_jerk[extruder as usize] {
                factor = factor.min(self.tuning.max_e_jerk[extruder as usize] / dse);
            }
            vmax_junction = self
                .previous_nominal_speed
                .min(block.nominal_speed * factor);
        }
        block.max_entry_speed = vmax_junction;

        let v_allowable = max_allowable_speed(
            -block.acceleration,
            self.tuning.minimum_planner_speed,
            block.millimeters,
        );
        block.entry_speed = vmax_junction.min(v_allowable);
        block.nominal_length = block.nominal_speed <= v_allowable;
        block.recalculate = true;

        self.previous_speed = current_speed;
        self.previous_nominal_speed = block.nominal_speed;

        let entry_factor = block.entry_speed / block.nominal_speed;
        let exit_factor = safe_speed / block.nominal_speed;
        calculate_trapezoid(&mut block, entry_factor, exit_factor);

        let head = guard.head;
        guard.blocks[head] = block;
        guard.head = RingState::<CAP>::next(head);
        self.position = target;

        self.recalculate(&mut guard);
        self.ring.publish(&guard);
    }

    /// Re-run the lookahead passes over the queued blocks without appending,
    /// e.g. after a tuning change.
    pub fn replan(&mut self) {
        let mut guard = self.ring.lock();
        self.recalculate(&mut guard);
    }

    /// Two-pass junction re-solve plus the trapezoid rewrite.
    fn recalculate(&self, state: &mut RingState<CAP>) {
        self.reverse_pass(state);
        self.forward_pass(state);
        self.recalculate_trapezoids(state);
    }

    /// Walk newest to oldest, clamping each entry speed to what the block
    /// after it can still brake away from. The newest block keeps the entry
    /// speed it was planned with; the tail block is never rewritten.
    fn reverse_pass(&self, state: &mut RingState<CAP>) {
        let n = state.len();
        for k in (1..n.saturating_sub(1)).rev() {
            let cur_i = (state.tail + k) & (CAP - 1);
            let next_i = (state.tail + k + 1) & (CAP - 1);
            let next_entry = state.blocks[next_i].entry_speed;
            let cur = &mut state.blocks[cur_i];
            if cur.busy || cur.entry_speed == cur.max_entry_speed {
                continue;
            }
            cur.entry_speed = if !cur.nominal_length && cur.max_entry_speed > next_entry {
                cur.max_entry_speed.min(max_allowable_speed(
                    -cur.acceleration,
                    next_entry,
                    cur.millimeters,
                ))
            } else {
                cur.max_entry_speed
            };
            cur.recalculate = true;
        }
    }

    /// Walk oldest to newest, clamping each entry speed to what the block
    /// before it can actually accelerate to.
    fn forward_pass(&self, state: &mut RingState<CAP>) {
        let n = state.len();
        for k in 1..n {
            let prev_i = (state.tail + k - 1) & (CAP - 1);
            let cur_i = (state.tail + k) & (CAP - 1);
            let prev = state.blocks[prev_i];
            if prev.nominal_length || prev.entry_speed >= state.blocks[cur_i].entry_speed {
                continue;
            }
            let reachable = max_allowable_speed(
                -prev.acceleration,
                prev.entry_speed,
                prev.millimeters,
            );
            let cur = &mut state.blocks[cur_i];
            let entry = cur.entry_speed.min(reachable);
            if cur.entry_speed != entry && !cur.busy {
                cur.entry_speed = entry;
                cur.recalculate = true;
            }
        }
    }

    /// Re-solve the trapezoid of every block whose junction speeds moved.
    /// The newest block always exits at the minimum planner speed.
    fn recalculate_trapezoids(&self, state: &mut RingState<CAP>) {
        let n = state.len();
        if n == 0 {
            return;
        }
        for k in 0..n - 1 {
            let cur_i = (state.tail + k) & (CAP - 1);
            let next_i = (state.tail + k + 1) & (CAP - 1);
            let next_entry = state.blocks[next_i].entry_speed;
            let next_recalculate = state.blocks[next_i].recalculate;
            let cur = &mut state.blocks[cur_i];
            if cur.recalculate || next_recalculate {
                let nominal = cur.nominal_speed;
                calculate_trapezoid(cur, cur.entry_speed / nominal, next_entry / nominal);
                cur.recalculate = false;
            }
        }
        let last_i = (state.tail + n - 1) & (CAP - 1);
        let last = &mut state.blocks[last_i];
        let nominal = last.nominal_speed;
        calculate_trapezoid(
            last,
            last.entry_speed / nominal,
            self.tuning.minimum_planner_speed / nominal,
        );
        last.recalculate = false;
    }
}
