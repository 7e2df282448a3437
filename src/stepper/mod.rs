//! The stepper engine: trapezoid generator and pulse emitter.
//!
//! [`StepperEngine::tick`] is the periodic handler. Each tick it latches a
//! block if none is in flight, polls the endstops, runs the Bresenham line
//! tracer for `step_loops` step events, reshapes its own period to trace the
//! block's acceleration / cruise / deceleration phases, and retires the
//! block once every master step has been emitted.

mod endstop;
mod timer;

pub use endstop::EndstopHits;
pub use timer::STEPPER_TIMER_RATE;

pub(crate) use endstop::EndstopMonitor;
pub(crate) use timer::{calc_timer, CLEANUP_PERIOD, IDLE_PERIOD};

use std::sync::Arc;

use log::warn;

use crate::config::{EngineConfig, MAX_EXTRUDERS};
use crate::hal::{Board, Motor};
use crate::kinematics::{Axis, DirectionBits, NUM_AXIS};
use crate::planner::{Block, BlockRing, LaserMode, LaserState, RingState};

/// A latched block: a private copy of the tail slot.
#[derive(Debug, Clone, Copy)]
struct Active {
    slot: usize,
    block: Block,
}

/// Consumer half of the motion core.
///
/// Owns the hardware. Drive [`tick`](Self::tick) from the step timer's
/// interrupt (or a dedicated thread on hosted targets); each call returns
/// the period it armed for the next one.
#[derive(Debug)]
pub struct StepperEngine<B: Board, const CAP: usize> {
    ring: Arc<BlockRing<CAP>>,
    config: EngineConfig,
    board: B,
    endstops: EndstopMonitor,
    current: Option<Active>,
    counters: [i64; NUM_AXIS],
    laser_counter: i64,
    step_events_completed: u32,
    acceleration_time: u32,
    deceleration_time: u32,
    acc_step_rate: u32,
    step_loops: u8,
    step_loops_nominal: u8,
    nominal_period: u16,
    out_bits: DirectionBits,
    count_direction: [i8; NUM_AXIS],
    counts: [i64; NUM_AXIS],
    extruder_countdown: [u16; MAX_EXTRUDERS],
    homing: bool,
    locked_z: bool,
    locked_z2: bool,
    laser_firing: bool,
    laser_last_firing: u32,
}

impl<B: Board, const CAP: usize> StepperEngine<B, CAP> {
    pub(crate) fn new(ring: Arc<BlockRing<CAP>>, config: EngineConfig, board: B) -> Self {
        let mut engine = Self {
            ring,
            config,
            board,
            endstops: EndstopMonitor::new(),
            current: None,
            counters: [0; NUM_AXIS],
            laser_counter: 0,
            step_events_completed: 0,
            acceleration_time: 0,
            deceleration_time: 0,
            acc_step_rate: 0,
            step_loops: 1,
            step_loops_nominal: 1,
            nominal_period: IDLE_PERIOD,
            out_bits: DirectionBits::empty(),
            count_direction: [1; NUM_AXIS],
            counts: [0; NUM_AXIS],
            extruder_countdown: [0; MAX_EXTRUDERS],
            homing: false,
            locked_z: false,
            locked_z2: false,
            laser_firing: false,
            laser_last_firing: 0,
        };
        engine.apply_directions(0);
        engine
    }

    /// The shared ring, for queries and cross-context control.
    #[inline]
    pub fn ring(&self) -> &Arc<BlockRing<CAP>> {
        &self.ring
    }

    /// Access the board, e.g. to reconfigure pins between moves.
    #[inline]
    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    /// Enable or disable endstop polling (disabled after homing, typically).
    pub fn set_endstops_enabled(&mut self, enabled: bool) {
        self.endstops.set_enabled(enabled);
    }

    /// Enable or disable the Z probe input.
    pub fn set_probe_enabled(&mut self, enabled: bool) {
        self.endstops.set_probe_enabled(enabled);
    }

    /// Enter or leave dual-Z homing mode (per-motor endstop gating).
    pub fn set_homing(&mut self, homing: bool) {
        self.homing = homing;
    }

    /// Hold the first Z motor still during dual-Z homing.
    pub fn set_z_locked(&mut self, locked: bool) {
        self.locked_z = locked;
    }

    /// Hold the second Z motor still during dual-Z homing.
    pub fn set_z2_locked(&mut self, locked: bool) {
        self.locked_z2 = locked;
    }

    /// Executed head position of an axis in millimeters.
    ///
    /// Inverts the Core* mix, so this reports where the tool actually is,
    /// not what any single motor did.
    pub fn axis_position_mm(&self, axis: Axis) -> f32 {
        let counts = [
            self.ring.count_position(0),
            self.ring.count_position(1),
            self.ring.count_position(2),
            self.ring.count_position(3),
        ];
        let head = self
            .config
            .mechanics
            .head_position(self.config.core_mix_factor, &counts, axis);
        let steps_per_unit = match axis {
            Axis::E => self.config.e_steps_per_unit[0],
            _ => self.config.axis_steps_per_unit[axis.index()],
        };
        head / steps_per_unit
    }

    /// One pass of the periodic handler. Arms the board timer and returns
    /// the armed period in timer ticks.
    pub fn tick(&mut self) -> u16 {
        if self.ring.take_abort() {
            self.current = None;
        }
        if self.ring.cleanup_pending() {
            self.current = None;
            self.board.arm_timer(CLEANUP_PERIOD);
            return CLEANUP_PERIOD;
        }

        if self.current.is_none() && !self.try_latch() {
            if self.ring.take_disable_request() {
                self.disable_all();
            }
            self.board.arm_timer(IDLE_PERIOD);
            return IDLE_PERIOD;
        }
        let block = match self.current.as_ref() {
            Some(active) => active.block,
            None => {
                self.board.arm_timer(IDLE_PERIOD);
                return IDLE_PERIOD;
            }
        };

        if self.endstops.enabled() {
            self.poll_endstops(&block);
        }

        self.run_laser(&block);

        for _ in 0..self.step_loops {
            if self.step_events_completed >= block.step_event_count {
                break;
            }
            self.step_once(&block);
            self.step_events_completed += 1;
        }
        for slot in 0..NUM_AXIS {
            self.ring.set_count_position(slot, self.counts[slot]);
        }

        let period = self.next_period(&block);

        // Never arm a compare value the timer has already passed.
        let now = self.board.timer_count();
        let period = period.max(now.saturating_add(16));

        if self.step_events_completed >= block.step_event_count {
            self.retire();
        }

        self.board.arm_timer(period);
        period
    }

    /// Latch the tail block, if any. Returns whether a block is in flight.
    fn try_latch(&mut self) -> bool {
        let active = {
            let mut guard = self.ring.lock();
            if guard.is_empty() {
                return false;
            }
            let slot = guard.tail;
            guard.blocks[slot].busy = true;
            guard.executing = true;
            self.ring.publish(&guard);
            Active {
                slot,
                block: guard.blocks[slot],
            }
        };

        let block = active.block;
        // Pick up any position reseed that happened while idle.
        for slot in 0..NUM_AXIS {
            self.counts[slot] = self.ring.count_position(slot);
        }
        self.apply_enables(&block);
        if block.direction_bits != self.out_bits {
            self.out_bits = block.direction_bits;
            self.apply_directions(block.active_driver);
        }

        self.deceleration_time = 0;
        let (nominal_period, nominal_loops) = self.timer_for(block.nominal_rate);
        self.nominal_period = nominal_period;
        self.step_loops_nominal = nominal_loops;
        self.acc_step_rate = block.initial_rate;
        let (initial_period, initial_loops) = self.timer_for(block.initial_rate);
        self.acceleration_time = initial_period as u32;
        self.step_loops = initial_loops;

        let half = -((block.step_event_count >> 1) as i64);
        self.counters = [half; NUM_AXIS];
        self.laser_counter = half;
        self.step_events_completed = 0;
        self.current = Some(active);
        true
    }

    fn timer_for(&mut self, step_rate: u32) -> (u16, u8) {
        calc_timer(
            step_rate,
            self.config.max_step_frequency,
            self.config.double_step_frequency,
        )
    }

    /// Sample the endstops and apply any trigger to the block in flight.
    fn poll_endstops(&mut self, block: &Block) {
        let outcome = self.endstops.poll(
            &mut self.board,
            block,
            self.out_bits,
            &self.counts,
            &self.config,
            self.homing,
        );
        if outcome.hits.is_empty() {
            return;
        }
        for (slot, trig) in outcome.trigsteps.iter().enumerate() {
            if let Some(position) = trig {
                self.ring.set_endstop_trigsteps(slot, *position);
            }
        }
        self.ring.record_endstop_hit(outcome.hits);
        if outcome.finish {
            self.step_events_completed = block.step_event_count;
            if self.config.abort_on_endstop_hit
                && !outcome.hits.intersects(EndstopHits::Z_PROBE)
            {
                warn!("endstop hit {:?}, purging motion queue", outcome.hits);
                self.ring.quick_stop();
            }
        }
    }

    /// Continuous-mode firing and the duration watchdog.
    fn run_laser(&mut self, block: &Block) {
        let Some(laser) = block.laser else {
            if self.laser_firing {
                self.board.laser_off();
                self.laser_firing = false;
            }
            return;
        };
        match laser.state {
            LaserState::On if laser.mode == LaserMode::Continuous => {
                self.board.laser_fire(laser.intensity);
                self.laser_last_firing = self.board.micros();
                self.laser_firing = true;
            }
            LaserState::Off if self.laser_firing => {
                self.board.laser_off();
                self.laser_firing = false;
            }
            _ => {}
        }
        if self.laser_firing && laser.duration_us != 0 {
            let elapsed = self.board.micros().wrapping_sub(self.laser_last_firing);
            if elapsed > laser.duration_us {
                self.board.laser_off();
                self.laser_firing = false;
            }
        }
    }

    /// One Bresenham step event: every axis whose accumulator crosses zero
    /// emits a pulse; the master axis always does.
    fn step_once(&mut self, block: &Block) {
        for slot in 0..NUM_AXIS {
            self.counters[slot] += block.steps[slot] as i64;
            if self.counters[slot] > 0 {
                self.write_step(slot, block, true);
            }
        }
        for slot in 0..NUM_AXIS {
            if self.counters[slot] > 0 {
                self.counters[slot] -= block.step_event_count as i64;
                self.counts[slot] += self.count_direction[slot] as i64;
                self.write_step(slot, block, false);
            }
        }
        if let Some(laser) = block.laser {
            if laser.mode == LaserMode::Pulsed {
                self.laser_counter += laser.pulse_events as i64;
                if self.laser_counter > 0 {
                    if laser.state == LaserState::On {
                        self.board.laser_fire(laser.intensity);
                        self.laser_last_firing = self.board.micros();
                        self.laser_firing = true;
                    }
                    self.laser_counter -= block.step_event_count as i64;
                }
            }
        }
    }

    /// Emit one edge on the step line(s) of a slot.
    fn write_step(&mut self, slot: usize, block: &Block, high: bool) {
        match slot {
            0 => self.board.set_step(Motor::X, high),
            1 => self.board.set_step(Motor::Y, high),
            2 => {
                let (step_z, step_z2) = self.z_motor_gates();
                if step_z {
                    self.board.set_step(Motor::Z, high);
                }
                if self.config.dual_z && step_z2 {
                    self.board.set_step(Motor::Z2, high);
                }
            }
            _ => self.board.set_step(Motor::E(block.active_driver), high),
        }
    }

    /// Dual-Z homing gates each Z motor on its own endstop so the gantry
    /// squares up; outside homing both motors always step.
    fn z_motor_gates(&self) -> (bool, bool) {
        if !self.config.dual_z || !self.homing {
            return (true, true);
        }
        let descending = self.count_direction[2] < 0;
        let (z_bit, z2_bit) = if descending {
            (EndstopHits::Z_MIN, EndstopHits::Z2_MIN)
        } else {
            (EndstopHits::Z_MAX, EndstopHits::Z2_MAX)
        };
        let z = !self.endstops.sampled(z_bit) && !self.locked_z;
        let z2 = !self.endstops.sampled(z2_bit) && !self.locked_z2;
        (z, z2)
    }

    /// Choose the next period from the block phase the master step count is
    /// in, integrating the 24.8 fixed-point speed.
    fn next_period(&mut self, block: &Block) -> u16 {
        if self.step_events_completed <= block.accelerate_until {
            let gain =
                ((block.acceleration_rate as u64 * self.acceleration_time as u64) >> 24) as u32;
            self.acc_step_rate = (block.initial_rate + gain).min(block.nominal_rate);
            let (period, loops) = self.timer_for(self.acc_step_rate);
            self.step_loops = loops;
            self.acceleration_time += period as u32;
            period
        } else if self.step_events_completed > block.decelerate_after {
            let loss =
                ((block.acceleration_rate as u64 * self.deceleration_time as u64) >> 24) as u32;
            let step_rate = if loss <= self.acc_step_rate {
                (self.acc_step_rate - loss).max(block.final_rate)
            } else {
                block.final_rate
            };
            let (period, loops) = self.timer_for(step_rate);
            self.step_loops = loops;
            self.deceleration_time += period as u32;
            period
        } else {
            self.step_loops = self.step_loops_nominal;
            self.nominal_period
        }
    }

    /// Unlatch the finished block and advance the tail.
    fn retire(&mut self) {
        let Some(active) = self.current.take() else {
            return;
        };
        let drained = {
            let mut guard = self.ring.lock();
            // A quick stop may have drained the ring underneath the latched
            // copy.
            if !guard.is_empty() && guard.tail == active.slot {
                guard.blocks[active.slot].busy = false;
                guard.tail = RingState::<CAP>::next(active.slot);
            }
            guard.executing = false;
            self.ring.publish(&guard);
            self.ring.notify_space();
            if guard.is_empty() {
                self.ring.notify_drained();
            }
            guard.is_empty()
        };
        if drained && self.ring.take_disable_request() {
            self.disable_all();
        }
    }

    /// Write the direction latches and count directions from `out_bits`.
    fn apply_directions(&mut self, e_driver: u8) {
        let motors = [Motor::X, Motor::Y, Motor::Z];
        for (slot, motor) in motors.into_iter().enumerate() {
            let negative = self.out_bits.contains(DirectionBits::for_slot(slot));
            self.board.set_dir(motor, negative);
            if motor == Motor::Z && self.config.dual_z {
                self.board.set_dir(Motor::Z2, negative);
            }
            self.count_direction[slot] = if negative { -1 } else { 1 };
        }
        let e_negative = self.out_bits.contains(DirectionBits::E);
        self.board.set_dir(Motor::E(e_driver), e_negative);
        self.count_direction[3] = if e_negative { -1 } else { 1 };
    }

    /// Power up the motors a block needs; extruders follow the inactive
    /// driver countdown so alternating toolchanges do not thrash.
    fn apply_enables(&mut self, block: &Block) {
        let mechanics = self.config.mechanics;
        if mechanics.is_core() {
            let second = mechanics.second_core_slot();
            if block.steps[0] != 0 || block.steps[second] != 0 {
                self.board.set_enable(Motor::X, true);
                match mechanics.core_partner_axis() {
                    Axis::Z => self.board.set_enable(Motor::Z, true),
                    _ => self.board.set_enable(Motor::Y, true),
                }
            }
            let plain = if second == 1 { 2 } else { 1 };
            if block.steps[plain] != 0 {
                let motor = if plain == 2 { Motor::Z } else { Motor::Y };
                self.board.set_enable(motor, true);
            }
        } else {
            if block.steps[0] != 0 {
                self.board.set_enable(Motor::X, true);
            }
            if block.steps[1] != 0 {
                self.board.set_enable(Motor::Y, true);
            }
            if block.steps[2] != 0 {
                self.board.set_enable(Motor::Z, true);
            }
        }
        if self.config.dual_z && block.steps[2] != 0 {
            self.board.set_enable(Motor::Z2, true);
        }

        if block.steps[3] == 0 {
            return;
        }
        let extruders = self.config.e_steps_per_unit.len();
        if !self.config.disable_inactive_extruder {
            for i in 0..extruders {
                self.board.set_enable(Motor::E(i as u8), true);
            }
            return;
        }
        for countdown in self.extruder_countdown.iter_mut().take(extruders) {
            *countdown = countdown.saturating_sub(1);
        }
        let driver = block.active_driver as usize;
        self.board.set_enable(Motor::E(block.active_driver), true);
        if driver < MAX_EXTRUDERS {
            self.extruder_countdown[driver] = (CAP * 2) as u16;
        }
        for i in 0..extruders {
            if i != driver && self.extruder_countdown[i] == 0 {
                self.board.set_enable(Motor::E(i as u8), false);
            }
        }
    }

    /// Power down every motor.
    fn disable_all(&mut self) {
        self.board.set_enable(Motor::X, false);
        self.board.set_enable(Motor::Y, false);
        self.board.set_enable(Motor::Z, false);
        if self.config.dual_z {
            self.board.set_enable(Motor::Z2, false);
        }
        for i in 0..self.config.e_steps_per_unit.len() {
            self.board.set_enable(Motor::E(i as u8), false);
        }
    }
}
