//! Endstop monitoring.
//!
//! Each switch is sampled once per tick and a trigger needs two consecutive
//! samples at the active level. Which limit to check follows the *head*
//! direction of travel: on Core* mechanics a motor direction bit says
//! nothing about where the tool is going, and an axis whose two core motors
//! cancel out must not arm its switches at all.

use bitflags::bitflags;
use libm::roundf;

use crate::config::EngineConfig;
use crate::hal::{Board, Endstop};
use crate::kinematics::{Axis, DirectionBits, Mechanics, NUM_AXIS};
use crate::planner::Block;

bitflags! {
    /// Triggered-switch bits, also used for the raw per-tick samples.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EndstopHits: u16 {
        /// X minimum switch.
        const X_MIN = 1 << 0;
        /// X maximum switch.
        const X_MAX = 1 << 1;
        /// Y minimum switch.
        const Y_MIN = 1 << 2;
        /// Y maximum switch.
        const Y_MAX = 1 << 3;
        /// Z minimum switch.
        const Z_MIN = 1 << 4;
        /// Z maximum switch.
        const Z_MAX = 1 << 5;
        /// Second Z minimum switch.
        const Z2_MIN = 1 << 6;
        /// Second Z maximum switch.
        const Z2_MAX = 1 << 7;
        /// Z probe input.
        const Z_PROBE = 1 << 8;
    }
}

/// Result of one endstop poll.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PollOutcome {
    /// Switches confirmed triggered this tick.
    pub hits: EndstopHits,
    /// Head-frame trigger positions per linear axis, in steps.
    pub trigsteps: [Option<i64>; 3],
    /// The current block must retire early.
    pub finish: bool,
}

/// Debounced endstop state, owned by the stepper engine.
#[derive(Debug, Default)]
pub(crate) struct EndstopMonitor {
    enabled: bool,
    probe_enabled: bool,
    old_bits: EndstopHits,
}

impl EndstopMonitor {
    pub fn new() -> Self {
        Self {
            enabled: true,
            probe_enabled: false,
            old_bits: EndstopHits::empty(),
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_probe_enabled(&mut self, enabled: bool) {
        self.probe_enabled = enabled;
    }

    /// Level of a switch as of the previous sample (used for the dual-Z
    /// per-motor step gate).
    #[inline]
    pub fn sampled(&self, bit: EndstopHits) -> bool {
        self.old_bits.contains(bit)
    }

    /// Sample every relevant switch once and report confirmed triggers.
    pub fn poll<B: Board>(
        &mut self,
        board: &mut B,
        block: &Block,
        out_bits: DirectionBits,
        counts: &[i64; NUM_AXIS],
        config: &EngineConfig,
        homing: bool,
    ) -> PollOutcome {
        let mut current = EndstopHits::empty();
        let mut outcome = PollOutcome::default();
        let mechanics = config.mechanics;
        let k = config.core_mix_factor;
        let core2 = mechanics.second_core_slot();

        let head_steps = |axis: Axis| -> i64 {
            roundf(mechanics.head_position(k, counts, axis)) as i64
        };

        // X: on Core* machines the head moves in X unless the two core
        // motors exactly cancel.
        let x_active = if mechanics.is_core() {
            block.steps[0] != block.steps[core2]
                || out_bits.contains(DirectionBits::A)
                    == out_bits.contains(DirectionBits::for_slot(core2))
        } else {
            true
        };
        if x_active {
            let x_negative = if mechanics.is_core() {
                out_bits.contains(DirectionBits::X_HEAD)
            } else {
                out_bits.contains(DirectionBits::X)
            };
            let (switch, hit) = if x_negative {
                (Endstop::XMin, EndstopHits::X_MIN)
            } else {
                (Endstop::XMax, EndstopHits::X_MAX)
            };
            self.check(
                board,
                switch,
                hit,
                block.steps[0] > 0,
                head_steps(Axis::X),
                0,
                &mut current,
                &mut outcome,
            );
        }

        // Y: gated on CoreXY/YX, where a pure X move drives both motors the
        // same way.
        let xy_core = matches!(mechanics, Mechanics::CoreXy | Mechanics::CoreYx);
        let y_active = if xy_core {
            block.steps[0] != block.steps[1]
                || out_bits.contains(DirectionBits::A) != out_bits.contains(DirectionBits::B)
        } else {
            true
        };
        if y_active {
            let y_negative = if xy_core {
                out_bits.contains(DirectionBits::Y_HEAD)
            } else {
                out_bits.contains(DirectionBits::Y)
            };
            let (switch, hit) = if y_negative {
                (Endstop::YMin, EndstopHits::Y_MIN)
            } else {
                (Endstop::YMax, EndstopHits::Y_MAX)
            };
            self.check(
                board,
                switch,
                hit,
                block.steps[1] > 0,
                head_steps(Axis::Y),
                1,
                &mut current,
                &mut outcome,
            );
        }

        // Z: gated on CoreXZ/ZX.
        let xz_core = matches!(mechanics, Mechanics::CoreXz | Mechanics::CoreZx);
        let z_active = if xz_core {
            block.steps[0] != block.steps[2]
                || out_bits.contains(DirectionBits::A) != out_bits.contains(DirectionBits::C)
        } else {
            true
        };
        if z_active {
            let z_negative = if xz_core {
                out_bits.contains(DirectionBits::Z_HEAD)
            } else {
                out_bits.contains(DirectionBits::Z)
            };
            if z_negative {
                if config.dual_z {
                    self.check_dual_z(
                        board,
                        Endstop::ZMin,
                        Endstop::Z2Min,
                        EndstopHits::Z_MIN,
                        EndstopHits::Z2_MIN,
                        block,
                        counts,
                        homing,
                        &mut current,
                        &mut outcome,
                    );
                } else {
                    self.check(
                        board,
                        Endstop::ZMin,
                        EndstopHits::Z_MIN,
                        block.steps[2] > 0,
                        head_steps(Axis::Z),
                        2,
                        &mut current,
                        &mut outcome,
                    );
                }
                if self.probe_enabled {
                    self.check(
                        board,
                        Endstop::ZProbe,
                        EndstopHits::Z_PROBE,
                        block.steps[2] > 0,
                        head_steps(Axis::Z),
                        2,
                        &mut current,
                        &mut outcome,
                    );
                }
            } else if config.dual_z {
                self.check_dual_z(
                    board,
                    Endstop::ZMax,
                    Endstop::Z2Max,
                    EndstopHits::Z_MAX,
                    EndstopHits::Z2_MAX,
                    block,
                    counts,
                    homing,
                    &mut current,
                    &mut outcome,
                );
            } else {
                self.check(
                    board,
                    Endstop::ZMax,
                    EndstopHits::Z_MAX,
                    block.steps[2] > 0,
                    head_steps(Axis::Z),
                    2,
                    &mut current,
                    &mut outcome,
                );
            }
        }

        self.old_bits = current;
        outcome
    }

    /// Sample one switch; a trigger needs the previous sample to agree and
    /// the axis to be stepping toward the switch.
    #[allow(clippy::too_many_arguments)]
    fn check<B: Board>(
        &self,
        board: &mut B,
        switch: Endstop,
        hit: EndstopHits,
        moving: bool,
        position: i64,
        axis_slot: usize,
        current: &mut EndstopHits,
        outcome: &mut PollOutcome,
    ) {
        if board.endstop_triggered(switch) {
            *current |= hit;
        }
        if current.contains(hit) && self.old_bits.contains(hit) && moving {
            outcome.trigsteps[axis_slot] = Some(position);
            outcome.hits |= hit;
            outcome.finish = true;
        }
    }

    /// Dual-Z: both switches are sampled; while homing the block only
    /// retires once both have triggered, so the lagging motor can square the
    /// gantry.
    #[allow(clippy::too_many_arguments)]
    fn check_dual_z<B: Board>(
        &self,
        board: &mut B,
        z_switch: Endstop,
        z2_switch: Endstop,
        z_hit: EndstopHits,
        z2_hit: EndstopHits,
        block: &Block,
        counts: &[i64; NUM_AXIS],
        homing: bool,
        current: &mut EndstopHits,
        outcome: &mut PollOutcome,
    ) {
        if board.endstop_triggered(z_switch) {
            *current |= z_hit;
        }
        if board.has_endstop(z2_switch) {
            if board.endstop_triggered(z2_switch) {
                *current |= z2_hit;
            }
        } else if current.contains(z_hit) {
            *current |= z2_hit;
        }

        let z_triggered = current.contains(z_hit) && self.old_bits.contains(z_hit);
        let z2_triggered = current.contains(z2_hit) && self.old_bits.contains(z2_hit);

        if (z_triggered || z2_triggered) && block.steps[2] > 0 {
            outcome.trigsteps[2] = Some(counts[2]);
            outcome.hits |= z_hit;
            if !homing || (z_triggered && z2_triggered) {
                outcome.finish = true;
            }
        }
    }
}
