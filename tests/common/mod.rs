//! Shared test fixtures: a scripted board double and a reference machine
//! configuration.
#![allow(dead_code)]

use motion_core::config::{
    AxesConfig, ExtruderConfig, MachineConfig, MmPerSec, MmPerSecSq, PlannerConfig,
};
use motion_core::hal::{Board, Endstop, Motor};
use motion_core::stepper::StepperEngine;

/// X, Y, Z, Z2 and four extruder channels.
pub const MOTORS: usize = 8;

pub fn motor_index(motor: Motor) -> usize {
    match motor {
        Motor::X => 0,
        Motor::Y => 1,
        Motor::Z => 2,
        Motor::Z2 => 3,
        Motor::E(i) => 4 + i as usize,
    }
}

pub fn endstop_index(endstop: Endstop) -> usize {
    match endstop {
        Endstop::XMin => 0,
        Endstop::XMax => 1,
        Endstop::YMin => 2,
        Endstop::YMax => 3,
        Endstop::ZMin => 4,
        Endstop::ZMax => 5,
        Endstop::Z2Min => 6,
        Endstop::Z2Max => 7,
        Endstop::ZProbe => 8,
    }
}

/// In-memory board: counts pulses, integrates position from the latched
/// directions, and lets tests script endstop levels.
pub struct SimBoard {
    pub rising_edges: [u64; MOTORS],
    pub position: [i64; MOTORS],
    pub dir_negative: [bool; MOTORS],
    pub enabled: [Option<bool>; MOTORS],
    pub endstop_state: [bool; 9],
    pub armed_periods: Vec<u16>,
    pub laser_firings: u32,
    pub clock_us: u32,
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            rising_edges: [0; MOTORS],
            position: [0; MOTORS],
            dir_negative: [false; MOTORS],
            enabled: [None; MOTORS],
            endstop_state: [false; 9],
            armed_periods: Vec::new(),
            laser_firings: 0,
            clock_us: 0,
        }
    }
}

impl Board for SimBoard {
    fn set_step(&mut self, motor: Motor, high: bool) {
        if high {
            let i = motor_index(motor);
            self.rising_edges[i] += 1;
            self.position[i] += if self.dir_negative[i] { -1 } else { 1 };
        }
    }

    fn set_dir(&mut self, motor: Motor, negative: bool) {
        self.dir_negative[motor_index(motor)] = negative;
    }

    fn set_enable(&mut self, motor: Motor, enabled: bool) {
        self.enabled[motor_index(motor)] = Some(enabled);
    }

    fn endstop_triggered(&mut self, endstop: Endstop) -> bool {
        self.endstop_state[endstop_index(endstop)]
    }

    fn timer_count(&mut self) -> u16 {
        0
    }

    fn arm_timer(&mut self, period_ticks: u16) {
        self.armed_periods.push(period_ticks);
    }

    fn micros(&mut self) -> u32 {
        self.clock_us = self.clock_us.wrapping_add(1);
        self.clock_us
    }

    fn laser_fire(&mut self, _intensity: u8) {
        self.laser_firings += 1;
    }
}

/// Reference machine for the scenario tests: 80 steps/mm and 300 mm/s on
/// X/Y, 1000 mm/s² acceleration, 20 mm/s XY jerk.
pub fn scenario_config() -> MachineConfig {
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
            max_acceleration: [MmPerSecSq(3000.0), MmPerSecSq(3000.0), MmPerSecSq(100.0)],
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

/// Tick the engine until the queue drains or the tick budget runs out.
/// Returns the number of ticks spent.
pub fn drain<B: Board, const CAP: usize>(
    engine: &mut StepperEngine<B, CAP>,
    max_ticks: usize,
) -> usize {
    let mut ticks = 0;
    while engine.ring().is_busy() && ticks < max_ticks {
        engine.tick();
        ticks += 1;
    }
    assert!(ticks < max_ticks, "queue failed to drain in {} ticks", max_ticks);
    ticks
}
