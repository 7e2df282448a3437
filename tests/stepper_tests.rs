//! Stepper engine behavior: Bresenham closure, endstop handling, quick stop
//! and position readback, driven tick by tick against the board double.

mod common;

use common::{drain, endstop_index, motor_index, scenario_config, SimBoard};
use motion_core::hal::{Endstop, Motor};
use motion_core::kinematics::{Axis, Mechanics};
use motion_core::planner::{LaserMode, LaserSettings, LaserState, Planner};
use motion_core::stepper::{EndstopHits, StepperEngine};
use motion_core::split;

const CAP: usize = 16;
const MAX_TICKS: usize = 200_000;

fn setup() -> (Planner<CAP>, StepperEngine<SimBoard, CAP>) {
    split::<_, CAP>(&scenario_config(), SimBoard::new()).expect("valid config")
}

#[test]
fn bresenham_closure_on_a_diagonal() {
    let (mut planner, mut engine) = setup();
    planner.buffer_line(10.0, 5.0, 0.0, 0.0, 3600.0, 0, 0);
    drain(&mut engine, MAX_TICKS);

    let ring = planner.ring();
    assert_eq!(ring.count_position(0), 800);
    assert_eq!(ring.count_position(1), 400);
    let board = engine.board_mut();
    // the master axis steps exactly once per step event
    assert_eq!(board.rising_edges[motor_index(Motor::X)], 800);
    assert_eq!(board.rising_edges[motor_index(Motor::Y)], 400);
    assert_eq!(board.position[motor_index(Motor::X)], 800);
    assert_eq!(board.position[motor_index(Motor::Y)], 400);
}

#[test]
fn round_trip_within_one_step() {
    let (mut planner, mut engine) = setup();
    planner.set_position(4.0, 3.0, 0.0, 0.0);
    planner.buffer_line(9.5, 7.25, 0.0, 0.0, 3600.0, 0, 0);
    drain(&mut engine, MAX_TICKS);

    let x = engine.axis_position_mm(Axis::X);
    let y = engine.axis_position_mm(Axis::Y);
    assert!((x - 9.5).abs() <= 1.0 / 80.0, "x = {}", x);
    assert!((y - 7.25).abs() <= 1.0 / 80.0, "y = {}", y);
}

#[test]
fn retract_moves_e_backwards() {
    let (mut planner, mut engine) = setup();
    planner.buffer_line(0.0, 0.0, 0.0, -2.0, 1800.0, 0, 0);
    drain(&mut engine, MAX_TICKS);

    assert_eq!(planner.ring().count_position(3), -1000);
    assert_eq!(
        engine.board_mut().position[motor_index(Motor::E(0))],
        -1000
    );
}

#[test]
fn corexy_motors_share_a_pure_y_move() {
    let mut config = scenario_config();
    config.mechanics = Mechanics::CoreXy;
    let (mut planner, mut engine) =
        split::<_, CAP>(&config, SimBoard::new()).expect("valid config");

    planner.buffer_line(0.0, 5.0, 0.0, 0.0, 3600.0, 0, 0);
    drain(&mut engine, MAX_TICKS);

    let ring = planner.ring();
    // A = +400, B = -400: the head moved in Y only
    assert_eq!(ring.count_position(0), 400);
    assert_eq!(ring.count_position(1), -400);
    assert!((engine.axis_position_mm(Axis::X) - 0.0).abs() < 1.0 / 80.0);
    assert!((engine.axis_position_mm(Axis::Y) - 5.0).abs() < 1.0 / 80.0);
}

#[test]
fn pretriggered_endstop_retires_the_block_early() {
    let (mut planner, mut engine) = setup();
    engine.board_mut().endstop_state[endstop_index(Endstop::XMin)] = true;

    planner.buffer_line(-5.0, 0.0, 0.0, 0.0, 3600.0, 0, 0);
    let ticks = drain(&mut engine, MAX_TICKS);

    let ring = planner.ring();
    assert!(ring.endstop_hits().contains(EndstopHits::X_MIN));
    assert_eq!(ring.endstop_trigsteps(0), ring.count_position(0));
    // two-sample debounce: the block dies on the second tick, far short of
    // its 400 steps
    assert!(ring.count_position(0).abs() < 10);
    assert!(ticks < 10);

    ring.clear_endstop_hits();
    assert!(ring.endstop_hits().is_empty());
}

#[test]
fn max_endstop_records_the_max_bit() {
    let (mut planner, mut engine) = setup();
    engine.board_mut().endstop_state[endstop_index(Endstop::XMax)] = true;

    planner.buffer_line(5.0, 0.0, 0.0, 0.0, 3600.0, 0, 0);
    drain(&mut engine, MAX_TICKS);

    let hits = planner.ring().endstop_hits();
    assert!(hits.contains(EndstopHits::X_MAX));
    assert!(!hits.contains(EndstopHits::X_MIN));
}

#[test]
fn abort_on_endstop_purges_the_queue() {
    let mut config = scenario_config();
    config.endstops.abort_on_hit = true;
    let (mut planner, mut engine) =
        split::<_, CAP>(&config, SimBoard::new()).expect("valid config");
    engine.board_mut().endstop_state[endstop_index(Endstop::YMin)] = true;

    planner.buffer_line(0.0, -5.0, 0.0, 0.0, 3600.0, 0, 0);
    planner.buffer_line(0.0, -10.0, 0.0, 0.0, 3600.0, 0, 0);
    for _ in 0..4 {
        engine.tick();
    }

    assert_eq!(planner.moves_planned(), 0);
    assert!(planner.ring().endstop_hits().contains(EndstopHits::Y_MIN));
}

#[test]
fn quick_stop_aborts_the_move_in_flight() {
    let (mut planner, mut engine) = setup();
    planner.buffer_line(100.0, 0.0, 0.0, 0.0, 3600.0, 0, 0);
    for _ in 0..50 {
        engine.tick();
    }
    let travelled = planner.ring().count_position(0);
    assert!(travelled > 0 && travelled < 8000);

    planner.quick_stop();
    assert_eq!(planner.moves_planned(), 0);
    assert!(!planner.ring().is_busy());

    // the next interrupts consume the cleanup countdown without stepping
    let period = engine.tick();
    assert_eq!(period, 200);
    engine.tick();
    assert_eq!(planner.ring().count_position(0), travelled);
}

#[test]
fn dual_z_homing_gates_each_motor_on_its_endstop() {
    let mut config = scenario_config();
    config.endstops.dual_z = true;
    let (mut planner, mut engine) =
        split::<_, CAP>(&config, SimBoard::new()).expect("valid config");
    engine.set_homing(true);
    engine.board_mut().endstop_state[endstop_index(Endstop::Z2Min)] = true;

    planner.buffer_line(0.0, 0.0, -2.0, 0.0, 600.0, 0, 0);
    for _ in 0..100 {
        engine.tick();
    }

    let board = engine.board_mut();
    let z_edges = board.rising_edges[motor_index(Motor::Z)];
    let z2_edges = board.rising_edges[motor_index(Motor::Z2)];
    // the second motor stopped at its switch while the first keeps homing
    assert!(z_edges > z2_edges + 50, "z {} z2 {}", z_edges, z2_edges);
    assert!(planner.ring().is_busy());

    engine.board_mut().endstop_state[endstop_index(Endstop::ZMin)] = true;
    let ticks = drain(&mut engine, MAX_TICKS);
    assert!(ticks < 10);
    assert!(planner.ring().endstop_hits().contains(EndstopHits::Z_MIN));
}

#[test]
fn pulsed_laser_fires_per_planned_pulse() {
    let (mut planner, mut engine) = setup();
    planner.set_laser(Some(LaserSettings {
        state: LaserState::On,
        mode: LaserMode::Pulsed,
        intensity: 200,
        duration_us: 0,
        pulses_per_mm: 2.0,
    }));
    planner.buffer_line(10.0, 0.0, 0.0, 0.0, 3600.0, 0, 0);
    drain(&mut engine, MAX_TICKS);

    let firings = engine.board_mut().laser_firings;
    assert!((19..=21).contains(&firings), "firings = {}", firings);
}

#[test]
fn finish_and_disable_powers_motors_down() {
    let (mut planner, mut engine) = setup();
    planner.buffer_line(1.0, 0.0, 0.0, 0.5, 3600.0, 0, 0);
    drain(&mut engine, MAX_TICKS);
    assert_eq!(
        engine.board_mut().enabled[motor_index(Motor::X)],
        Some(true)
    );

    planner.finish_and_disable();
    engine.tick();

    let board = engine.board_mut();
    assert_eq!(board.enabled[motor_index(Motor::X)], Some(false));
    assert_eq!(board.enabled[motor_index(Motor::E(0))], Some(false));
}

#[test]
fn nominal_period_matches_the_planned_rate() {
    let (mut planner, mut engine) = setup();
    planner.buffer_line(50.0, 0.0, 0.0, 0.0, 3600.0, 0, 0);
    drain(&mut engine, MAX_TICKS);

    // cruise at 4800 steps/s on a 2 MHz timer: ~416 ticks per step event
    let board = engine.board_mut();
    let cruise = board
        .armed_periods
        .iter()
        .filter(|&&p| (410..=425).contains(&p))
        .count();
    assert!(cruise > 100, "cruise periods seen: {}", cruise);
}
