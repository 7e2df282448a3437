//! Trapezoid profile solver.
//!
//! The speed-vs-step profile of a block is a symmetric trapezoid: accelerate
//! from `initial_rate`, cruise at `nominal_rate`, decelerate to `final_rate`,
//! all under the block's one constant acceleration. The ramp lengths follow
//! from the uniform-acceleration identities:
//!
//! distance to reach rate `m` from rate `s`: `d = (m² - s²) / (2a)`
//!
//! and when the two ramps overlap (no cruise possible), the crossover point:
//!
//! `di = (2ad - s1² + s2²) / (4a)`

use libm::{ceilf, floorf};

use super::block::Block;

/// Rates below this overflow the step timer; trapezoid corners are floored
/// here.
pub(crate) const MINIMUM_STEP_RATE: u32 = 120;

/// Distance (in steps) needed to change from `initial_rate` to `target_rate`
/// at `acceleration` steps/s².
#[inline]
pub(crate) fn estimate_acceleration_distance(
    initial_rate: f32,
    target_rate: f32,
    acceleration: f32,
) -> f32 {
    if acceleration == 0.0 {
        return 0.0;
    }
    (target_rate * target_rate - initial_rate * initial_rate) / (2.0 * acceleration)
}

/// Step index at which to start braking so a block that never cruises ends
/// exactly at `final_rate`.
#[inline]
pub(crate) fn intersection_distance(
    initial_rate: f32,
    final_rate: f32,
    acceleration: f32,
    distance: f32,
) -> f32 {
    if acceleration == 0.0 {
        return 0.0;
    }
    (2.0 * acceleration * distance - initial_rate * initial_rate + final_rate * final_rate)
        / (4.0 * acceleration)
}

/// Maximum speed reachable at the start of a segment of `distance` mm that
/// must end at `target_velocity` under `acceleration` (pass a negative
/// acceleration for the deceleration case).
#[inline]
pub(crate) fn max_allowable_speed(acceleration: f32, target_velocity: f32, distance: f32) -> f32 {
    libm::sqrtf(target_velocity * target_velocity - 2.0 * acceleration * distance)
}

/// Solve the trapezoid corners for the given entry and exit factors.
///
/// Refuses to touch a block the stepper has latched; the caller re-runs the
/// lookahead on the next append, so a skipped busy block keeps its previous
/// (still reachable) profile.
pub(crate) fn calculate_trapezoid(block: &mut Block, entry_factor: f32, exit_factor: f32) {
    if block.busy {
        return;
    }

    let initial_rate = (ceilf(block.nominal_rate as f32 * entry_factor) as u32)
        .max(MINIMUM_STEP_RATE);
    let final_rate = (ceilf(block.nominal_rate as f32 * exit_factor) as u32)
        .max(MINIMUM_STEP_RATE);

    let acceleration = block.acceleration_st as f32;
    let mut accelerate_steps = ceilf(estimate_acceleration_distance(
        initial_rate as f32,
        block.nominal_rate as f32,
        acceleration,
    )) as i64;
    let decelerate_steps = floorf(estimate_acceleration_distance(
        block.nominal_rate as f32,
        final_rate as f32,
        -acceleration,
    )) as i64;

    let mut plateau_steps = block.step_event_count as i64 - accelerate_steps - decelerate_steps;

    // No cruise possible: ramp up to the crossover point, then brake.
    if plateau_steps < 0 {
        accelerate_steps = ceilf(intersection_distance(
            initial_rate as f32,
            final_rate as f32,
            acceleration,
            block.step_event_count as f32,
        )) as i64;
        accelerate_steps = accelerate_steps.clamp(0, block.step_event_count as i64);
        plateau_steps = 0;
    }

    block.accelerate_until = accelerate_steps as u32;
    block.decelerate_after = (accelerate_steps + plateau_steps) as u32;
    block.initial_rate = initial_rate;
    block.final_rate = final_rate;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(step_event_count: u32, nominal_rate: u32, acceleration_st: u32) -> Block {
        Block {
            step_event_count,
            nominal_rate,
            nominal_speed: 60.0,
            acceleration_st,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_trapezoid_has_plateau() {
        let mut block = block_with(800, 4800, 80_000);
        calculate_trapezoid(&mut block, 10.0 / 60.0, 10.0 / 60.0);

        assert_eq!(block.initial_rate, 800);
        assert_eq!(block.final_rate, 800);
        // (4800^2 - 800^2) / (2 * 80000) = 140
        assert_eq!(block.accelerate_until, 140);
        assert_eq!(block.decelerate_after, 800 - 140);
    }

    #[test]
    fn test_short_block_degenerates_to_triangle() {
        let mut block = block_with(50, 4800, 80_000);
        calculate_trapezoid(&mut block, 0.05, 0.05);

        assert_eq!(block.accelerate_until, block.decelerate_after);
        assert!(block.accelerate_until <= block.step_event_count);
    }

    #[test]
    fn test_rates_floored_for_timer() {
        let mut block = block_with(800, 4800, 80_000);
        calculate_trapezoid(&mut block, 0.0001, 0.0001);

        assert_eq!(block.initial_rate, MINIMUM_STEP_RATE);
        assert_eq!(block.final_rate, MINIMUM_STEP_RATE);
    }

    #[test]
    fn test_busy_block_left_untouched() {
        let mut block = block_with(800, 4800, 80_000);
        block.busy = true;
        calculate_trapezoid(&mut block, 0.5, 0.5);

        assert_eq!(block.initial_rate, 0);
        assert_eq!(block.accelerate_until, 0);
    }

    #[test]
    fn test_milestones_partition_the_block() {
        for &(count, rate) in &[(800u32, 4800u32), (10, 4800), (5000, 40_000), (3, 200)] {
            let mut block = block_with(count, rate, 80_000);
            calculate_trapezoid(&mut block, 0.3, 0.2);
            assert!(block.accelerate_until <= block.decelerate_after);
            assert!(block.decelerate_after <= block.step_event_count);
        }
    }
}
