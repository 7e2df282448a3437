//! Step-rate to timer-period conversion.
//!
//! The step timer runs at 2 MHz, so a step rate maps to `2_000_000 / rate`
//! timer ticks. The division is served from two precomputed segments with
//! linear interpolation between samples: a coarse table for rates of 2048
//! steps/s and up, a fine one below. Rates beyond what a single tick can
//! service are folded down by the step-loop multiplier first, letting the
//! handler emit two or four steps per tick.

use log::warn;

/// Step timer frequency in ticks per second.
pub const STEPPER_TIMER_RATE: u32 = 2_000_000;

/// Hard floor for the armed period: ~20 kHz of interrupts.
pub(crate) const MINIMUM_PERIOD: u16 = 100;

/// Period armed while no block is queued (1 kHz poll).
pub(crate) const IDLE_PERIOD: u16 = 2000;

/// Period armed while a quick-stop countdown is draining.
pub(crate) const CLEANUP_PERIOD: u16 = 200;

/// Coarse segment: one sample every 256 steps/s.
const FAST_TABLE: [u16; 257] = build_table(8);
/// Fine segment: one sample every 8 steps/s.
const SLOW_TABLE: [u16; 257] = build_table(3);

const fn build_table(shift: u32) -> [u16; 257] {
    let mut table = [u16::MAX; 257];
    let mut i = 1usize;
    while i < 257 {
        let rate = (i as u32) << shift;
        let period = STEPPER_TIMER_RATE / rate;
        table[i] = if period > u16::MAX as u32 {
            u16::MAX
        } else {
            period as u16
        };
        i += 1;
    }
    table
}

/// Convert a step rate into a timer period and step-loop multiplier.
///
/// Rates above `double_step_frequency` emit two steps per tick, above twice
/// that four, so the armed period covers 2 or 4 step events.
pub(crate) fn calc_timer(
    step_rate: u32,
    max_step_frequency: u32,
    double_step_frequency: u32,
) -> (u16, u8) {
    let mut rate = step_rate.min(max_step_frequency);
    let step_loops = if rate > 2 * double_step_frequency {
        rate >>= 2;
        4
    } else if rate > double_step_frequency {
        rate >>= 1;
        2
    } else {
        1
    };
    let rate = rate.clamp(32, (256 << 8) - 1);

    let mut period = if rate >= (8 << 8) {
        let i = (rate >> 8) as usize;
        let base = FAST_TABLE[i] as u32;
        let next = FAST_TABLE[i + 1] as u32;
        (base - ((base - next) * (rate & 0xff)) / 256) as u16
    } else {
        let i = (rate >> 3) as usize;
        let base = SLOW_TABLE[i] as u32;
        let next = SLOW_TABLE[i + 1] as u32;
        (base.saturating_sub((base.saturating_sub(next) * (rate & 0x7)) / 8)) as u16
    };

    if period < MINIMUM_PERIOD {
        warn!("step rate {} steps/s above timer capability", step_rate);
        period = MINIMUM_PERIOD;
    }
    (period, step_loops)
}
