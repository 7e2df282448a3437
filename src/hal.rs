//! Board abstraction.
//!
//! The stepper engine owns the hardware: step, direction and enable lines,
//! endstop inputs, the beam driver and the step timer all sit behind the
//! [`Board`] trait. A ready-made [`GpioBoard`] adapter wires the trait to
//! embedded-hal 1.0 pins. None of the trait methods can fail; a timer tick
//! has no error channel, so adapters absorb pin errors.

use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Vec;

use crate::config::MAX_EXTRUDERS;

/// A physical stepper driver channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motor {
    /// Motor in slot 0 (X, or A on Core* mechanics).
    X,
    /// Motor in slot 1 (Y, or B on CoreXY/YX).
    Y,
    /// Motor in slot 2 (Z, or C on CoreXZ/ZX).
    Z,
    /// Second Z motor on dual-Z gantries.
    Z2,
    /// Extruder driver by index.
    E(u8),
}

/// A limit switch input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endstop {
    /// X minimum limit.
    XMin,
    /// X maximum limit.
    XMax,
    /// Y minimum limit.
    YMin,
    /// Y maximum limit.
    YMax,
    /// Z minimum limit.
    ZMin,
    /// Z maximum limit.
    ZMax,
    /// Second Z motor minimum limit (dual-Z).
    Z2Min,
    /// Second Z motor maximum limit (dual-Z).
    Z2Max,
    /// Z probe input.
    ZProbe,
}

/// Everything the stepper engine needs from the machine.
///
/// Implementations are exclusively driven from the consumer context; the
/// planner never touches hardware.
pub trait Board {
    /// Drive a step line high or low.
    fn set_step(&mut self, motor: Motor, high: bool);

    /// Latch a motor's travel direction.
    fn set_dir(&mut self, motor: Motor, negative: bool);

    /// Power a motor driver up or down.
    fn set_enable(&mut self, motor: Motor, enabled: bool);

    /// Sample a limit switch; true means the switch is at its active level.
    fn endstop_triggered(&mut self, endstop: Endstop) -> bool;

    /// Whether the switch is wired at all.
    fn has_endstop(&self, endstop: Endstop) -> bool {
        let _ = endstop;
        true
    }

    /// Current count of the step timer, in timer ticks.
    fn timer_count(&mut self) -> u16;

    /// Arm the step timer's compare register for the next tick.
    fn arm_timer(&mut self, period_ticks: u16);

    /// High-resolution clock in microseconds.
    fn micros(&mut self) -> u32;

    /// Fire the beam at the given intensity. No-op without a laser module.
    fn laser_fire(&mut self, intensity: u8) {
        let _ = intensity;
    }

    /// Extinguish the beam. No-op without a laser module.
    fn laser_off(&mut self) {}
}

/// Step timer driver used by [`GpioBoard`].
pub trait StepTimer {
    /// Current timer count in ticks.
    fn count(&mut self) -> u16;

    /// Arm the compare register.
    fn arm(&mut self, period_ticks: u16);

    /// High-resolution clock in microseconds.
    fn micros(&mut self) -> u32;
}

/// Step/dir/enable pin bundle for one motor.
#[derive(Debug)]
pub struct MotorIo<O: OutputPin> {
    /// Step pin, pulsed once per step.
    pub step: O,
    /// Direction pin.
    pub dir: O,
    /// Enable pin, if the driver has one.
    pub enable: Option<O>,
    /// Invert the direction pin logic.
    pub invert_dir: bool,
    /// Enable pin is active low (the common case for stepper drivers).
    pub enable_active_low: bool,
}

impl<O: OutputPin> MotorIo<O> {
    /// Bundle a step and direction pin with default polarity.
    pub fn new(step: O, dir: O) -> Self {
        Self {
            step,
            dir,
            enable: None,
            invert_dir: false,
            enable_active_low: true,
        }
    }
}

/// Endstop input with its wiring polarity.
#[derive(Debug)]
pub struct EndstopIo<I: InputPin> {
    /// The input pin.
    pub pin: I,
    /// Switch pulls the line low when pressed.
    pub active_low: bool,
}

/// Endstop inputs of a [`GpioBoard`]; absent entries never trigger.
#[derive(Debug)]
pub struct EndstopBank<I: InputPin> {
    /// X minimum switch.
    pub x_min: Option<EndstopIo<I>>,
    /// X maximum switch.
    pub x_max: Option<EndstopIo<I>>,
    /// Y minimum switch.
    pub y_min: Option<EndstopIo<I>>,
    /// Y maximum switch.
    pub y_max: Option<EndstopIo<I>>,
    /// Z minimum switch.
    pub z_min: Option<EndstopIo<I>>,
    /// Z maximum switch.
    pub z_max: Option<EndstopIo<I>>,
    /// Second Z minimum switch.
    pub z2_min: Option<EndstopIo<I>>,
    /// Second Z maximum switch.
    pub z2_max: Option<EndstopIo<I>>,
    /// Z probe input.
    pub z_probe: Option<EndstopIo<I>>,
}

impl<I: InputPin> Default for EndstopBank<I> {
    fn default() -> Self {
        Self {
            x_min: None,
            x_max: None,
            y_min: None,
            y_max: None,
            z_min: None,
            z_max: None,
            z2_min: None,
            z2_max: None,
            z_probe: None,
        }
    }
}

/// [`Board`] implementation over embedded-hal 1.0 pins.
#[derive(Debug)]
pub struct GpioBoard<O: OutputPin, I: InputPin, T: StepTimer> {
    /// Motor in slot 0.
    pub x: MotorIo<O>,
    /// Motor in slot 1.
    pub y: MotorIo<O>,
    /// Motor in slot 2.
    pub z: MotorIo<O>,
    /// Second Z motor, if fitted.
    pub z2: Option<MotorIo<O>>,
    /// One entry per extruder driver.
    pub extruders: Vec<MotorIo<O>, MAX_EXTRUDERS>,
    /// Limit switch inputs.
    pub endstops: EndstopBank<I>,
    /// Step timer driver.
    pub timer: T,
}

impl<O: OutputPin, I: InputPin, T: StepTimer> GpioBoard<O, I, T> {
    fn motor_io(&mut self, motor: Motor) -> Option<&mut MotorIo<O>> {
        match motor {
            Motor::X => Some(&mut self.x),
            Motor::Y => Some(&mut self.y),
            Motor::Z => Some(&mut self.z),
            Motor::Z2 => self.z2.as_mut(),
            Motor::E(i) => self.extruders.get_mut(i as usize),
        }
    }

    fn endstop_io(&mut self, endstop: Endstop) -> Option<&mut EndstopIo<I>> {
        let bank = &mut self.endstops;
        match endstop {
            Endstop::XMin => bank.x_min.as_mut(),
            Endstop::XMax => bank.x_max.as_mut(),
            Endstop::YMin => bank.y_min.as_mut(),
            Endstop::YMax => bank.y_max.as_mut(),
            Endstop::ZMin => bank.z_min.as_mut(),
            Endstop::ZMax => bank.z_max.as_mut(),
            Endstop::Z2Min => bank.z2_min.as_mut(),
            Endstop::Z2Max => bank.z2_max.as_mut(),
            Endstop::ZProbe => bank.z_probe.as_mut(),
        }
    }
}

impl<O: OutputPin, I: InputPin, T: StepTimer> Board for GpioBoard<O, I, T> {
    fn set_step(&mut self, motor: Motor, high: bool) {
        if let Some(io) = self.motor_io(motor) {
            let result = if high {
                io.step.set_high()
            } else {
                io.step.set_low()
            };
            result.ok();
        }
    }

    fn set_dir(&mut self, motor: Motor, negative: bool) {
        if let Some(io) = self.motor_io(motor) {
            let high = if io.invert_dir { negative } else { !negative };
            let result = if high {
                io.dir.set_high()
            } else {
                io.dir.set_low()
            };
            result.ok();
        }
    }

    fn set_enable(&mut self, motor: Motor, enabled: bool) {
        if let Some(io) = self.motor_io(motor) {
            let active_low = io.enable_active_low;
            if let Some(enable) = io.enable.as_mut() {
                let high = enabled != active_low;
                let result = if high {
                    enable.set_high()
                } else {
                    enable.set_low()
                };
                result.ok();
            }
        }
    }

    fn endstop_triggered(&mut self, endstop: Endstop) -> bool {
        match self.endstop_io(endstop) {
            Some(io) => {
                let high = io.pin.is_high().unwrap_or(false);
                high != io.active_low
            }
            None => false,
        }
    }

    fn has_endstop(&self, endstop: Endstop) -> bool {
        let bank = &self.endstops;
        match endstop {
            Endstop::XMin => bank.x_min.is_some(),
            Endstop::XMax => bank.x_max.is_some(),
            Endstop::YMin => bank.y_min.is_some(),
            Endstop::YMax => bank.y_max.is_some(),
            Endstop::ZMin => bank.z_min.is_some(),
            Endstop::ZMax => bank.z_max.is_some(),
            Endstop::Z2Min => bank.z2_min.is_some(),
            Endstop::Z2Max => bank.z2_max.is_some(),
            Endstop::ZProbe => bank.z_probe.is_some(),
        }
    }

    fn timer_count(&mut self) -> u16 {
        self.timer.count()
    }

    fn arm_timer(&mut self, period_ticks: u16) {
        self.timer.arm(period_ticks);
    }

    fn micros(&mut self) -> u32 {
        self.timer.micros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    struct NullTimer;

    impl StepTimer for NullTimer {
        fn count(&mut self) -> u16 {
            0
        }
        fn arm(&mut self, _period_ticks: u16) {}
        fn micros(&mut self) -> u32 {
            0
        }
    }

    fn quiet_motor() -> MotorIo<PinMock> {
        MotorIo::new(PinMock::new(&[]), PinMock::new(&[]))
    }

    #[test]
    fn test_step_pulse_reaches_the_pin() {
        let step = PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ]);
        let dir = PinMock::new(&[]);
        let mut board: GpioBoard<PinMock, PinMock, NullTimer> = GpioBoard {
            x: MotorIo::new(step, dir),
            y: quiet_motor(),
            z: quiet_motor(),
            z2: None,
            extruders: Vec::new(),
            endstops: EndstopBank::default(),
            timer: NullTimer,
        };

        board.set_step(Motor::X, true);
        board.set_step(Motor::X, false);

        board.x.step.done();
        board.x.dir.done();
        for io in [&mut board.y, &mut board.z] {
            io.step.done();
            io.dir.done();
        }
    }

    #[test]
    fn test_inverted_direction_pin() {
        let dir = PinMock::new(&[PinTransaction::set(PinState::High)]);
        let mut motor = MotorIo::new(PinMock::new(&[]), dir);
        motor.invert_dir = true;
        let mut board: GpioBoard<PinMock, PinMock, NullTimer> = GpioBoard {
            x: motor,
            y: quiet_motor(),
            z: quiet_motor(),
            z2: None,
            extruders: Vec::new(),
            endstops: EndstopBank::default(),
            timer: NullTimer,
        };

        board.set_dir(Motor::X, true);

        board.x.step.done();
        board.x.dir.done();
        for io in [&mut board.y, &mut board.z] {
            io.step.done();
            io.dir.done();
        }
    }

    #[test]
    fn test_active_low_endstop() {
        let pin = PinMock::new(&[PinTransaction::get(PinState::Low)]);
        let mut board: GpioBoard<PinMock, PinMock, NullTimer> = GpioBoard {
            x: quiet_motor(),
            y: quiet_motor(),
            z: quiet_motor(),
            z2: None,
            extruders: Vec::new(),
            endstops: EndstopBank {
                x_min: Some(EndstopIo {
                    pin,
                    active_low: true,
                }),
                ..Default::default()
            },
            timer: NullTimer,
        };

        assert!(board.has_endstop(Endstop::XMin));
        assert!(!board.has_endstop(Endstop::YMin));
        assert!(board.endstop_triggered(Endstop::XMin));
        assert!(!board.endstop_triggered(Endstop::YMin));

        if let Some(io) = board.endstops.x_min.as_mut() {
            io.pin.done();
        }
        for io in [&mut board.x, &mut board.y, &mut board.z] {
            io.step.done();
            io.dir.done();
        }
    }
}
