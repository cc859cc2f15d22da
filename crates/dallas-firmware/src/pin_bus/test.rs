use super::*;
use core::convert::Infallible;
use embedded_hal::digital::{ErrorKind, ErrorType};
use wire_machine::bus::{self, command::SEARCH_ROM};
use wire_machine::{Machine, MachineConfig, Status};

extern crate std;
use std::vec::Vec as StdVec;

/// Open-drain pin whose line a test can also hold low.
#[derive(Default)]
struct FakePin {
    driven_low: bool,
    held_low: bool,
    levels: StdVec<bool>,
}

impl ErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.driven_low = true;
        self.levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.driven_low = false;
        self.levels.push(true);
        Ok(())
    }
}

impl InputPin for FakePin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!(self.driven_low || self.held_low))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

struct BrokenPin;

impl ErrorType for BrokenPin {
    type Error = ErrorKind;
}

impl OutputPin for BrokenPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Err(ErrorKind::Other)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Err(ErrorKind::Other)
    }
}

impl InputPin for BrokenPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Err(ErrorKind::Other)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Err(ErrorKind::Other)
    }
}

#[derive(Default)]
struct FakeDelay {
    micros: u32,
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.micros += ns / 1_000;
    }

    fn delay_us(&mut self, us: u32) {
        self.micros += us;
    }
}

#[test]
fn test_new_releases_the_line() {
    let bus = PinBus::new(FakePin::default(), FakeDelay::default());
    let (pin, _) = bus.release_pin();
    assert_eq!(pin.levels, [true]);
}

#[test]
fn test_sample_reads_the_wired_and() {
    let mut bus = PinBus::new(FakePin::default(), FakeDelay::default());
    assert!(bus.sample());

    bus.drive_low();
    assert!(!bus.sample());
    bus.release();
    assert!(bus.sample());

    bus.pin.held_low = true;
    assert!(!bus.sample());
}

#[test]
fn test_byte_write_slot_timing() {
    let mut bus = PinBus::new(FakePin::default(), FakeDelay::default());
    bus::write_byte(&mut bus, SEARCH_ROM);

    // Four 0 slots then four 1 slots, 70 µs each.
    assert_eq!(bus.delay.micros, 8 * 70);
    let levels = &bus.pin.levels[1..];
    assert_eq!(levels.len(), 16);
    assert!(levels.chunks(2).all(|slot| slot == [false, true]));
}

#[test]
fn test_unreadable_pin_reads_high() {
    let mut bus = PinBus::new(BrokenPin, FakeDelay::default());
    bus.drive_low();
    assert!(bus.sample());
    assert!(!bus::reset_pulse(&mut bus));
}

#[test]
fn test_reset_session_without_devices() {
    let bus = PinBus::new(FakePin::default(), FakeDelay::default());
    let mut machine: Machine<_> = Machine::new(bus, MachineConfig::default());
    machine.install_reset().unwrap();
    while machine.is_running() {
        let _ = machine.run_slice();
    }
    assert_eq!(machine.status(), Status::NO_DEVICE);
}

#[test]
fn test_reset_session_with_device_holding_presence() {
    let mut pin = FakePin::default();
    pin.held_low = true;
    let bus = PinBus::new(pin, FakeDelay::default());
    let mut machine: Machine<_> = Machine::new(bus, MachineConfig::default());
    machine.install_reset().unwrap();
    while machine.is_running() {
        let _ = machine.run_slice();
    }
    assert_eq!(machine.status(), Status::IDLE);
}
