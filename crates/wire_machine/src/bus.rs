//! The three electrical moves a 1-Wire master can make, plus the blocking
//! bit and byte helpers the device search uses.
//!
//! Ignoring parasitic power, a master can only pull the line low, let the
//! pull-up float it high again, or look at it. Everything else on the bus is
//! timing built from those moves.
use crate::timing::{
    PRESENCE_SAMPLE_US, READ_LOW_US, READ_SAMPLE_US, READ_SETTLE_US, RESET_LOW_US, RESET_TAIL_US,
    WRITE_ONE_LOW_US, WRITE_ONE_RELEASE_US, WRITE_ZERO_LOW_US, WRITE_ZERO_RELEASE_US,
};

/// Commands from the bus's published command set. All are sent least
/// significant bit first.
pub mod command {
    /// Take a temperature reading and leave it in the scratchpad.
    pub const START_CONVERSION: u8 = 0x44;
    pub const COPY_SCRATCHPAD: u8 = 0x48;
    pub const READ_SCRATCHPAD: u8 = 0xBE;
    pub const WRITE_SCRATCHPAD: u8 = 0x4E;
    pub const RECALL_SCRATCHPAD: u8 = 0xB8;
    /// Ask whether a device needs parasite power.
    pub const READ_POWER_SUPPLY: u8 = 0xB4;
    /// Search restricted to devices with an alarm condition.
    pub const ALARM_SEARCH: u8 = 0xEC;
    /// A specific 8 byte device address follows.
    pub const SELECT_DEVICE: u8 = 0x55;
    /// Skip addressing, every device executes the next command.
    pub const SKIP_ROM: u8 = 0xCC;
    /// Starts the next pass of device discovery.
    pub const SEARCH_ROM: u8 = 0xF0;
}

/// A single open-drain line with a short inline delay.
///
/// Implementations must keep `drive_low`, `release`, and `sample` well under a
/// microsecond. `delay_us` is only asked for pauses under ~10 µs by the
/// interpreter; the blocking search also uses it for the long protocol waits.
pub trait OneWireBus {
    /// Drive the line low.
    fn drive_low(&mut self);
    /// Stop driving, letting the pull-up take the line high.
    fn release(&mut self);
    /// Read the line. `true` means high.
    fn sample(&mut self) -> bool;
    /// Busy-wait for `micros` microseconds.
    fn delay_us(&mut self, micros: u32);
    /// Flip a spare line for triggering a scope. Does nothing by default.
    fn debug_toggle(&mut self) {}
}

impl<T: OneWireBus + ?Sized> OneWireBus for &mut T {
    fn drive_low(&mut self) {
        (**self).drive_low();
    }

    fn release(&mut self) {
        (**self).release();
    }

    fn sample(&mut self) -> bool {
        (**self).sample()
    }

    fn delay_us(&mut self, micros: u32) {
        (**self).delay_us(micros);
    }

    fn debug_toggle(&mut self) {
        (**self).debug_toggle();
    }
}

/// Blocking bus reset. Returns `true` when at least one device answered
/// with a presence pulse.
pub fn reset_pulse<B: OneWireBus + ?Sized>(bus: &mut B) -> bool {
    bus.drive_low();
    bus.delay_us(RESET_LOW_US);
    let line = critical_section::with(|_| {
        bus.release();
        bus.delay_us(PRESENCE_SAMPLE_US);
        bus.sample()
    });
    bus.delay_us(RESET_TAIL_US);
    !line
}

/// Blocking read slot.
pub fn read_bit<B: OneWireBus + ?Sized>(bus: &mut B) -> bool {
    let bit = critical_section::with(|_| {
        bus.drive_low();
        bus.delay_us(READ_LOW_US);
        bus.release();
        bus.delay_us(READ_SAMPLE_US);
        bus.sample()
    });
    bus.delay_us(READ_SETTLE_US);
    bit
}

/// Blocking write slot.
pub fn write_bit<B: OneWireBus + ?Sized>(bus: &mut B, bit: bool) {
    if bit {
        critical_section::with(|_| {
            bus.drive_low();
            bus.delay_us(WRITE_ONE_LOW_US);
            bus.release();
        });
        bus.delay_us(WRITE_ONE_RELEASE_US);
    } else {
        bus.drive_low();
        bus.delay_us(WRITE_ZERO_LOW_US);
        bus.release();
        bus.delay_us(WRITE_ZERO_RELEASE_US);
    }
}

/// Blocking byte write, least significant bit first.
pub fn write_byte<B: OneWireBus + ?Sized>(bus: &mut B, byte: u8) {
    let mut tail = byte;
    for _ in 0..8 {
        write_bit(bus, tail & 0x01 == 0x01);
        tail = tail.wrapping_shr(1);
    }
}
