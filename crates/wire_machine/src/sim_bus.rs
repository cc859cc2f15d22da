//! An in-memory 1-Wire bus with simulated sensors, for tests and host tools.
//!
//! The simulator keeps a microsecond clock. The master's waits advance it:
//! `delay_us` for inline pauses, and [`SimBus::elapse_ticks`] for the holdoff
//! a slice returns. Slot types are told apart the way a real device does,
//! by how long the master held the line low.
use heapless::Vec;

use crate::bus::command::{READ_SCRATCHPAD, SEARCH_ROM, SELECT_DEVICE, SKIP_ROM, START_CONVERSION};
use crate::bus::OneWireBus;
use crate::timing::Calibration;
use crate::{RomId, Scratchpad, SCRATCHPAD_BITS};

/// A low pulse at least this long resets every device.
pub const RESET_MIN_US: u32 = 240;
/// A low pulse at least this long is written as a 0.
pub const WRITE_ZERO_MIN_US: u32 = 15;
pub const PRESENCE_DELAY_US: u32 = 15;
pub const PRESENCE_US: u32 = 120;
/// How long a device holds the line low to answer a 0.
pub const REPLY_HOLD_US: u32 = 30;
pub const DEFAULT_CONVERSION_US: u32 = 750_000;

const ROM_BITS: u8 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Window {
    start: u32,
    end: u32,
}

impl Window {
    fn after(start: u32, delay: u32, length: u32) -> Self {
        let start = start.saturating_add(delay);
        Self {
            start,
            end: start.saturating_add(length),
        }
    }

    fn contains(&self, now: u32) -> bool {
        self.start <= now && now < self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SearchStep {
    Bit,
    Complement,
    Direction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeviceState {
    /// Nothing has reset the bus yet.
    Asleep,
    RomCommand { byte: u8, count: u8 },
    MatchRom { index: u8, matching: bool },
    Search { index: u8, step: SearchStep },
    FunctionCommand { byte: u8, count: u8 },
    ReadScratchpad { index: u8 },
    /// Ignoring the bus until the next reset.
    Deselected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotRole {
    Idle,
    Listen,
    Talk,
}

#[derive(Clone, Debug)]
pub struct SimDevice {
    rom: RomId,
    scratchpad: Scratchpad,
    conversion_us: u32,
    state: DeviceState,
    slot: SlotRole,
    reply: Option<Window>,
    busy_until: u32,
    conversions: u16,
}

impl SimDevice {
    pub fn new(rom: RomId) -> Self {
        Self {
            rom,
            scratchpad: Scratchpad::default(),
            conversion_us: DEFAULT_CONVERSION_US,
            state: DeviceState::Asleep,
            slot: SlotRole::Idle,
            reply: None,
            busy_until: 0,
            conversions: 0,
        }
    }

    pub fn with_scratchpad(mut self, scratchpad: Scratchpad) -> Self {
        self.scratchpad = scratchpad;
        self
    }

    /// How long the device holds the bus low after `START_CONVERSION`.
    pub fn with_conversion_time(mut self, micros: u32) -> Self {
        self.conversion_us = micros;
        self
    }

    pub fn rom(&self) -> RomId {
        self.rom
    }

    pub fn conversions(&self) -> u16 {
        self.conversions
    }

    fn reset(&mut self) {
        self.state = DeviceState::RomCommand { byte: 0, count: 0 };
        self.slot = SlotRole::Idle;
        self.reply = None;
    }

    fn holds_low(&self, now: u32) -> bool {
        now < self.busy_until || self.reply.is_some_and(|window| window.contains(now))
    }

    fn slot_started(&mut self, now: u32) {
        let reply = match self.state {
            DeviceState::Search { index, step: SearchStep::Bit } => {
                self.state = DeviceState::Search { index, step: SearchStep::Complement };
                Some(self.rom.bit(index))
            }
            DeviceState::Search { index, step: SearchStep::Complement } => {
                self.state = DeviceState::Search { index, step: SearchStep::Direction };
                Some(!self.rom.bit(index))
            }
            DeviceState::ReadScratchpad { index } => {
                let next = index.saturating_add(1);
                self.state = if next < SCRATCHPAD_BITS {
                    DeviceState::ReadScratchpad { index: next }
                } else {
                    DeviceState::Deselected
                };
                Some(self.scratchpad.bit(index))
            }
            DeviceState::Asleep | DeviceState::Deselected => {
                self.slot = SlotRole::Idle;
                return;
            }
            _ => None,
        };

        match reply {
            Some(bit) => {
                self.slot = SlotRole::Talk;
                self.reply = (!bit).then(|| Window::after(now, 0, REPLY_HOLD_US));
            }
            None => self.slot = SlotRole::Listen,
        }
    }

    fn slot_finished(&mut self, bit: bool, now: u32) {
        if self.slot == SlotRole::Listen {
            self.receive(bit, now);
        }
        self.slot = SlotRole::Idle;
    }

    fn receive(&mut self, bit: bool, now: u32) {
        self.state = match self.state {
            DeviceState::RomCommand { byte, count } => {
                let byte = shift_in(byte, count, bit);
                match count.saturating_add(1) {
                    8 => match byte {
                        SELECT_DEVICE => DeviceState::MatchRom { index: 0, matching: true },
                        SKIP_ROM => DeviceState::FunctionCommand { byte: 0, count: 0 },
                        SEARCH_ROM => DeviceState::Search { index: 0, step: SearchStep::Bit },
                        _ => DeviceState::Deselected,
                    },
                    count => DeviceState::RomCommand { byte, count },
                }
            }
            DeviceState::MatchRom { index, matching } => {
                let matching = matching && self.rom.bit(index) == bit;
                match index.saturating_add(1) {
                    ROM_BITS if matching => DeviceState::FunctionCommand { byte: 0, count: 0 },
                    ROM_BITS => DeviceState::Deselected,
                    index => DeviceState::MatchRom { index, matching },
                }
            }
            DeviceState::Search { index, step: SearchStep::Direction } => {
                if self.rom.bit(index) != bit {
                    DeviceState::Deselected
                } else {
                    match index.saturating_add(1) {
                        ROM_BITS => DeviceState::FunctionCommand { byte: 0, count: 0 },
                        index => DeviceState::Search { index, step: SearchStep::Bit },
                    }
                }
            }
            DeviceState::FunctionCommand { byte, count } => {
                let byte = shift_in(byte, count, bit);
                match count.saturating_add(1) {
                    8 => match byte {
                        READ_SCRATCHPAD => DeviceState::ReadScratchpad { index: 0 },
                        START_CONVERSION => {
                            self.busy_until = now.saturating_add(self.conversion_us);
                            self.conversions = self.conversions.saturating_add(1);
                            DeviceState::Deselected
                        }
                        _ => DeviceState::Deselected,
                    },
                    count => DeviceState::FunctionCommand { byte, count },
                }
            }
            state => state,
        };
    }
}

fn shift_in(byte: u8, count: u8, bit: bool) -> u8 {
    if bit {
        byte | 1u8.wrapping_shl(u32::from(count))
    } else {
        byte
    }
}

/// The simulated line. `DEVICE_MAX` bounds how many devices can be attached.
#[derive(Clone, Debug)]
pub struct SimBus<const DEVICE_MAX: usize> {
    now: u32,
    tick_micros: u32,
    low_since: Option<u32>,
    presence: Option<Window>,
    devices: Vec<SimDevice, DEVICE_MAX>,
    resets: u16,
}

impl<const DEVICE_MAX: usize> SimBus<DEVICE_MAX> {
    pub const fn new() -> Self {
        Self {
            now: 0,
            tick_micros: Calibration::new().tick_micros,
            low_since: None,
            presence: None,
            devices: Vec::new(),
            resets: 0,
        }
    }

    /// Attaches a device. Hands it back if the bus is full.
    pub fn attach(&mut self, device: SimDevice) -> Result<(), SimDevice> {
        self.devices.push(device)
    }

    pub fn with_device(mut self, device: SimDevice) -> Result<Self, SimDevice> {
        self.attach(device)?;
        Ok(self)
    }

    pub fn set_tick_micros(&mut self, tick_micros: u32) {
        self.tick_micros = tick_micros;
    }

    pub fn now(&self) -> u32 {
        self.now
    }

    pub fn elapse_micros(&mut self, micros: u32) {
        self.now = self.now.saturating_add(micros);
    }

    /// Lets a slice's holdoff pass.
    pub fn elapse_ticks(&mut self, ticks: u8) {
        self.elapse_micros(u32::from(ticks).saturating_mul(self.tick_micros));
    }

    pub fn devices(&self) -> &[SimDevice] {
        self.devices.as_slice()
    }

    /// Number of reset pulses seen.
    pub fn resets(&self) -> u16 {
        self.resets
    }

    pub fn is_driven_low(&self) -> bool {
        self.low_since.is_some()
    }
}

impl<const DEVICE_MAX: usize> Default for SimBus<DEVICE_MAX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DEVICE_MAX: usize> OneWireBus for SimBus<DEVICE_MAX> {
    fn drive_low(&mut self) {
        if self.low_since.is_some() {
            return;
        }
        let now = self.now;
        self.low_since = Some(now);
        for device in self.devices.iter_mut() {
            device.slot_started(now);
        }
    }

    fn release(&mut self) {
        let Some(since) = self.low_since.take() else {
            return;
        };
        let now = self.now;
        let held = now.saturating_sub(since);

        if held >= RESET_MIN_US {
            self.resets = self.resets.saturating_add(1);
            for device in self.devices.iter_mut() {
                device.reset();
            }
            self.presence = (!self.devices.is_empty())
                .then(|| Window::after(now, PRESENCE_DELAY_US, PRESENCE_US));
            return;
        }

        let bit = held < WRITE_ZERO_MIN_US;
        for device in self.devices.iter_mut() {
            device.slot_finished(bit, now);
        }
    }

    fn sample(&mut self) -> bool {
        let now = self.now;
        if self.low_since.is_some() {
            return false;
        }
        if self.presence.is_some_and(|window| window.contains(now)) {
            return false;
        }
        !self.devices.iter().any(|device| device.holds_low(now))
    }

    fn delay_us(&mut self, micros: u32) {
        self.elapse_micros(micros);
    }
}
