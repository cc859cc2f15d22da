#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod bus;
pub mod program;
pub mod search;
pub mod sim_bus;
pub mod stack;
pub mod timing;

use core::mem::transmute;
use core::ops::BitOr;
use thiserror_no_std::Error;
use variant_count::VariantCount;

use crate::bus::OneWireBus;
use crate::stack::OpStack;
use crate::timing::{
    Calibration, Delay, READ_LOW_US, READ_SAMPLE_US, RELEASE_SETTLE_US, WRITE_ONE_LOW_US,
};

/// This crate implements the interpreter that runs the 1-Wire protocol
/// without blocking.
///
/// Pending work lives on a small stack of byte cells. Each cell is either an
/// [`Opcode`] or an operand belonging to the opcode above it. A call to
/// [`Machine::run_slice`] pops and executes opcodes until one of them asks to
/// yield, and returns the number of timer ticks the caller must wait before
/// the next slice. Macro opcodes push the more primitive steps they stand for
/// (back to front, so they run front to back) and expand no further than the
/// next step needs, which keeps the stack depth constant no matter how many
/// bytes a message has.
pub type Cell = u8;

/// Holdoff returned by an idle machine, and the longest wait a slice can ask for.
pub const MAX_HOLDOFF: u8 = 255;

/// Deepest stack any built-in program reaches. A scratchpad read peaks while
/// its first reset expands.
pub const MAX_PROGRAM_DEPTH: usize = 17;

pub const DEFAULT_STACK_SIZE: usize = 20;

const _: () = assert!(DEFAULT_STACK_SIZE >= MAX_PROGRAM_DEPTH);

pub const ROM_ID_LEN: usize = 8;
pub const SCRATCHPAD_LEN: usize = 9;
/// Bits read back for a whole scratchpad.
pub const SCRATCHPAD_BITS: u8 = 72;

#[repr(u8)] // Must match Cell
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    /// Drive the bus low.
    BusLow,
    /// Operand: bit position 0..72 the next incoming bit is stored at.
    ReadRemainingBits,
    /// Operands: byte tail still to send, then bits still to send on top.
    SendRemainingBits,
    /// Operand: index of the next address byte to send.
    SendRemainingIdBytes,
    /// Poll until every device has released the bus after a conversion.
    WaitForBusRelease,
    /// Let the bus float up to the pull-up.
    BusRelease,
    /// Clears the busy flag. Every session schedules this to run last.
    ClearBusyStatus,
    /// Presence check inside a reset.
    BusSample,
    /// Operands: high byte, then low byte on top, of the remaining repeats.
    TestTimings,
    /// Reset, select, and read the whole scratchpad.
    ReadScratchPad,
    /// Send the select command and then the device address.
    StartIdSend,
    /// The three phase bus reset.
    Reset,
    /// Operand: ticks to hold off. Ends the slice.
    Yield,
}

impl From<Opcode> for Cell {
    fn from(op: Opcode) -> Cell {
        op as Cell
    }
}

impl TryFrom<Cell> for Opcode {
    type Error = MachineError;
    fn try_from(value: Cell) -> Result<Self, Self::Error> {
        if usize::from(value) >= Opcode::VARIANT_COUNT {
            return Err(MachineError::InvalidOp(value));
        }

        // SAFTY: Opcode is `repr(u8)` with implicit discriminants starting at
        // zero, and we just checked the value is below the variant count.
        let op = unsafe { transmute::<Cell, Self>(value) };
        Ok(op)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MachineError {
    #[error("attempted push would overflow the stack")]
    StackOverflow,
    #[error("opcode needs an operand the stack does not hold")]
    StackUnderflow,
    #[error("the value {0} is an invalid opcode")]
    InvalidOp(Cell),
}

/// Condition flags reported to the application. Zero means the last session
/// finished without trouble.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(u8);

impl Status {
    pub const IDLE: Status = Status(0x00);
    pub const STILL_BUSY: Status = Status(0x01);
    /// Nobody answered the presence check of a reset.
    pub const NO_DEVICE: Status = Status(0x02);
    /// Waiting for the sensors to finish their conversions.
    pub const DEVICES_BUSY: Status = Status(0x04);
    /// Reserved for scratchpad CRC checking, never set.
    pub const CHECKSUM_ERROR: Status = Status(0x08);
    /// An opcode failed: the stack overflowed, an operand was missing, or a
    /// cell did not hold a valid opcode.
    pub const STACK_FAULT: Status = Status(0x10);
    /// The conversion wait gave up after its configured number of polls.
    pub const CONVERSION_TIMEOUT: Status = Status(0x20);

    pub const fn from_bits(bits: u8) -> Self {
        Status(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Status) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Status) {
        self.0 &= !other.0;
    }
}

impl BitOr for Status {
    type Output = Status;
    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

/// A device's 64 bit ROM identifier. Byte 0 is the family code and is the
/// first byte on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RomId(pub [u8; ROM_ID_LEN]);

impl RomId {
    pub const fn new(bytes: [u8; ROM_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn family(&self) -> u8 {
        self.0[0]
    }

    pub const fn bytes(&self) -> &[u8; ROM_ID_LEN] {
        &self.0
    }

    pub fn byte(&self, index: u8) -> Option<u8> {
        self.0.get(usize::from(index)).copied()
    }

    /// Bit `index` in wire order, i.e. bit `index % 8` of byte `index / 8`.
    pub fn bit(&self, index: u8) -> bool {
        u64::from(*self)
            .checked_shr(u32::from(index))
            .is_some_and(|shifted| shifted & 1 == 1)
    }
}

impl From<u64> for RomId {
    fn from(value: u64) -> Self {
        RomId(value.to_le_bytes())
    }
}

impl From<RomId> for u64 {
    fn from(rom: RomId) -> Self {
        u64::from_le_bytes(rom.0)
    }
}

/// The 9 byte register block a sensor reports its reading in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Scratchpad(pub [u8; SCRATCHPAD_LEN]);

impl Scratchpad {
    pub const fn new(bytes: [u8; SCRATCHPAD_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &[u8; SCRATCHPAD_LEN] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    /// Bit `index` in wire order.
    pub fn bit(&self, index: u8) -> bool {
        self.get(usize::from(index / 8))
            .is_some_and(|byte| byte.wrapping_shr(u32::from(index % 8)) & 1 == 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MachineConfig {
    pub calibration: Calibration,
    /// How many times `WaitForBusRelease` may find the bus still held low
    /// before the machine gives up on the conversion. `None` waits forever.
    pub conversion_poll_limit: Option<u16>,
}

impl MachineConfig {
    pub const fn new() -> Self {
        Self {
            calibration: Calibration::new(),
            conversion_poll_limit: None,
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The interpreter and all the state it shares with the application: the
/// stack, the status register, the receive accumulator, the selected device
/// address, the scratchpad being filled, and the bus itself.
///
/// `run_slice` is meant to be called from a timer interrupt and everything
/// else from the main program, both with that interrupt masked. The
/// `dallas` crate wraps a machine in a critical-section mutex for that.
pub struct Machine<B, const STACK_SIZE: usize = DEFAULT_STACK_SIZE> {
    bus: B,
    config: MachineConfig,
    stack: OpStack<STACK_SIZE>,
    status: Status,
    receive_register: u8,
    device_address: RomId,
    scratchpad: Scratchpad,
    polls_remaining: Option<u16>,
    bus_lent: bool,
}

impl<B: OneWireBus, const STACK_SIZE: usize> Machine<B, STACK_SIZE> {
    pub const fn new(bus: B, config: MachineConfig) -> Self {
        Self {
            bus,
            config,
            stack: OpStack::new(),
            status: Status::IDLE,
            receive_register: 0,
            device_address: RomId::new([0; ROM_ID_LEN]),
            scratchpad: Scratchpad::new([0; SCRATCHPAD_LEN]),
            polls_remaining: None,
            bus_lent: false,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn scratchpad(&self) -> &Scratchpad {
        &self.scratchpad
    }

    pub fn device_address(&self) -> &RomId {
        &self.device_address
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn stack(&self) -> &OpStack<STACK_SIZE> {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut OpStack<STACK_SIZE> {
        &mut self.stack
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// True while a program is still pending.
    pub fn is_running(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Hands the bus to a blocking user such as the device search. Until
    /// [`Machine::return_bus`] every slice returns [`MAX_HOLDOFF`] without
    /// running anything, so a program installed meanwhile waits.
    pub fn lend_bus(&mut self) {
        self.bus_lent = true;
    }

    pub fn return_bus(&mut self) {
        self.bus_lent = false;
    }

    pub fn is_bus_lent(&self) -> bool {
        self.bus_lent
    }

    /// Abandons whatever program is pending.
    pub fn flush(&mut self) {
        self.stack.clear();
    }

    pub fn push_op(&mut self, op: Opcode) -> Result<(), MachineError> {
        self.stack.push(Cell::from(op))
    }

    pub fn push_operand(&mut self, operand: u8) -> Result<(), MachineError> {
        self.stack.push(operand)
    }

    /// Runs opcodes until one yields or the stack runs dry, and returns the
    /// number of ticks to wait before the next slice. An empty stack returns
    /// [`MAX_HOLDOFF`] so an idle machine is polled rarely.
    ///
    /// Must not be called concurrently with itself or with any other method
    /// on this machine.
    pub fn run_slice(&mut self) -> u8 {
        if self.bus_lent {
            return MAX_HOLDOFF;
        }
        loop {
            let Some(cell) = self.stack.pop() else {
                return MAX_HOLDOFF;
            };

            match self.step(cell) {
                Ok(Some(holdoff)) => return holdoff,
                Ok(None) => {}
                Err(err) => {
                    // Carry on with whatever is left on the stack; the flag
                    // tells the application the program is incomplete.
                    self.status.insert(Status::STACK_FAULT);
                    warn!("opcode {=u8} failed: {}", cell, err);
                }
            }
        }
    }

    fn step(&mut self, cell: Cell) -> Result<Option<u8>, MachineError> {
        let op = Opcode::try_from(cell)?;
        trace!("exec {}", op);
        match op {
            Opcode::Yield => return self.pop_operand().map(Some),
            Opcode::BusLow => self.bus.drive_low(),
            Opcode::BusRelease => {
                self.bus.release();
                self.bus.delay_us(RELEASE_SETTLE_US);
            }
            Opcode::BusSample => self.sample_presence(),
            Opcode::SendRemainingBits => self.send_remaining_bits()?,
            Opcode::SendRemainingIdBytes => self.send_remaining_id_bytes()?,
            Opcode::StartIdSend => self.start_id_send()?,
            Opcode::ReadRemainingBits => self.read_remaining_bits()?,
            Opcode::ReadScratchPad => self.expand_read_scratchpad()?,
            Opcode::Reset => self.expand_reset()?,
            Opcode::WaitForBusRelease => self.wait_for_bus_release()?,
            Opcode::ClearBusyStatus => self.status.remove(Status::STILL_BUSY),
            Opcode::TestTimings => self.test_timings()?,
        }
        Ok(None)
    }

    fn pop_operand(&mut self) -> Result<u8, MachineError> {
        self.stack.pop().ok_or(MachineError::StackUnderflow)
    }

    fn yield_ticks(&mut self, ticks: u8) -> Result<(), MachineError> {
        self.push_operand(ticks)?;
        self.push_op(Opcode::Yield)
    }

    fn yield_for(&mut self, delay: Delay) -> Result<(), MachineError> {
        let ticks = self.config.calibration.ticks(delay);
        self.yield_ticks(ticks)
    }

    fn push_send_byte(&mut self, byte: u8) -> Result<(), MachineError> {
        self.push_operand(byte)?;
        self.push_operand(8)?;
        self.push_op(Opcode::SendRemainingBits)
    }

    fn sample_presence(&mut self) {
        self.bus.release();
        if self.bus.sample() {
            // Nothing pulled the line low. The rest of the program still runs;
            // the application decides what to do with the flag.
            self.status.insert(Status::NO_DEVICE);
            warn!("no presence pulse after reset");
        }
    }

    fn send_remaining_bits(&mut self) -> Result<(), MachineError> {
        let bits_to_go = self.pop_operand()?;
        let byte_tail = self.pop_operand()?;

        let bits_left = bits_to_go.saturating_sub(1);
        if bits_left > 0 {
            // The rest of the byte resumes once this bit's timing is done.
            self.push_operand(byte_tail.wrapping_shr(1))?;
            self.push_operand(bits_left)?;
            self.push_op(Opcode::SendRemainingBits)?;
        }

        self.bus.drive_low();
        if byte_tail & 0x01 == 0x01 {
            self.bus.delay_us(WRITE_ONE_LOW_US);
            self.bus.release();
            self.yield_for(Delay::Micros64)
        } else {
            self.push_op(Opcode::BusRelease)?;
            self.yield_for(Delay::Micros60)
        }
    }

    fn start_id_send(&mut self) -> Result<(), MachineError> {
        self.push_operand(0)?;
        self.push_op(Opcode::SendRemainingIdBytes)?;
        self.push_send_byte(bus::command::SELECT_DEVICE)
    }

    fn send_remaining_id_bytes(&mut self) -> Result<(), MachineError> {
        let index = self.pop_operand()?;
        let Some(byte) = self.device_address.byte(index) else {
            return Ok(());
        };
        self.push_operand(index.wrapping_add(1))?;
        self.push_op(Opcode::SendRemainingIdBytes)?;
        self.push_send_byte(byte)
    }

    fn read_remaining_bits(&mut self) -> Result<(), MachineError> {
        let bit_position = self.pop_operand()?;

        self.bus.drive_low();
        self.bus.delay_us(READ_LOW_US);
        self.bus.release();
        self.bus.delay_us(READ_SAMPLE_US);
        if self.bus.sample() {
            self.receive_register |= 1u8.wrapping_shl(u32::from(bit_position % 8));
        }

        let next_position = bit_position.wrapping_add(1);
        if next_position % 8 == 0 {
            let index = usize::from(next_position / 8).checked_sub(1);
            if let Some(slot) = index.and_then(|index| self.scratchpad.0.get_mut(index)) {
                *slot = self.receive_register;
            }
            self.receive_register = 0;
        }
        if next_position < SCRATCHPAD_BITS {
            self.push_operand(next_position)?;
            self.push_op(Opcode::ReadRemainingBits)?;
        }
        self.yield_for(Delay::Micros55)
    }

    fn expand_read_scratchpad(&mut self) -> Result<(), MachineError> {
        self.push_op(Opcode::Reset)?;

        self.receive_register = 0;
        self.push_operand(0)?;
        self.push_op(Opcode::ReadRemainingBits)?;
        self.push_send_byte(bus::command::READ_SCRATCHPAD)?;
        self.push_op(Opcode::StartIdSend)?;
        self.push_op(Opcode::Reset)
    }

    fn expand_reset(&mut self) -> Result<(), MachineError> {
        // Drive low 480 µs, release and wait 70 µs, sample for presence, then
        // wait 410 µs. Each wait is its own slice boundary.
        self.yield_for(Delay::Micros410)?;
        self.push_op(Opcode::BusSample)?;
        self.yield_for(Delay::Micros70)?;
        self.push_op(Opcode::BusRelease)?;
        self.yield_for(Delay::Micros480)?;
        self.push_op(Opcode::BusLow)
    }

    fn wait_for_bus_release(&mut self) -> Result<(), MachineError> {
        self.bus.release();
        if self.bus.sample() {
            self.status.remove(Status::DEVICES_BUSY);
            debug!("conversions complete");
            return Ok(());
        }

        // Some device is still converting and holding the line low.
        if let Some(remaining) = self.polls_remaining {
            let Some(remaining) = remaining.checked_sub(1) else {
                self.status.remove(Status::DEVICES_BUSY);
                self.status.insert(Status::CONVERSION_TIMEOUT);
                warn!("gave up waiting for conversions");
                return Ok(());
            };
            self.polls_remaining = Some(remaining);
        }
        self.push_op(Opcode::WaitForBusRelease)?;
        self.yield_ticks(MAX_HOLDOFF)
    }

    fn test_timings(&mut self) -> Result<(), MachineError> {
        self.bus.release();
        self.bus.delay_us(RELEASE_SETTLE_US);

        let low = self.pop_operand()?;
        let high = self.pop_operand()?;
        let mut to_go = u16::from_be_bytes([high, low]);

        if to_go > 1 {
            to_go = to_go.wrapping_sub(1);
            let [high, low] = to_go.to_be_bytes();
            self.push_operand(high)?;
            self.push_operand(low)?;
            self.push_op(Opcode::TestTimings)?;
        }

        self.bus.drive_low();

        // A repeating pattern of pulse lengths to look at on a scope. The
        // trigger marks the 55 µs pulse that comes right before the 64 µs one.
        let delay = match to_go % 5 {
            0 => Delay::Micros480,
            1 => Delay::Micros70,
            2 => Delay::Micros64,
            3 => {
                self.bus.debug_toggle();
                Delay::Micros55
            }
            _ => Delay::Micros55,
        };
        self.yield_for(delay)
    }
}
