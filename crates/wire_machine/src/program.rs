//! The programs a session installs on an empty stack.
//!
//! Cells are pushed back to front: the last push runs first. Every session
//! that sets `STILL_BUSY` pushes `ClearBusyStatus` first so it runs last.
//!
//! Installing a program discards whatever was pending. Callers must check
//! the status first; a session started over another one silently abandons it.
use crate::bus::command::{SKIP_ROM, START_CONVERSION};
use crate::bus::OneWireBus;
use crate::{Machine, MachineError, Opcode, RomId, Status};

impl<B: OneWireBus, const STACK_SIZE: usize> Machine<B, STACK_SIZE> {
    fn begin_session(&mut self, status: Status) {
        self.stack.clear();
        self.status = status;
    }

    /// Reset the bus and check for presence.
    pub fn install_reset(&mut self) -> Result<(), MachineError> {
        self.begin_session(Status::STILL_BUSY);
        self.push_op(Opcode::ClearBusyStatus)?;
        self.push_op(Opcode::Reset)
    }

    /// Read the 9 byte scratchpad of one device.
    pub fn install_read_scratchpad(&mut self, device: RomId) -> Result<(), MachineError> {
        self.device_address = device;
        self.begin_session(Status::STILL_BUSY);
        self.push_op(Opcode::ClearBusyStatus)?;
        self.push_op(Opcode::ReadScratchPad)
    }

    /// Tell every device to convert, then wait until all of them let go of
    /// the bus.
    pub fn install_convert_all(&mut self) -> Result<(), MachineError> {
        self.begin_session(Status::DEVICES_BUSY);
        self.polls_remaining = self.config.conversion_poll_limit;
        self.push_op(Opcode::WaitForBusRelease)?;
        self.push_send_byte(START_CONVERSION)?;
        self.push_send_byte(SKIP_ROM)?;
        self.push_op(Opcode::Reset)
    }

    /// Pulse the bus `repeats` times with the calibrated delays, for checking
    /// the tick table with a scope.
    pub fn install_test_timings(&mut self, repeats: u16) -> Result<(), MachineError> {
        self.begin_session(Status::STILL_BUSY);
        self.push_op(Opcode::ClearBusyStatus)?;
        self.push_op(Opcode::BusRelease)?;
        let [high, low] = repeats.to_be_bytes();
        self.push_operand(high)?;
        self.push_operand(low)?;
        self.push_op(Opcode::TestTimings)
    }
}
