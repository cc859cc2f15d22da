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

pub mod conversion;
pub mod scheduler;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;
use heapless::Vec;
use thiserror_no_std::Error;
use wire_machine::bus::OneWireBus;
use wire_machine::search::{DeviceSearch, SearchError};
use wire_machine::stack::StackReport;
use wire_machine::{
    Machine, MachineConfig, MachineError, RomId, Scratchpad, Status, DEFAULT_STACK_SIZE,
};

use crate::conversion::{raw_temperature, Temperature};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryError {
    #[error("a session or another search is using the bus (status {0:?})")]
    SessionPending(Status),
    #[error("search failed: {0}")]
    Search(#[from] SearchError),
}

/// Owns the interpreter and the bus on behalf of both the application and
/// the timer interrupt.
///
/// Every method locks the machine for as long as it needs it, so a reader
/// can live in a `static` and be shared with the interrupt handler:
///
/// ```ignore
/// static READER: Reader<BoardBus> = Reader::new(BoardBus::new(), MachineConfig::new());
/// ```
///
/// The
/// session methods only set up the stack and return; the work happens as
/// the scheduler pumps slices. Starting a session while another one is
/// still running abandons the first one, so check [`Reader::status`] first.
pub struct Reader<B, const STACK_SIZE: usize = DEFAULT_STACK_SIZE> {
    machine: Mutex<CriticalSectionRawMutex, RefCell<Machine<B, STACK_SIZE>>>,
}

impl<B: OneWireBus, const STACK_SIZE: usize> Reader<B, STACK_SIZE> {
    pub const fn new(bus: B, config: MachineConfig) -> Self {
        Self {
            machine: Mutex::new(RefCell::new(Machine::new(bus, config))),
        }
    }

    /// Runs `f` on the machine inside the critical section.
    pub fn with_machine<R>(&self, f: impl FnOnce(&mut Machine<B, STACK_SIZE>) -> R) -> R {
        self.machine.lock(|machine| f(&mut machine.borrow_mut()))
    }

    pub fn reset_async(&self) -> Result<(), MachineError> {
        self.with_machine(|machine| machine.install_reset())
    }

    pub fn read_scratchpad_async(&self, device: RomId) -> Result<(), MachineError> {
        self.with_machine(|machine| machine.install_read_scratchpad(device))
    }

    pub fn convert_all_temperatures_async(&self) -> Result<(), MachineError> {
        self.with_machine(|machine| machine.install_convert_all())
    }

    pub fn do_test_timings(&self, repeats: u16) -> Result<(), MachineError> {
        self.with_machine(|machine| machine.install_test_timings(repeats))
    }

    pub fn status(&self) -> Status {
        self.with_machine(|machine| machine.status())
    }

    /// A copy of the scratchpad as last filled in.
    pub fn scratchpad(&self) -> Scratchpad {
        self.with_machine(|machine| *machine.scratchpad())
    }

    /// Converts the scratchpad last read into a temperature, interpreted for
    /// `device`'s family. Only meaningful once a read of that device has
    /// finished.
    pub fn temperature(&self, device: &RomId) -> Option<Temperature> {
        raw_temperature(device.family(), &self.scratchpad())
    }

    pub fn stack_report(&self) -> StackReport<STACK_SIZE> {
        self.with_machine(|machine| machine.stack().report())
    }

    /// Pumps one slice. For callers without a hardware timer; see
    /// [`Reader::on_timer_compare`] for the interrupt path.
    pub fn run_slice(&self) -> u8 {
        self.with_machine(|machine| machine.run_slice())
    }

    /// Polls the status once a millisecond until it reads zero or
    /// `timeout_ms` polls have been made. Returns the last status seen.
    ///
    /// Something else must be pumping the machine while this blocks.
    pub fn busy_wait_for_zero_status<D: DelayNs>(
        &self,
        delay: &mut D,
        timeout_ms: u32,
    ) -> Status {
        let mut polls = 0u32;
        loop {
            let status = self.status();
            if status.is_idle() {
                return status;
            }
            polls = polls.saturating_add(1);
            if polls >= timeout_ms {
                warn!("gave up waiting after {=u32} ms, status {}", timeout_ms, status);
                return status;
            }
            delay.delay_ms(1);
        }
    }

    /// Runs one blocking enumeration pass on this reader's bus.
    ///
    /// The machine is locked only to lend the bus out and to take it back,
    /// and for each line operation of the pass. The waits run on `delay`
    /// outside the lock, so interrupts are masked only for the few
    /// microseconds of each slot's timing window. Slices that fall due during
    /// the pass return [`wire_machine::MAX_HOLDOFF`] without touching the bus.
    ///
    /// Refuses while a program is still pending or another pass has the bus.
    /// Flags left over from finished sessions do not block it.
    pub fn discover_next<D: DelayNs>(
        &self,
        search: &mut DeviceSearch,
        delay: &mut D,
    ) -> Result<Option<RomId>, DiscoveryError> {
        self.with_machine(|machine| {
            if machine.is_running() || machine.is_bus_lent() {
                return Err(DiscoveryError::SessionPending(machine.status()));
            }
            machine.lend_bus();
            Ok(())
        })?;

        let found = search.find_next_device(&mut LentBus {
            reader: self,
            delay,
        });
        self.with_machine(|machine| machine.return_bus());
        Ok(found?)
    }

    /// Lists every device on the bus, one pass at a time.
    pub fn discover_all<D: DelayNs, const DEVICE_MAX: usize>(
        &self,
        delay: &mut D,
    ) -> Result<Vec<RomId, DEVICE_MAX>, DiscoveryError> {
        let mut search = DeviceSearch::new();
        let mut devices = Vec::new();
        while let Some(rom) = self.discover_next(&mut search, delay)? {
            devices
                .push(rom)
                .map_err(|_| DiscoveryError::Search(SearchError::TooManyDevices))?;
        }
        debug!("found {=usize} devices", devices.len());
        Ok(devices)
    }
}

/// The bus of a [`Reader`] while a search has borrowed it. Line operations
/// each take the lock for themselves; waits happen outside it.
struct LentBus<'a, B, D, const STACK_SIZE: usize> {
    reader: &'a Reader<B, STACK_SIZE>,
    delay: &'a mut D,
}

impl<B: OneWireBus, D: DelayNs, const STACK_SIZE: usize> OneWireBus
    for LentBus<'_, B, D, STACK_SIZE>
{
    fn drive_low(&mut self) {
        self.reader.with_machine(|machine| machine.bus_mut().drive_low());
    }

    fn release(&mut self) {
        self.reader.with_machine(|machine| machine.bus_mut().release());
    }

    fn sample(&mut self) -> bool {
        self.reader.with_machine(|machine| machine.bus_mut().sample())
    }

    fn delay_us(&mut self, micros: u32) {
        self.delay.delay_us(micros);
    }
}

#[cfg(test)]
mod test;
