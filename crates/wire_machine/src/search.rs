//! Device discovery by walking the binary tree of ROM ids.
//!
//! After a `SEARCH_ROM` command every device still in contention answers each
//! bit twice, first the bit and then its complement. The line is a wired AND,
//! so the master sees `10` or `01` when all remaining devices agree and `00`
//! when they disagree. The master then writes the branch it takes, and the
//! devices on the other branch drop out until the next reset. One pass isolates
//! one device; the `00` positions where the 1 branch was skipped are kept as
//! fork points so the next pass can go back and take it.
//!
//! The search blocks for the whole pass (about 13 ms) and does its own waits.
//! Only run it while no interpreter session is using the bus.
use heapless::Vec;
use thiserror_no_std::Error;

use crate::bus::{self, command::SEARCH_ROM, OneWireBus};
use crate::RomId;

const ROM_BITS: u8 = 64;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SearchError {
    #[error("no device answered the reset")]
    NoDevice,
    #[error("no device answered bit {0} of the search")]
    Ghost(u8),
    #[error("a previous pass failed, begin a new search")]
    RestartRequired,
    #[error("more devices than room to list them")]
    TooManyDevices,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Phase {
    Fresh,
    Resuming,
    Failed,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceSearch {
    rom: u64,
    forks: u64,
    phase: Phase,
}

impl DeviceSearch {
    pub const fn new() -> Self {
        Self {
            rom: 0,
            forks: 0,
            phase: Phase::Fresh,
        }
    }

    /// Starts over from the top of the tree.
    pub fn begin(&mut self) {
        *self = Self::new();
    }

    /// The id assembled by the last pass. Only meaningful after a pass
    /// returned `Ok(Some(_))`.
    pub fn current(&self) -> RomId {
        RomId::from(self.rom)
    }

    /// Runs one pass over the bus. Returns the next device's id, or `None`
    /// once every device has been reported.
    ///
    /// After an error the search state is unreliable and every further call
    /// returns [`SearchError::RestartRequired`] until [`DeviceSearch::begin`].
    pub fn find_next_device<B: OneWireBus + ?Sized>(
        &mut self,
        bus: &mut B,
    ) -> Result<Option<RomId>, SearchError> {
        // Up to and including this depth the path is dictated by the
        // previous id rather than chosen.
        let frozen_depth = match self.phase {
            Phase::Failed => return Err(SearchError::RestartRequired),
            Phase::Fresh => None,
            Phase::Resuming => {
                let Some(fork) = self.last_fork() else {
                    return Ok(None);
                };
                let fork_mask = bit_mask(fork);
                self.rom = (self.rom & fork_mask.wrapping_sub(1)) | fork_mask;
                self.forks &= !fork_mask;
                Some(fork)
            }
        };

        self.phase = Phase::Failed;
        if !bus::reset_pulse(bus) {
            debug!("search: no presence pulse");
            return Err(SearchError::NoDevice);
        }
        bus::write_byte(bus, SEARCH_ROM);

        for depth in 0..ROM_BITS {
            let bit = bus::read_bit(bus);
            let complement = bus::read_bit(bus);
            let mask = bit_mask(depth);

            let take_one = match (bit, complement) {
                (true, false) => true,
                (false, true) => false,
                (true, true) => {
                    warn!("search: nobody answered at depth {=u8}", depth);
                    return Err(SearchError::Ghost(depth));
                }
                (false, false) => {
                    if frozen_depth.is_some_and(|frozen| depth <= frozen) {
                        self.rom & mask != 0
                    } else {
                        // Take the 0 branch now and come back for the 1 branch.
                        self.forks |= mask;
                        false
                    }
                }
            };

            if take_one {
                self.rom |= mask;
            } else {
                self.rom &= !mask;
            }
            // Devices whose bit differs stop answering until the next reset.
            bus::write_bit(bus, take_one);
        }

        self.phase = Phase::Resuming;
        let rom = RomId::from(self.rom);
        debug!("search: found {}", rom);
        Ok(Some(rom))
    }

    fn last_fork(&self) -> Option<u8> {
        if self.forks == 0 {
            return None;
        }
        let highest = 63u32.saturating_sub(self.forks.leading_zeros());
        u8::try_from(highest).ok()
    }
}

impl Default for DeviceSearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a fresh search to completion and lists every device on the bus.
pub fn discover_all<B: OneWireBus + ?Sized, const DEVICE_MAX: usize>(
    bus: &mut B,
) -> Result<Vec<RomId, DEVICE_MAX>, SearchError> {
    let mut search = DeviceSearch::new();
    let mut devices = Vec::new();
    while let Some(rom) = search.find_next_device(bus)? {
        devices
            .push(rom)
            .map_err(|_| SearchError::TooManyDevices)?;
    }
    Ok(devices)
}

fn bit_mask(depth: u8) -> u64 {
    1u64.checked_shl(u32::from(depth)).unwrap_or(0)
}
