//! Hooking the interpreter to a hardware compare timer.
//!
//! The timer counts ticks from zero and interrupts when it reaches the
//! compare value. The interrupt handler runs one slice and loads the holdoff
//! it returns as the next compare value, so the interpreter decides when it
//! runs next.
use wire_machine::bus::OneWireBus;
use wire_machine::MAX_HOLDOFF;

use crate::Reader;

/// An 8 bit up-counter with a compare interrupt.
pub trait TickTimer {
    /// Stop counting.
    fn stop(&mut self);
    /// Interrupt once the counter reaches `ticks`.
    fn set_compare(&mut self, ticks: u8);
    /// Zero the counter and start counting again.
    fn restart(&mut self);
}

impl<B: OneWireBus, const STACK_SIZE: usize> Reader<B, STACK_SIZE> {
    /// Drops anything pending and arms the timer as far out as it goes.
    pub fn begin<T: TickTimer>(&self, timer: &mut T) {
        self.with_machine(|machine| machine.flush());
        timer.stop();
        timer.set_compare(MAX_HOLDOFF);
        timer.restart();
    }

    /// Body of the compare interrupt. Returns the holdoff it programmed.
    pub fn on_timer_compare<T: TickTimer>(&self, timer: &mut T) -> u8 {
        timer.stop();
        let holdoff = self.run_slice();
        timer.set_compare(holdoff);
        timer.restart();
        holdoff
    }
}
