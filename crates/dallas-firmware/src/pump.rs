//! Pumping the interpreter from an embassy executor.
//!
//! Timer wakeups go through the executor, so the bit timings are only as good
//! as its latency. The inline waits still happen inside the slice, which
//! keeps write and read slots intact; what stretches is the gap between
//! them, and 1-Wire devices tolerate long gaps between slots.
use dallas::Reader;
use embassy_time::{Duration, Instant, Timer};
use wire_machine::bus::OneWireBus;
use wire_machine::Status;

/// How long `holdoff` timer ticks last.
pub fn holdoff_duration(holdoff: u8, tick_micros: u32) -> Duration {
    Duration::from_micros(u64::from(holdoff).saturating_mul(u64::from(tick_micros)))
}

/// Runs slices forever, sleeping out each holdoff in between.
pub async fn pump_loop<B: OneWireBus, const STACK_SIZE: usize>(
    reader: &Reader<B, STACK_SIZE>,
) -> ! {
    let tick_micros = reader.with_machine(|machine| machine.config().calibration.tick_micros);
    loop {
        let holdoff = reader.run_slice();
        Timer::after(holdoff_duration(holdoff, tick_micros)).await;
    }
}

/// Async counterpart of [`Reader::busy_wait_for_zero_status`]: checks the
/// status every millisecond until it is zero or `timeout` has passed.
pub async fn wait_for_idle<B: OneWireBus, const STACK_SIZE: usize>(
    reader: &Reader<B, STACK_SIZE>,
    timeout: Duration,
) -> Status {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        let status = reader.status();
        if status.is_idle() {
            return status;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!("gave up waiting for the bus, status {}", status);
            return status;
        }
        Timer::after_millis(1).await;
    }
}
