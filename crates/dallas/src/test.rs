use super::*;
use crate::scheduler::TickTimer;
use wire_machine::sim_bus::{SimBus, SimDevice};
use wire_machine::{MAX_HOLDOFF, MAX_PROGRAM_DEPTH};

extern crate std;
use std::vec::Vec as StdVec;

const SENSOR_A: RomId = RomId::new([0x28, 0xFF, 0x6F, 0x45, 0x80, 0x14, 0x02, 0x5E]);
const SENSOR_B: RomId = RomId::new([0x10, 0x31, 0x41, 0x26, 0x00, 0x08, 0x00, 0x0A]);
const PAD_A: Scratchpad = Scratchpad::new([0x90, 0x01, 0x4B, 0x46, 0x7F, 0xFF, 0x10, 0x10, 0x6A]);
const PAD_B: Scratchpad = Scratchpad::new([0x32, 0x00, 0x4B, 0x46, 0xFF, 0xFF, 0x0C, 0x10, 0x87]);

type SimReader = Reader<SimBus<4>>;

fn sim_reader() -> SimReader {
    let mut bus = SimBus::new();
    bus.attach(
        SimDevice::new(SENSOR_A)
            .with_scratchpad(PAD_A)
            .with_conversion_time(5_000),
    )
    .unwrap();
    bus.attach(
        SimDevice::new(SENSOR_B)
            .with_scratchpad(PAD_B)
            .with_conversion_time(8_000),
    )
    .unwrap();
    Reader::new(bus, MachineConfig::default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerEvent {
    Stop,
    Compare(u8),
    Restart,
}

#[derive(Default)]
struct FakeTimer {
    events: StdVec<TimerEvent>,
}

impl TickTimer for FakeTimer {
    fn stop(&mut self) {
        self.events.push(TimerEvent::Stop);
    }

    fn set_compare(&mut self, ticks: u8) {
        self.events.push(TimerEvent::Compare(ticks));
    }

    fn restart(&mut self) {
        self.events.push(TimerEvent::Restart);
    }
}

/// Stands in for the timer interrupt while the application sleeps.
struct PumpingDelay<'a> {
    reader: &'a SimReader,
}

impl DelayNs for PumpingDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        let budget = ns / 1_000;
        let mut elapsed = 0;
        while elapsed < budget {
            let holdoff = self.reader.run_slice();
            self.reader.with_machine(|machine| machine.bus_mut().elapse_ticks(holdoff));
            elapsed += u32::from(holdoff) * 4;
        }
    }
}

/// Advances the simulated clock the way a board's delay would, and plays
/// the timer interrupt once per wait to see what it finds.
struct SimClockDelay<'a> {
    reader: &'a SimReader,
    waits: u32,
    held_slices: u32,
    always_lent: bool,
    install_reset_on_first_wait: bool,
}

impl<'a> SimClockDelay<'a> {
    fn new(reader: &'a SimReader) -> Self {
        Self {
            reader,
            waits: 0,
            held_slices: 0,
            always_lent: true,
            install_reset_on_first_wait: false,
        }
    }
}

impl DelayNs for SimClockDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.delay_us(ns / 1_000);
    }

    fn delay_us(&mut self, us: u32) {
        if self.install_reset_on_first_wait && self.waits == 0 {
            self.reader.reset_async().unwrap();
        }
        self.waits += 1;
        // Panics on a double borrow if the search still held the machine.
        let lent = self.reader.with_machine(|machine| machine.is_bus_lent());
        self.always_lent &= lent;
        if self.reader.run_slice() == MAX_HOLDOFF {
            self.held_slices += 1;
        }
        self.reader.with_machine(|machine| machine.bus_mut().elapse_micros(us));
    }
}

/// Sleeps without anything running meanwhile.
#[derive(Default)]
struct CountingDelay {
    calls: u32,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, _ns: u32) {
        self.calls += 1;
    }

    fn delay_ms(&mut self, _ms: u32) {
        self.calls += 1;
    }
}

fn interrupt_until_idle(reader: &SimReader, timer: &mut FakeTimer) {
    for _ in 0..20_000 {
        if !reader.with_machine(|machine| machine.is_running()) {
            return;
        }
        let holdoff = reader.on_timer_compare(timer);
        reader.with_machine(|machine| machine.bus_mut().elapse_ticks(holdoff));
    }
    panic!("session did not finish");
}

#[test]
fn test_begin_arms_timer_and_flushes() -> Result<(), MachineError> {
    let reader = sim_reader();
    let mut timer = FakeTimer::default();
    reader.convert_all_temperatures_async()?;

    reader.begin(&mut timer);
    assert!(!reader.with_machine(|machine| machine.is_running()));
    assert_eq!(
        timer.events,
        [TimerEvent::Stop, TimerEvent::Compare(255), TimerEvent::Restart]
    );
    Ok(())
}

#[test]
fn test_interrupt_reprograms_compare_with_holdoff() -> Result<(), MachineError> {
    let reader = sim_reader();
    let mut timer = FakeTimer::default();
    reader.begin(&mut timer);
    reader.reset_async()?;
    assert_eq!(reader.status(), Status::STILL_BUSY);

    timer.events.clear();
    assert_eq!(reader.on_timer_compare(&mut timer), 110);
    assert_eq!(
        timer.events,
        [TimerEvent::Stop, TimerEvent::Compare(110), TimerEvent::Restart]
    );

    reader.with_machine(|machine| machine.bus_mut().elapse_ticks(110));
    interrupt_until_idle(&reader, &mut timer);
    assert_eq!(reader.status(), Status::IDLE);
    assert_eq!(reader.on_timer_compare(&mut timer), 255);
    Ok(())
}

#[test]
fn test_read_and_convert_each_sensor() -> Result<(), MachineError> {
    let reader = sim_reader();
    let mut timer = FakeTimer::default();
    reader.begin(&mut timer);

    reader.read_scratchpad_async(SENSOR_A)?;
    interrupt_until_idle(&reader, &mut timer);
    assert_eq!(reader.status(), Status::IDLE);
    assert_eq!(reader.scratchpad(), PAD_A);
    assert_eq!(reader.temperature(&SENSOR_A).map(|t| t.raw()), Some(3200));

    reader.read_scratchpad_async(SENSOR_B)?;
    interrupt_until_idle(&reader, &mut timer);
    assert_eq!(reader.scratchpad(), PAD_B);
    assert_eq!(reader.temperature(&SENSOR_B).map(|t| t.raw()), Some(13069));

    let report = reader.stack_report();
    assert_eq!(report.depth, 0);
    assert_eq!(report.high_tide, MAX_PROGRAM_DEPTH);
    assert_eq!(report.overflow_snapshot, None);
    Ok(())
}

#[test]
fn test_busy_wait_returns_once_conversions_finish() -> Result<(), MachineError> {
    let reader = sim_reader();
    reader.convert_all_temperatures_async()?;
    assert_eq!(reader.status(), Status::DEVICES_BUSY);

    let mut delay = PumpingDelay { reader: &reader };
    let status = reader.busy_wait_for_zero_status(&mut delay, 100);
    assert_eq!(status, Status::IDLE);
    reader.with_machine(|machine| {
        for device in machine.bus().devices() {
            assert_eq!(device.conversions(), 1);
        }
    });
    Ok(())
}

#[test]
fn test_busy_wait_times_out_with_last_status() -> Result<(), MachineError> {
    let reader = sim_reader();
    reader.reset_async()?;

    let mut delay = CountingDelay::default();
    let status = reader.busy_wait_for_zero_status(&mut delay, 3);
    assert_eq!(status, Status::STILL_BUSY);
    assert_eq!(delay.calls, 2);
    Ok(())
}

#[test]
fn test_busy_wait_on_idle_reader_does_not_sleep() {
    let reader = sim_reader();
    let mut delay = CountingDelay::default();
    assert_eq!(reader.busy_wait_for_zero_status(&mut delay, 3), Status::IDLE);
    assert_eq!(delay.calls, 0);
}

#[test]
fn test_discovery_refused_during_session() -> Result<(), MachineError> {
    let reader = sim_reader();
    reader.reset_async()?;
    let mut search = DeviceSearch::new();
    let mut delay = SimClockDelay::new(&reader);
    assert_eq!(
        reader.discover_next(&mut search, &mut delay),
        Err(DiscoveryError::SessionPending(Status::STILL_BUSY))
    );
    assert_eq!(delay.waits, 0);
    Ok(())
}

#[test]
fn test_discovery_after_failed_reset() -> Result<(), DiscoveryError> {
    let reader: SimReader = Reader::new(SimBus::new(), MachineConfig::default());
    let mut timer = FakeTimer::default();
    reader.begin(&mut timer);
    reader.reset_async().unwrap();
    interrupt_until_idle(&reader, &mut timer);
    assert_eq!(reader.status(), Status::NO_DEVICE);

    reader.with_machine(|machine| machine.bus_mut().attach(SimDevice::new(SENSOR_A)).unwrap());
    let mut search = DeviceSearch::new();
    let mut delay = SimClockDelay::new(&reader);
    assert_eq!(reader.discover_next(&mut search, &mut delay)?, Some(SENSOR_A));
    // The leftover flag is still there for the application to see.
    assert_eq!(reader.status(), Status::NO_DEVICE);
    Ok(())
}

#[test]
fn test_discovery_waits_outside_the_lock() -> Result<(), DiscoveryError> {
    let reader = sim_reader();
    let mut search = DeviceSearch::new();
    let mut delay = SimClockDelay::new(&reader);
    delay.install_reset_on_first_wait = true;

    assert_eq!(reader.discover_next(&mut search, &mut delay)?, Some(SENSOR_B));
    assert!(delay.waits > 64);
    assert!(delay.always_lent);
    assert_eq!(delay.held_slices, delay.waits);

    // The reset installed mid-pass was held back and runs now.
    assert!(!reader.with_machine(|machine| machine.is_bus_lent()));
    assert_eq!(reader.status(), Status::STILL_BUSY);
    let mut timer = FakeTimer::default();
    interrupt_until_idle(&reader, &mut timer);
    assert_eq!(reader.status(), Status::IDLE);
    Ok(())
}

#[test]
fn test_failed_pass_returns_the_bus() {
    let reader: SimReader = Reader::new(SimBus::new(), MachineConfig::default());
    let mut search = DeviceSearch::new();
    let mut delay = SimClockDelay::new(&reader);
    assert_eq!(
        reader.discover_next(&mut search, &mut delay),
        Err(DiscoveryError::Search(SearchError::NoDevice))
    );
    assert!(!reader.with_machine(|machine| machine.is_bus_lent()));
}

#[test]
fn test_discover_all_through_reader() -> Result<(), DiscoveryError> {
    let reader = sim_reader();
    let mut delay = SimClockDelay::new(&reader);
    let devices = reader.discover_all::<_, 4>(&mut delay)?;
    assert_eq!(devices.as_slice(), &[SENSOR_B, SENSOR_A]);

    assert_eq!(
        reader.discover_all::<_, 1>(&mut delay),
        Err(DiscoveryError::Search(SearchError::TooManyDevices))
    );
    Ok(())
}

#[test]
fn test_discovered_devices_then_read() -> Result<(), DiscoveryError> {
    let reader = sim_reader();
    let mut delay = SimClockDelay::new(&reader);
    let devices = reader.discover_all::<_, 4>(&mut delay)?;
    let mut timer = FakeTimer::default();
    reader.begin(&mut timer);
    for device in devices {
        reader.read_scratchpad_async(device).unwrap();
        interrupt_until_idle(&reader, &mut timer);
        assert!(reader.temperature(&device).is_some());
    }
    Ok(())
}

static SHARED_READER: Reader<SimBus<1>> = Reader::new(SimBus::new(), MachineConfig::new());

#[test]
fn test_reader_in_a_static() -> Result<(), MachineError> {
    SHARED_READER.reset_async()?;
    let mut slices = 0;
    while SHARED_READER.with_machine(|machine| machine.is_running()) {
        let holdoff = SHARED_READER.run_slice();
        SHARED_READER.with_machine(|machine| machine.bus_mut().elapse_ticks(holdoff));
        slices += 1;
    }
    assert_eq!(slices, 4);
    assert_eq!(SHARED_READER.status(), Status::NO_DEVICE);
    Ok(())
}
