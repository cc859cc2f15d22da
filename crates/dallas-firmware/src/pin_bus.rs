use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use wire_machine::bus::OneWireBus;

/// A 1-Wire bus on a single GPIO.
///
/// The pin must be configured open-drain with a pull-up on the line, so that
/// setting it high only lets go of the bus. Pin errors are ignored: a pin
/// that cannot be read counts as high, which the protocol treats as nobody
/// answering.
pub struct PinBus<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> PinBus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    /// Takes the pin and releases the bus.
    pub fn new(mut pin: P, delay: D) -> Self {
        let _ = pin.set_high();
        Self { pin, delay }
    }

    pub fn release_pin(self) -> (P, D) {
        (self.pin, self.delay)
    }
}

impl<P, D> OneWireBus for PinBus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    fn drive_low(&mut self) {
        let _ = self.pin.set_low();
    }

    fn release(&mut self) {
        let _ = self.pin.set_high();
    }

    fn sample(&mut self) -> bool {
        self.pin.is_high().unwrap_or(true)
    }

    fn delay_us(&mut self, micros: u32) {
        self.delay.delay_us(micros);
    }
}

#[cfg(test)]
mod test;
