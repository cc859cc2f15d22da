//! Turning a scratchpad into a temperature.
use wire_machine::Scratchpad;

pub const FAMILY_DS18B20: u8 = 0x28;
pub const FAMILY_DS18S20: u8 = 0x10;

/// A reading in 128ths of a degree Celsius.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Temperature(i16);

impl Temperature {
    pub const fn from_raw(raw: i16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i16 {
        self.0
    }

    pub fn celsius(self) -> f32 {
        f32::from(self.0) / 128.0
    }
}

/// Interprets a scratchpad according to the family code of the device it
/// came from. Returns `None` for families we do not know how to read.
pub fn raw_temperature(family: u8, scratchpad: &Scratchpad) -> Option<Temperature> {
    let [lsb, msb, _, _, _, _, count_remain, count_per_c, _] = *scratchpad.bytes();
    match family {
        FAMILY_DS18B20 => {
            // Sixteenths of a degree, scaled up to 128ths.
            let sixteenths = i16::from_be_bytes([msb, lsb]);
            Some(Temperature(sixteenths.wrapping_shl(3)))
        }
        FAMILY_DS18S20 => {
            // Half degrees, with the last half discarded.
            let halves = i16::from_be_bytes([msb, lsb & 0xFE]);
            // The count registers add the sixteenths.
            let extra = i16::from(count_per_c).wrapping_sub(i16::from(count_remain));
            let sixteenths = halves.wrapping_shl(3).wrapping_add(extra);
            let scaled = sixteenths.wrapping_shl(3);
            // Early parts read far off. Linear correction from two reference
            // points near 22 °C and 60 °C.
            let corrected = 8900.0 + 1.29 * f32::from(scaled);
            Some(Temperature(corrected as i16))
        }
        _ => None,
    }
}

#[cfg(test)]
mod test;
