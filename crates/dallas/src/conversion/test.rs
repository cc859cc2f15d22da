use super::*;

#[test]
fn test_ds18b20_reading() {
    let pad = Scratchpad::new([0x90, 0x01, 0x4B, 0x46, 0x7F, 0xFF, 0x10, 0x10, 0x6A]);
    let temperature = raw_temperature(FAMILY_DS18B20, &pad).unwrap();
    assert_eq!(temperature.raw(), 3200);
    assert_eq!(temperature.celsius(), 25.0);
}

#[test]
fn test_ds18b20_negative_reading() {
    // -10.125 °C
    let pad = Scratchpad::new([0x5E, 0xFF, 0, 0, 0, 0, 0, 0, 0]);
    let temperature = raw_temperature(FAMILY_DS18B20, &pad).unwrap();
    assert_eq!(temperature.raw(), -1296);
    assert_eq!(temperature.celsius(), -10.125);
}

#[test]
fn test_ds18s20_reading_is_remapped() {
    let pad = Scratchpad::new([0x32, 0x00, 0x4B, 0x46, 0xFF, 0xFF, 0x0C, 0x10, 0x87]);
    let temperature = raw_temperature(FAMILY_DS18S20, &pad).unwrap();
    assert_eq!(temperature.raw(), 13069);
}

#[test]
fn test_unknown_family() {
    assert_eq!(raw_temperature(0x22, &Scratchpad::default()), None);
}
