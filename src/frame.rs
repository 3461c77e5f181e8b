//! Command frame encoding and status packet decoding.
//!
//! The command frame format is:
//!
//! Start Byte | End Byte | Meaning
//! 0          | 1        | A constant header with value [0x05, 0x13]
//! 2          | 2        | The command id
//! 3          | 3        | Reserved, always 0x00
//! 4          | 5        | A MODBUS CRC over bytes 0-3, little endian
//!
//! The status packet is 253 bytes. Fields sit at fixed offsets with fixed
//! scaling; bytes not listed below are reserved and ignored. All integers
//! are little endian.

use crate::error::Error;
use crate::telemetry::{LightBarState, TelemetrySnapshot};
use crc16::{State, MODBUS};

/// Constant header shared by command frames and status packets
pub(crate) const MSG_HEADER: [u8; 2] = [0x05, 0x13];

/// Command id requesting one status packet
pub(crate) const STATUS_COMMAND: u8 = 0x01;

/// Size of a status packet in bytes
pub(crate) const STATUS_PACKET_LEN: usize = 253;

const OFFSET_MSG_TYPE: usize = 8;
const OFFSET_SERIAL_NO: usize = 16;
const SERIAL_NO_LEN: usize = 16;
const OFFSET_BATTERY_PCT: usize = 35;
const OFFSET_LIGHT_BAR: usize = 39;
const OFFSET_TEMPERATURE: usize = 73;
const OFFSET_SOLAR_POWER_DW: usize = 77;
const OFFSET_AC_POWER_DW: usize = 84;
const OFFSET_ENERGY_SOLAR: usize = 110;
const OFFSET_ENERGY_BATTERY: usize = 117;
const OFFSET_ENERGY_OUT: usize = 124;
const OFFSET_DISCHARGE_CW: usize = 132;

/// Encode the command frame for the given command id.
///
/// Deterministic: the same command id always produces the same bytes.
pub(crate) fn encode(command_id: u8) -> Vec<u8> {
    let mut frame = vec![MSG_HEADER[0], MSG_HEADER[1], command_id, 0x00];
    let crc = State::<MODBUS>::calculate(&frame).to_le_bytes();
    frame.extend_from_slice(&crc);
    frame
}

/// Decode a reassembled status packet into a telemetry snapshot.
pub(crate) fn decode(buffer: &[u8]) -> Result<TelemetrySnapshot, Error> {
    if buffer.len() < STATUS_PACKET_LEN {
        return Err(Error::MalformedResponse("shorter than a status packet"));
    }

    if buffer[OFFSET_MSG_TYPE..OFFSET_MSG_TYPE + 2] != MSG_HEADER {
        return Err(Error::MalformedResponse("unknown message type"));
    }

    let serial_raw = &buffer[OFFSET_SERIAL_NO..OFFSET_SERIAL_NO + SERIAL_NO_LEN];
    let serial_no = std::str::from_utf8(serial_raw)
        .map_err(|_| Error::MalformedResponse("serial number is not ASCII"))?
        .trim_end_matches('\0')
        .to_string();

    let solar_power_in_w = read_u16(buffer, OFFSET_SOLAR_POWER_DW) as f64 / 10.0;
    let ac_power_out_w = read_u16(buffer, OFFSET_AC_POWER_DW) as f64 / 10.0;

    Ok(TelemetrySnapshot {
        serial_no,
        battery_percent: buffer[OFFSET_BATTERY_PCT],
        // Net battery power is solar in minus AC out; only the charging
        // direction is reported here, discharge has its own field.
        charge_power_w: (solar_power_in_w - ac_power_out_w).max(0.0),
        discharge_power_w: read_u32(buffer, OFFSET_DISCHARGE_CW) as f64 / 100.0,
        temperature_c: buffer[OFFSET_TEMPERATURE] as i8 as f64,
        ac_power_out_w,
        solar_power_in_w,
        light_bar_state: match buffer[OFFSET_LIGHT_BAR] {
            0 => LightBarState::Off,
            1..=3 => LightBarState::On,
            _ => LightBarState::Unknown,
        },
        energy_solar_total_kwh: read_u32(buffer, OFFSET_ENERGY_SOLAR) as f64 / 10_000.0,
        energy_battery_total_kwh: read_u32(buffer, OFFSET_ENERGY_BATTERY) as f64 / 100_000.0,
        energy_total_out_kwh: read_u32(buffer, OFFSET_ENERGY_OUT) as f64 / 10_000.0,
    })
}

fn read_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

fn read_u32(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

/// A status packet with known field values, used by tests across the crate.
#[cfg(test)]
pub(crate) fn reference_packet() -> Vec<u8> {
    let mut packet = vec![0u8; STATUS_PACKET_LEN];
    packet[OFFSET_MSG_TYPE..OFFSET_MSG_TYPE + 2].copy_from_slice(&MSG_HEADER);
    packet[OFFSET_SERIAL_NO..OFFSET_SERIAL_NO + 10].copy_from_slice(b"AZV1234567");
    packet[OFFSET_BATTERY_PCT] = 72;
    packet[OFFSET_LIGHT_BAR] = 1;
    packet[OFFSET_TEMPERATURE] = 21;
    // 301.5 W solar in, 120.0 W AC out
    packet[OFFSET_SOLAR_POWER_DW..OFFSET_SOLAR_POWER_DW + 2]
        .copy_from_slice(&3015u16.to_le_bytes());
    packet[OFFSET_AC_POWER_DW..OFFSET_AC_POWER_DW + 2].copy_from_slice(&1200u16.to_le_bytes());
    packet[OFFSET_ENERGY_SOLAR..OFFSET_ENERGY_SOLAR + 4]
        .copy_from_slice(&123_450u32.to_le_bytes());
    packet[OFFSET_ENERGY_BATTERY..OFFSET_ENERGY_BATTERY + 4]
        .copy_from_slice(&2_500_000u32.to_le_bytes());
    packet[OFFSET_ENERGY_OUT..OFFSET_ENERGY_OUT + 4].copy_from_slice(&98_760u32.to_le_bytes());
    // 42.5 W discharge
    packet[OFFSET_DISCHARGE_CW..OFFSET_DISCHARGE_CW + 4].copy_from_slice(&4250u32.to_le_bytes());
    packet
}

#[test]
fn test_encode_status_command() {
    let frame = encode(STATUS_COMMAND);
    assert_eq!(frame, [0x05, 0x13, 0x01, 0x00, 0xf0, 0xbd]);
}

#[test]
fn test_encode_is_deterministic() {
    assert_eq!(encode(STATUS_COMMAND), encode(STATUS_COMMAND));
    assert_eq!(encode(0x42), encode(0x42));
}

#[test]
fn test_decode_reference_packet() {
    let snapshot = decode(&reference_packet()).unwrap();
    assert_eq!(snapshot.serial_no, "AZV1234567");
    assert_eq!(snapshot.battery_percent, 72);
    assert_eq!(snapshot.light_bar_state, LightBarState::On);
    assert_eq!(snapshot.temperature_c, 21.0);
    assert_eq!(snapshot.solar_power_in_w, 301.5);
    assert_eq!(snapshot.ac_power_out_w, 120.0);
    assert_eq!(snapshot.charge_power_w, 181.5);
    assert_eq!(snapshot.discharge_power_w, 42.5);
    assert_eq!(snapshot.energy_solar_total_kwh, 12.345);
    assert_eq!(snapshot.energy_battery_total_kwh, 25.0);
    assert_eq!(snapshot.energy_total_out_kwh, 9.876);
}

#[test]
fn test_decode_negative_temperature() {
    let mut packet = reference_packet();
    packet[OFFSET_TEMPERATURE] = -5i8 as u8;
    let snapshot = decode(&packet).unwrap();
    assert_eq!(snapshot.temperature_c, -5.0);
}

#[test]
fn test_decode_light_bar_states() {
    let mut packet = reference_packet();
    packet[OFFSET_LIGHT_BAR] = 0;
    assert_eq!(decode(&packet).unwrap().light_bar_state, LightBarState::Off);
    packet[OFFSET_LIGHT_BAR] = 3;
    assert_eq!(decode(&packet).unwrap().light_bar_state, LightBarState::On);
    packet[OFFSET_LIGHT_BAR] = 0xff;
    assert_eq!(
        decode(&packet).unwrap().light_bar_state,
        LightBarState::Unknown
    );
}

#[test]
fn test_decode_one_byte_short() {
    let packet = reference_packet();
    let result = decode(&packet[..STATUS_PACKET_LEN - 1]);
    assert!(matches!(result, Err(Error::MalformedResponse(_))));
}

#[test]
fn test_decode_wrong_message_type() {
    let mut packet = reference_packet();
    packet[OFFSET_MSG_TYPE] = 0x06;
    let result = decode(&packet);
    assert!(matches!(result, Err(Error::MalformedResponse(_))));
}

#[test]
fn test_decode_ignores_reserved_bytes() {
    let mut packet = reference_packet();
    packet[0] = 0xde;
    packet[200] = 0xad;
    assert_eq!(decode(&packet).unwrap(), decode(&reference_packet()).unwrap());
}
