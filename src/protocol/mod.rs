//! Command/response frames exchanged with a connected beepcon.
//!
//! Requests are `[opcode, payload...]`. Responses echo the opcode and add a
//! status byte: `[opcode, status, payload...]`, where status 0 is success.
//! Every multi-byte integer is big-endian.
//!
//! ```
//! use beepcon_core::protocol::{decode, CapabilityLimits, Command, Opcode, Response};
//!
//! let frame = Command::ReadBattery.encode().unwrap();
//! assert_eq!(frame, vec![0x10]);
//!
//! let response = decode(Opcode::ReadBattery, &[0x10, 0x00, 0x0b, 0xb8]).unwrap();
//! assert_eq!(response, Response::Battery { millivolts: 3000 });
//!
//! let limits = CapabilityLimits::default();
//! assert!(Command::Buzz { sound: 3 }.validate(&limits).is_err());
//! ```

pub mod command;
pub mod response;

pub use command::{Command, TxPattern};
pub use response::{decode, Response, StackVersion, VersionInfo, VersionPair};

use crate::error::{BeepconError, Result};

/// Status byte for a successful response.
pub const STATUS_OK: u8 = 0x00;

/// Status byte returned to `ValidatePassword` when the password is wrong.
pub const STATUS_INVALID_PASSWORD: u8 = 0x01;

/// Largest description, in UTF-8 bytes.
pub const MAX_DESCRIPTION_LEN: usize = 480;

/// Largest URL, in UTF-8 bytes.
pub const MAX_URL_LEN: usize = 160;

/// Largest data section of one firmware chunk frame.
pub const MAX_CHUNK_PAYLOAD: usize = 240;

pub const MAX_BUZZ_SOUND: u8 = 2;

pub const MAX_LED_SECONDS: u8 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    ValidatePassword = 0x01,
    ReadBattery = 0x10,
    Buzz = 0x11,
    LightLed = 0x12,
    ReadTextInfo = 0x13,
    ReadIdentifiers = 0x14,
    ReadVersion = 0x15,
    ReadTxPower = 0x16,
    ReadTxRate = 0x17,
    ReadTxPattern = 0x18,
    ResetPasswordToFactory = 0x19,
    WriteTextInfo = 0x20,
    WriteIdentifiers = 0x21,
    WriteTxPower = 0x22,
    WriteTxRate = 0x23,
    WriteUuid = 0x24,
    WriteTxPattern = 0x25,
    WritePassword = 0x26,
    WriteTxCalibration = 0x27,
    ResetFactoryCalibration = 0x28,
    WriteQuietMode = 0x29,
    FirmwareBegin = 0x30,
    FirmwareChunk = 0x31,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use Opcode::*;
        let op = match byte {
            0x01 => ValidatePassword,
            0x10 => ReadBattery,
            0x11 => Buzz,
            0x12 => LightLed,
            0x13 => ReadTextInfo,
            0x14 => ReadIdentifiers,
            0x15 => ReadVersion,
            0x16 => ReadTxPower,
            0x17 => ReadTxRate,
            0x18 => ReadTxPattern,
            0x19 => ResetPasswordToFactory,
            0x20 => WriteTextInfo,
            0x21 => WriteIdentifiers,
            0x22 => WriteTxPower,
            0x23 => WriteTxRate,
            0x24 => WriteUuid,
            0x25 => WriteTxPattern,
            0x26 => WritePassword,
            0x27 => WriteTxCalibration,
            0x28 => ResetFactoryCalibration,
            0x29 => WriteQuietMode,
            0x30 => FirmwareBegin,
            0x31 => FirmwareChunk,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Configuration writes; the device reboots after acknowledging them.
    pub fn is_write(self) -> bool {
        (0x20..=0x29).contains(&self.as_byte())
    }

    pub fn is_firmware(self) -> bool {
        matches!(self, Opcode::FirmwareBegin | Opcode::FirmwareChunk)
    }
}

/// Bounds the device reports after a successful password validation.
///
/// All zero until then, and zeroed again on disconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityLimits {
    pub max_name_len: u8,
    pub max_password_len: u8,
    pub min_password_len: u8,
    pub max_tx_power: u8,
    pub max_tx_rate: u8,
    /// Upper bound on the sum of the five broadcast slots (seconds)
    pub max_pattern_time: u8,
    pub min_config_time: u8,
    pub max_config_time: u8,
    pub max_power_db1m: i8,
    pub min_power_db1m: i8,
}

impl CapabilityLimits {
    pub const WIRE_LEN: usize = 10;

    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let b: &[u8; Self::WIRE_LEN] = payload.try_into().map_err(|_| {
            BeepconError::protocol(format!(
                "capability block is {} bytes, expected {}",
                payload.len(),
                Self::WIRE_LEN
            ))
        })?;
        Ok(Self {
            max_name_len: b[0],
            max_password_len: b[1],
            min_password_len: b[2],
            max_tx_power: b[3],
            max_tx_rate: b[4],
            max_pattern_time: b[5],
            min_config_time: b[6],
            max_config_time: b[7],
            max_power_db1m: b[8] as i8,
            min_power_db1m: b[9] as i8,
        })
    }

    pub fn is_populated(&self) -> bool {
        *self != Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip_table() {
        for byte in 0u8..=0xff {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.as_byte(), byte);
            }
        }
        assert_eq!(Opcode::from_byte(0x02), None);
        assert_eq!(Opcode::from_byte(0x2a), None);
    }

    #[test]
    fn test_write_classification() {
        assert!(Opcode::WriteTextInfo.is_write());
        assert!(Opcode::ResetFactoryCalibration.is_write());
        assert!(Opcode::WriteQuietMode.is_write());
        assert!(!Opcode::ResetPasswordToFactory.is_write());
        assert!(!Opcode::FirmwareBegin.is_write());
        assert!(Opcode::FirmwareChunk.is_firmware());
    }

    #[test]
    fn test_capability_limits_from_bytes() {
        let limits =
            CapabilityLimits::from_bytes(&[20, 16, 4, 7, 9, 60, 10, 120, 0x04, 0xe2]).unwrap();
        assert_eq!(limits.max_name_len, 20);
        assert_eq!(limits.min_password_len, 4);
        assert_eq!(limits.max_pattern_time, 60);
        assert_eq!(limits.max_power_db1m, 4);
        assert_eq!(limits.min_power_db1m, -30);
        assert!(limits.is_populated());
        assert!(!CapabilityLimits::default().is_populated());

        assert!(matches!(
            CapabilityLimits::from_bytes(&[1, 2, 3]),
            Err(BeepconError::ProtocolError(_))
        ));
    }
}
