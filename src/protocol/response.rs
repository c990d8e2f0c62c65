use crate::error::{BeepconError, Result};
use crate::protocol::{CapabilityLimits, Opcode, TxPattern, STATUS_OK};

/// Two-part version such as hardware `1.2`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionPair {
    pub major: u8,
    pub minor: u8,
}

impl VersionPair {
    /// Version in the high nibble, revision in the low nibble.
    pub fn from_nibbles(byte: u8) -> Self {
        Self {
            major: byte >> 4,
            minor: byte & 0x0f,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u16,
}

impl std::fmt::Display for StackVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}.{:02}.{:02}.{:04}",
            self.major, self.minor, self.patch, self.build
        )
    }
}

/// Result of `ReadVersion`; needed before a firmware update can start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub hardware: VersionPair,
    pub firmware: VersionPair,
    pub stack: StackVersion,
    pub model_code: u8,
    pub quiet_mode: bool,
}

impl VersionInfo {
    /// Firmware file stem this device would accept, e.g. `VC_M001H0102S0103020122F0301`.
    pub fn ota_file_check(&self) -> String {
        format!(
            "VC_M{:03}H{:02}{:02}S{:02}{:02}{:02}{:04}F{:02}{:02}",
            self.model_code,
            self.hardware.major,
            self.hardware.minor,
            self.stack.major,
            self.stack.minor,
            self.stack.patch,
            self.stack.build,
            self.firmware.major,
            self.firmware.minor,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    PasswordAccepted(CapabilityLimits),
    Battery { millivolts: u16 },
    TextInfo { text: String, url: String },
    Identifiers { major: u16, minor: u16, mac: [u8; 6] },
    Version(VersionInfo),
    TxPower { index: u8, db_at_1m: i8 },
    TxRate(u8),
    TxPattern(TxPattern),
    FirmwareChunkAck { seq: u16 },
    /// Success with no payload
    Ack,
}

impl Response {
    pub fn battery_volts(&self) -> Option<f32> {
        match self {
            Response::Battery { millivolts } => Some(f32::from(*millivolts) / 1000.0),
            _ => None,
        }
    }
}

/// Decode a response frame for a request sent with `expected`.
///
/// Any length mismatch, opcode mismatch or bad UTF-8 is a `ProtocolError`.
/// A non-zero status is `DeviceRejected(status)`.
pub fn decode(expected: Opcode, frame: &[u8]) -> Result<Response> {
    let (&opcode, rest) = frame
        .split_first()
        .ok_or_else(|| BeepconError::protocol("empty response frame"))?;
    if opcode != expected.as_byte() {
        return Err(BeepconError::protocol(format!(
            "response opcode 0x{opcode:02x} does not answer 0x{:02x}",
            expected.as_byte()
        )));
    }
    let (&status, payload) = rest
        .split_first()
        .ok_or_else(|| BeepconError::protocol("response frame has no status byte"))?;
    if status != STATUS_OK {
        return Err(BeepconError::DeviceRejected(status));
    }

    match expected {
        Opcode::ValidatePassword => {
            CapabilityLimits::from_bytes(payload).map(Response::PasswordAccepted)
        }
        Opcode::ReadBattery => {
            let b = fixed::<2>(expected, payload)?;
            Ok(Response::Battery {
                millivolts: u16::from_be_bytes(b),
            })
        }
        Opcode::ReadTextInfo => decode_text_info(payload),
        Opcode::ReadIdentifiers => {
            let b = fixed::<10>(expected, payload)?;
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&b[4..]);
            Ok(Response::Identifiers {
                major: u16::from_be_bytes([b[0], b[1]]),
                minor: u16::from_be_bytes([b[2], b[3]]),
                mac,
            })
        }
        Opcode::ReadVersion => {
            let b = fixed::<9>(expected, payload)?;
            Ok(Response::Version(VersionInfo {
                hardware: VersionPair::from_nibbles(b[0]),
                firmware: VersionPair::from_nibbles(b[1]),
                model_code: b[2],
                quiet_mode: b[3] != 0,
                stack: StackVersion {
                    major: b[4],
                    minor: b[5],
                    patch: b[6],
                    build: u16::from_be_bytes([b[7], b[8]]),
                },
            }))
        }
        Opcode::ReadTxPower => {
            let b = fixed::<2>(expected, payload)?;
            Ok(Response::TxPower {
                index: b[0],
                db_at_1m: b[1] as i8,
            })
        }
        Opcode::ReadTxRate => {
            let b = fixed::<1>(expected, payload)?;
            Ok(Response::TxRate(b[0]))
        }
        Opcode::ReadTxPattern => {
            let b = fixed::<{ TxPattern::WIRE_LEN }>(expected, payload)?;
            Ok(Response::TxPattern(TxPattern::from_bytes(b)))
        }
        Opcode::FirmwareChunk => {
            let b = fixed::<2>(expected, payload)?;
            Ok(Response::FirmwareChunkAck {
                seq: u16::from_be_bytes(b),
            })
        }
        _ => {
            fixed::<0>(expected, payload)?;
            Ok(Response::Ack)
        }
    }
}

fn fixed<const N: usize>(op: Opcode, payload: &[u8]) -> Result<[u8; N]> {
    payload.try_into().map_err(|_| {
        BeepconError::protocol(format!(
            "{op:?} response payload is {} bytes, expected {}",
            payload.len(),
            N
        ))
    })
}

fn decode_text_info(payload: &[u8]) -> Result<Response> {
    if payload.len() < 3 {
        return Err(BeepconError::protocol("text info header truncated"));
    }
    let text_len = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
    let url_len = usize::from(payload[2]);
    let body = &payload[3..];
    if body.len() != text_len + url_len {
        return Err(BeepconError::protocol(format!(
            "text info declares {} bytes, frame carries {}",
            text_len + url_len,
            body.len()
        )));
    }
    let (text, url) = body.split_at(text_len);
    Ok(Response::TextInfo {
        text: utf8("text", text)?,
        url: utf8("url", url)?,
    })
}

fn utf8(field: &str, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| BeepconError::protocol(format!("{field} is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_battery() {
        let response = decode(Opcode::ReadBattery, &[0x10, 0x00, 0x0b, 0xb8]).unwrap();
        assert_eq!(response, Response::Battery { millivolts: 3000 });
        assert!((response.battery_volts().unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_short_and_long_frames() {
        for frame in [&[][..], &[0x10][..], &[0x10, 0x00, 0x0b][..], &[0x10, 0x00, 1, 2, 3][..]] {
            assert!(matches!(
                decode(Opcode::ReadBattery, frame),
                Err(BeepconError::ProtocolError(_))
            ));
        }
    }

    #[test]
    fn test_decode_opcode_mismatch() {
        let err = decode(Opcode::ReadTxRate, &[0x16, 0x00, 3, 0xc5]).unwrap_err();
        assert!(matches!(err, BeepconError::ProtocolError(_)));
    }

    #[test]
    fn test_decode_non_zero_status() {
        assert_eq!(
            decode(Opcode::WriteTxPower, &[0x22, 0x05]),
            Err(BeepconError::DeviceRejected(0x05))
        );
        assert_eq!(
            decode(Opcode::ValidatePassword, &[0x01, 0x01]),
            Err(BeepconError::DeviceRejected(0x01))
        );
    }

    #[test]
    fn test_decode_version() {
        let frame = [0x15, 0x00, 0x12, 0x31, 1, 0, 1, 3, 2, 0x00, 122];
        let Response::Version(version) = decode(Opcode::ReadVersion, &frame).unwrap() else {
            panic!("expected version");
        };
        assert_eq!(version.hardware, VersionPair { major: 1, minor: 2 });
        assert_eq!(version.firmware, VersionPair { major: 3, minor: 1 });
        assert_eq!(version.model_code, 1);
        assert!(!version.quiet_mode);
        assert_eq!(version.stack.to_string(), "01.03.02.0122");
        assert_eq!(version.ota_file_check(), "VC_M001H0102S0103020122F0301");
    }

    #[test]
    fn test_decode_text_info() {
        let frame = [0x13, 0x00, 0x00, 0x02, 0x03, b'h', b'i', b'a', b'/', b'b'];
        assert_eq!(
            decode(Opcode::ReadTextInfo, &frame).unwrap(),
            Response::TextInfo {
                text: "hi".into(),
                url: "a/b".into()
            }
        );

        let truncated = [0x13, 0x00, 0x00, 0x05, 0x00, b'h', b'i'];
        assert!(matches!(
            decode(Opcode::ReadTextInfo, &truncated),
            Err(BeepconError::ProtocolError(_))
        ));

        let bad_utf8 = [0x13, 0x00, 0x00, 0x01, 0x00, 0xff];
        assert!(matches!(
            decode(Opcode::ReadTextInfo, &bad_utf8),
            Err(BeepconError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_decode_identifiers_and_power() {
        let frame = [0x14, 0x00, 0x00, 0x07, 0x01, 0x00, 1, 2, 3, 4, 5, 6];
        assert_eq!(
            decode(Opcode::ReadIdentifiers, &frame).unwrap(),
            Response::Identifiers {
                major: 7,
                minor: 256,
                mac: [1, 2, 3, 4, 5, 6]
            }
        );
        assert_eq!(
            decode(Opcode::ReadTxPower, &[0x16, 0x00, 3, 0xc5]).unwrap(),
            Response::TxPower {
                index: 3,
                db_at_1m: -59
            }
        );
    }

    #[test]
    fn test_write_ack_must_be_bare() {
        assert_eq!(
            decode(Opcode::WriteQuietMode, &[0x29, 0x00]).unwrap(),
            Response::Ack
        );
        assert!(decode(Opcode::WriteQuietMode, &[0x29, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_decode_password_accepted() {
        let frame = [0x01, 0x00, 20, 16, 4, 7, 9, 60, 10, 120, 4, 0xe2];
        let Response::PasswordAccepted(limits) = decode(Opcode::ValidatePassword, &frame).unwrap()
        else {
            panic!("expected limits");
        };
        assert_eq!(limits.max_tx_power, 7);
        assert_eq!(limits.min_power_db1m, -30);
    }
}
