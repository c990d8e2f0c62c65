use uuid::Uuid;

use crate::error::{BeepconError, Result};
use crate::protocol::{
    CapabilityLimits, Opcode, MAX_BUZZ_SOUND, MAX_CHUNK_PAYLOAD, MAX_DESCRIPTION_LEN,
    MAX_LED_SECONDS, MAX_URL_LEN,
};

/// Seconds spent on each broadcast format, in the order the device cycles them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxPattern {
    pub ibeacon: u8,
    pub beepcon: u8,
    pub eddystone_uid: u8,
    pub eddystone_url: u8,
    pub eddystone_tlm: u8,
    /// Configurable window after boot
    pub config_time: u8,
}

impl TxPattern {
    pub const WIRE_LEN: usize = 6;

    pub fn broadcast_total(&self) -> u32 {
        [
            self.ibeacon,
            self.beepcon,
            self.eddystone_uid,
            self.eddystone_url,
            self.eddystone_tlm,
        ]
        .iter()
        .map(|&s| u32::from(s))
        .sum()
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        [
            self.ibeacon,
            self.beepcon,
            self.eddystone_uid,
            self.eddystone_url,
            self.eddystone_tlm,
            self.config_time,
        ]
    }

    pub fn from_bytes(b: [u8; Self::WIRE_LEN]) -> Self {
        Self {
            ibeacon: b[0],
            beepcon: b[1],
            eddystone_uid: b[2],
            eddystone_url: b[3],
            eddystone_tlm: b[4],
            config_time: b[5],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ValidatePassword(String),
    ReadBattery,
    Buzz { sound: u8 },
    LightLed { seconds: u8 },
    ReadTextInfo,
    ReadIdentifiers,
    ReadVersion,
    ReadTxPower,
    ReadTxRate,
    ReadTxPattern,
    ResetPasswordToFactory,
    WriteTextInfo {
        name: String,
        description: String,
        url: String,
    },
    WriteIdentifiers { major: u16, minor: u16 },
    WriteTxPower(u8),
    WriteTxRate(u8),
    WriteUuid(Uuid),
    WriteTxPattern(TxPattern),
    WritePassword(String),
    /// Measured power at 1 m (dBm)
    WriteTxCalibration(i8),
    ResetFactoryCalibration,
    WriteQuietMode(bool),
    FirmwareBegin { total_len: u32 },
    FirmwareChunk { seq: u16, data: Vec<u8> },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::ValidatePassword(_) => Opcode::ValidatePassword,
            Command::ReadBattery => Opcode::ReadBattery,
            Command::Buzz { .. } => Opcode::Buzz,
            Command::LightLed { .. } => Opcode::LightLed,
            Command::ReadTextInfo => Opcode::ReadTextInfo,
            Command::ReadIdentifiers => Opcode::ReadIdentifiers,
            Command::ReadVersion => Opcode::ReadVersion,
            Command::ReadTxPower => Opcode::ReadTxPower,
            Command::ReadTxRate => Opcode::ReadTxRate,
            Command::ReadTxPattern => Opcode::ReadTxPattern,
            Command::ResetPasswordToFactory => Opcode::ResetPasswordToFactory,
            Command::WriteTextInfo { .. } => Opcode::WriteTextInfo,
            Command::WriteIdentifiers { .. } => Opcode::WriteIdentifiers,
            Command::WriteTxPower(_) => Opcode::WriteTxPower,
            Command::WriteTxRate(_) => Opcode::WriteTxRate,
            Command::WriteUuid(_) => Opcode::WriteUuid,
            Command::WriteTxPattern(_) => Opcode::WriteTxPattern,
            Command::WritePassword(_) => Opcode::WritePassword,
            Command::WriteTxCalibration(_) => Opcode::WriteTxCalibration,
            Command::ResetFactoryCalibration => Opcode::ResetFactoryCalibration,
            Command::WriteQuietMode(_) => Opcode::WriteQuietMode,
            Command::FirmwareBegin { .. } => Opcode::FirmwareBegin,
            Command::FirmwareChunk { .. } => Opcode::FirmwareChunk,
        }
    }

    /// Requires a session that validated its password.
    pub fn is_password_gated(&self) -> bool {
        let op = self.opcode();
        op.is_write() || op.is_firmware()
    }

    /// The device reboots, dropping the link, once it acknowledges this command.
    pub fn is_auto_resetting(&self) -> bool {
        self.opcode().is_write()
    }

    /// Sent by the session itself, never through `issue`.
    pub fn is_session_internal(&self) -> bool {
        let op = self.opcode();
        op == Opcode::ValidatePassword || op.is_firmware()
    }

    /// Check arguments against fixed ranges and the device's reported limits.
    pub fn validate(&self, limits: &CapabilityLimits) -> Result<()> {
        match self {
            Command::Buzz { sound } if *sound > MAX_BUZZ_SOUND => Err(BeepconError::invalid(
                format!("buzz sound {sound} above maximum {MAX_BUZZ_SOUND}"),
            )),
            Command::LightLed { seconds } if *seconds > MAX_LED_SECONDS => Err(
                BeepconError::invalid(format!("led time {seconds} s above maximum {MAX_LED_SECONDS}")),
            ),
            Command::WriteTextInfo {
                name,
                description,
                url,
            } => {
                check_max_len("name", name, usize::from(limits.max_name_len))?;
                check_max_len("description", description, MAX_DESCRIPTION_LEN)?;
                check_max_len("url", url, MAX_URL_LEN)
            }
            Command::WriteTxPower(index) if *index > limits.max_tx_power => {
                Err(BeepconError::invalid(format!(
                    "tx power {index} above maximum {}",
                    limits.max_tx_power
                )))
            }
            Command::WriteTxRate(rate) if *rate > limits.max_tx_rate => {
                Err(BeepconError::invalid(format!(
                    "tx rate {rate} above maximum {}",
                    limits.max_tx_rate
                )))
            }
            Command::WritePassword(password) => {
                let len = password.len();
                let (min, max) = (
                    usize::from(limits.min_password_len),
                    usize::from(limits.max_password_len),
                );
                if len < min || len > max {
                    return Err(BeepconError::invalid(format!(
                        "password length {len} outside {min}..={max}"
                    )));
                }
                Ok(())
            }
            Command::ValidatePassword(password) => {
                check_max_len("password", password, usize::from(u8::MAX))
            }
            Command::WriteTxCalibration(db) => {
                if *db < limits.min_power_db1m || *db > limits.max_power_db1m {
                    return Err(BeepconError::invalid(format!(
                        "calibration {db} dBm outside {}..={}",
                        limits.min_power_db1m, limits.max_power_db1m
                    )));
                }
                Ok(())
            }
            Command::WriteTxPattern(pattern) => {
                let total = pattern.broadcast_total();
                if total == 0 {
                    return Err(BeepconError::invalid("tx pattern broadcasts nothing"));
                }
                if total > u32::from(limits.max_pattern_time) {
                    return Err(BeepconError::invalid(format!(
                        "tx pattern total {total} s above maximum {}",
                        limits.max_pattern_time
                    )));
                }
                if pattern.config_time < limits.min_config_time
                    || pattern.config_time > limits.max_config_time
                {
                    return Err(BeepconError::invalid(format!(
                        "config time {} s outside {}..={}",
                        pattern.config_time, limits.min_config_time, limits.max_config_time
                    )));
                }
                Ok(())
            }
            Command::FirmwareChunk { data, .. } => {
                if data.is_empty() || data.len() > MAX_CHUNK_PAYLOAD {
                    return Err(BeepconError::invalid(format!(
                        "firmware chunk of {} bytes outside 1..={MAX_CHUNK_PAYLOAD}",
                        data.len()
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Serialize into a request frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut frame = vec![self.opcode().as_byte()];
        match self {
            Command::ValidatePassword(password) | Command::WritePassword(password) => {
                frame.push(len_u8("password", password.len())?);
                frame.extend_from_slice(password.as_bytes());
            }
            Command::Buzz { sound } => frame.push(*sound),
            Command::LightLed { seconds } => frame.push(*seconds),
            Command::WriteTextInfo {
                name,
                description,
                url,
            } => {
                frame.push(len_u8("name", name.len())?);
                let desc_len = u16::try_from(description.len())
                    .map_err(|_| BeepconError::invalid("description too long to encode"))?;
                frame.extend_from_slice(&desc_len.to_be_bytes());
                frame.push(len_u8("url", url.len())?);
                frame.extend_from_slice(name.as_bytes());
                frame.extend_from_slice(description.as_bytes());
                frame.extend_from_slice(url.as_bytes());
            }
            Command::WriteIdentifiers { major, minor } => {
                frame.extend_from_slice(&major.to_be_bytes());
                frame.extend_from_slice(&minor.to_be_bytes());
            }
            Command::WriteTxPower(value) | Command::WriteTxRate(value) => frame.push(*value),
            Command::WriteUuid(uuid) => frame.extend_from_slice(uuid.as_bytes()),
            Command::WriteTxPattern(pattern) => frame.extend_from_slice(&pattern.to_bytes()),
            Command::WriteTxCalibration(db) => frame.push(*db as u8),
            Command::WriteQuietMode(on) => frame.push(u8::from(*on)),
            Command::FirmwareBegin { total_len } => {
                frame.extend_from_slice(&total_len.to_be_bytes())
            }
            Command::FirmwareChunk { seq, data } => {
                frame.extend_from_slice(&seq.to_be_bytes());
                frame.push(len_u8("firmware chunk", data.len())?);
                frame.extend_from_slice(data);
            }
            Command::ReadBattery
            | Command::ReadTextInfo
            | Command::ReadIdentifiers
            | Command::ReadVersion
            | Command::ReadTxPower
            | Command::ReadTxRate
            | Command::ReadTxPattern
            | Command::ResetPasswordToFactory
            | Command::ResetFactoryCalibration => {}
        }
        Ok(frame)
    }
}

fn check_max_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(BeepconError::invalid(format!(
            "{field} is {} bytes, maximum {max}",
            value.len()
        )));
    }
    Ok(())
}

fn len_u8(field: &str, len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| BeepconError::invalid(format!("{field} too long to encode")))
}
