//! Firmware image naming and the chunked upload cursor.
//!
//! Image files are named `VC_M<model:3>H<hw:4>S<stack:10>F<fw:4>.ota`. An `X`
//! in place of `S` marks an image that carries its own stack, which then
//! installs over any stack version.

use nom::{
    bytes::complete::{tag, tag_no_case, take_while_m_n},
    character::complete::one_of,
    combinator::eof,
    error::{Error as NomError, ErrorKind},
    IResult,
};

use crate::error::{BeepconError, Result};
use crate::protocol::{Command, StackVersion, VersionInfo, VersionPair, MAX_CHUNK_PAYLOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareDescriptor {
    pub model_code: u16,
    pub hardware_version: VersionPair,
    pub stack_version: StackVersion,
    /// `X` marker: the image brings its own stack
    pub stack_included: bool,
    pub firmware_version: VersionPair,
}

/// Parse an image file name.
pub fn parse_firmware_name(name: &str) -> Result<FirmwareDescriptor> {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match descriptor(file) {
        Ok((_, descriptor)) => Ok(descriptor),
        Err(_) => Err(BeepconError::invalid(format!(
            "firmware file name '{file}' does not match VC_MdddHddddSddddddddddFdddd.ota"
        ))),
    }
}

/// Check that an image can be installed on a device reporting `version`.
pub fn check_compatibility(descriptor: &FirmwareDescriptor, version: &VersionInfo) -> Result<()> {
    if descriptor.model_code != u16::from(version.model_code) {
        return Err(BeepconError::IncompatibleFirmware(format!(
            "image is for model {:03}, device is model {:03}",
            descriptor.model_code, version.model_code
        )));
    }
    if descriptor.hardware_version != version.hardware {
        return Err(BeepconError::IncompatibleFirmware(format!(
            "image is for hardware {:02}.{:02}, device is {:02}.{:02}",
            descriptor.hardware_version.major,
            descriptor.hardware_version.minor,
            version.hardware.major,
            version.hardware.minor
        )));
    }
    if !descriptor.stack_included && descriptor.stack_version != version.stack {
        return Err(BeepconError::IncompatibleFirmware(format!(
            "image needs stack {}, device runs {}",
            descriptor.stack_version, version.stack
        )));
    }
    Ok(())
}

/// Parse `filename` and check it against `version` in one step.
pub fn check_firmware_compatibility(
    filename: &str,
    version: &VersionInfo,
) -> Result<FirmwareDescriptor> {
    let descriptor = parse_firmware_name(filename)?;
    check_compatibility(&descriptor, version)?;
    Ok(descriptor)
}

fn number<T: std::str::FromStr>(input: &str, width: usize) -> IResult<&str, T> {
    let (rest, digits) = take_while_m_n(width, width, |c: char| c.is_ascii_digit())(input)?;
    let value = digits
        .parse::<T>()
        .map_err(|_| nom::Err::Error(NomError::new(input, ErrorKind::Digit)))?;
    Ok((rest, value))
}

fn version_pair(input: &str) -> IResult<&str, VersionPair> {
    let (input, major) = number(input, 2)?;
    let (input, minor) = number(input, 2)?;
    Ok((input, VersionPair { major, minor }))
}

fn descriptor(input: &str) -> IResult<&str, FirmwareDescriptor> {
    let (input, _) = tag("VC_M")(input)?;
    let (input, model_code) = number::<u16>(input, 3)?;
    let (input, _) = tag("H")(input)?;
    let (input, hardware_version) = version_pair(input)?;

    let (input, marker) = one_of("SX")(input)?;
    let (input, major) = number(input, 2)?;
    let (input, minor) = number(input, 2)?;
    let (input, patch) = number(input, 2)?;
    let (input, build) = number(input, 4)?;

    let (input, _) = tag("F")(input)?;
    let (input, firmware_version) = version_pair(input)?;
    let (input, _) = tag_no_case(".ota")(input)?;
    let (input, _) = eof(input)?;

    Ok((
        input,
        FirmwareDescriptor {
            model_code,
            hardware_version,
            stack_version: StackVersion {
                major,
                minor,
                patch,
                build,
            },
            stack_included: marker == 'X',
            firmware_version,
        },
    ))
}

/// Upload cursor: hands out one chunk at a time and waits for its ack.
#[derive(Debug, Clone)]
pub struct FirmwareTransfer {
    image: Vec<u8>,
    descriptor: FirmwareDescriptor,
    chunk_size: usize,
    next_offset: usize,
    next_seq: u16,
    acked_bytes: usize,
    in_flight: Option<(u16, usize)>,
}

impl FirmwareTransfer {
    pub fn new(image: Vec<u8>, descriptor: FirmwareDescriptor, chunk_size: usize) -> Result<Self> {
        if image.is_empty() {
            return Err(BeepconError::invalid("firmware image is empty"));
        }
        if chunk_size == 0 || chunk_size > MAX_CHUNK_PAYLOAD {
            return Err(BeepconError::invalid(format!(
                "chunk size {chunk_size} outside 1..={MAX_CHUNK_PAYLOAD}"
            )));
        }
        if u32::try_from(image.len()).is_err() {
            return Err(BeepconError::invalid("firmware image too large"));
        }
        let chunks = image.len().div_ceil(chunk_size);
        if chunks > usize::from(u16::MAX) + 1 {
            return Err(BeepconError::invalid(format!(
                "firmware image needs {chunks} chunks, sequence numbers run out at 65536"
            )));
        }
        Ok(Self {
            image,
            descriptor,
            chunk_size,
            next_offset: 0,
            next_seq: 0,
            acked_bytes: 0,
            in_flight: None,
        })
    }

    pub fn descriptor(&self) -> &FirmwareDescriptor {
        &self.descriptor
    }

    pub fn total_len(&self) -> u32 {
        self.image.len() as u32
    }

    pub fn begin_command(&self) -> Command {
        Command::FirmwareBegin {
            total_len: self.total_len(),
        }
    }

    /// Next chunk to send, or `None` once every byte has been handed out.
    pub fn next_chunk(&mut self) -> Option<Command> {
        if self.in_flight.is_some() || self.next_offset >= self.image.len() {
            return None;
        }
        let end = (self.next_offset + self.chunk_size).min(self.image.len());
        let data = self.image[self.next_offset..end].to_vec();
        let seq = self.next_seq;
        self.in_flight = Some((seq, data.len()));
        self.next_offset = end;
        self.next_seq = self.next_seq.wrapping_add(1);
        Some(Command::FirmwareChunk { seq, data })
    }

    /// Record the device's ack for the in-flight chunk and return the new percentage.
    pub fn acknowledge(&mut self, seq: u16) -> Result<u8> {
        match self.in_flight {
            Some((expected, len)) if expected == seq => {
                self.acked_bytes += len;
                self.in_flight = None;
                Ok(self.percent())
            }
            Some((expected, _)) => Err(BeepconError::protocol(format!(
                "chunk ack for sequence {seq}, expected {expected}"
            ))),
            None => Err(BeepconError::protocol(format!(
                "chunk ack for sequence {seq} with no chunk outstanding"
            ))),
        }
    }

    pub fn percent(&self) -> u8 {
        (self.acked_bytes * 100 / self.image.len()) as u8
    }

    /// Every chunk has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.acked_bytes == self.image.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_version() -> VersionInfo {
        VersionInfo {
            hardware: VersionPair { major: 1, minor: 2 },
            firmware: VersionPair { major: 3, minor: 0 },
            stack: StackVersion {
                major: 1,
                minor: 3,
                patch: 2,
                build: 122,
            },
            model_code: 1,
            quiet_mode: false,
        }
    }

    #[test]
    fn test_parse_firmware_name() {
        let d = parse_firmware_name("VC_M001H0102S0103020122F0301.ota").unwrap();
        assert_eq!(d.model_code, 1);
        assert_eq!(d.hardware_version, VersionPair { major: 1, minor: 2 });
        assert_eq!(d.stack_version.to_string(), "01.03.02.0122");
        assert!(!d.stack_included);
        assert_eq!(d.firmware_version, VersionPair { major: 3, minor: 1 });
    }

    #[test]
    fn test_parse_strips_directories() {
        let d = parse_firmware_name("/var/mobile/updates/VC_M002H0100X0200000001F0100.OTA").unwrap();
        assert_eq!(d.model_code, 2);
        assert!(d.stack_included);
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for name in [
            "",
            "VC_M001H0102S0103020122F0301",
            "VC_M01H0102S0103020122F0301.ota",
            "VC_M001H0102Z0103020122F0301.ota",
            "VC_M001H0102S0103020122F0301.ota.bak",
            "XX_M001H0102S0103020122F0301.ota",
        ] {
            assert!(
                matches!(parse_firmware_name(name), Err(BeepconError::InvalidArgument(_))),
                "accepted {name}"
            );
        }
    }

    #[test]
    fn test_compatible_image() {
        let d = check_firmware_compatibility("VC_M001H0102S0103020122F0301.ota", &device_version())
            .unwrap();
        assert_eq!(d.firmware_version.major, 3);
    }

    #[test]
    fn test_incompatible_images() {
        let version = device_version();
        for name in [
            "VC_M002H0102S0103020122F0301.ota",
            "VC_M001H0103S0103020122F0301.ota",
            "VC_M001H0102S0103020123F0301.ota",
        ] {
            assert!(matches!(
                check_firmware_compatibility(name, &version),
                Err(BeepconError::IncompatibleFirmware(_))
            ));
        }
        assert!(check_firmware_compatibility("VC_M001H0102X9999999999F0301.ota", &version).is_ok());
    }

    #[test]
    fn test_ota_file_check_round_trips_through_parser() {
        let version = device_version();
        let d = parse_firmware_name(&format!("{}.ota", version.ota_file_check())).unwrap();
        assert!(check_compatibility(&d, &version).is_ok());
    }

    #[test]
    fn test_transfer_chunks_and_progress() {
        let descriptor = parse_firmware_name("VC_M001H0102S0103020122F0301.ota").unwrap();
        let mut transfer = FirmwareTransfer::new((0u8..40).collect(), descriptor, 16).unwrap();
        assert_eq!(transfer.begin_command(), Command::FirmwareBegin { total_len: 40 });

        let Some(Command::FirmwareChunk { seq, data }) = transfer.next_chunk() else {
            panic!("expected a chunk");
        };
        assert_eq!((seq, data.len()), (0, 16));
        assert!(transfer.next_chunk().is_none(), "one chunk in flight at a time");
        assert_eq!(transfer.acknowledge(0).unwrap(), 40);

        transfer.next_chunk();
        assert!(matches!(transfer.acknowledge(5), Err(BeepconError::ProtocolError(_))));
        assert_eq!(transfer.acknowledge(1).unwrap(), 80);

        let Some(Command::FirmwareChunk { seq, data }) = transfer.next_chunk() else {
            panic!("expected the tail chunk");
        };
        assert_eq!((seq, data), (2, (32u8..40).collect::<Vec<_>>()));
        assert!(!transfer.is_complete());
        assert_eq!(transfer.acknowledge(2).unwrap(), 100);
        assert!(transfer.is_complete());
        assert!(transfer.next_chunk().is_none());
    }

    #[test]
    fn test_transfer_rejects_empty_image() {
        let descriptor = parse_firmware_name("VC_M001H0102S0103020122F0301.ota").unwrap();
        assert!(matches!(
            FirmwareTransfer::new(Vec::new(), descriptor, 16),
            Err(BeepconError::InvalidArgument(_))
        ));
        assert!(FirmwareTransfer::new(vec![1], descriptor, 0).is_err());
    }
}
