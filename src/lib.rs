pub mod ble;
pub mod ble_mock;
pub mod config;
pub mod error;
pub mod firmware;
pub mod manager;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod scan;
pub mod session;
pub mod stats;
pub mod window;

uniffi::include_scaffolding!("beepcon");

pub use ble::{LinkTransport, ScanTransport, Transport, TransportError};
pub use config::{InvalidPasswordPolicy, ScanConfig, SessionConfig};
pub use error::BeepconError;
pub use firmware::{
    check_compatibility, check_firmware_compatibility, parse_firmware_name, FirmwareDescriptor,
    FirmwareTransfer,
};
pub use manager::{Event, Manager};
pub use models::{
    proximity_for_lost_power, AdvertisementReport, DeviceId, DiscoveredDevice, ProximityLabel,
};
pub use protocol::{
    CapabilityLimits, Command, Opcode, Response, StackVersion, TxPattern, VersionInfo, VersionPair,
};
pub use registry::DeviceRegistry;
pub use scan::{ScanEvent, ScanSession, ScanState};
pub use session::{ConnectionEvent, ConnectionSession, ConnectionState, TerminationReason};
pub use stats::{aggregate_samples, pseudo_distance, pseudo_distance_error, AggregationTick};
pub use window::{RssiSample, SampleWindow};
