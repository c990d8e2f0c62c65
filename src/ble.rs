use thiserror::Error;
use uuid::Uuid;

use crate::error::BeepconError;
use crate::models::DeviceId;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth permission denied")]
    PermissionDenied,
    #[error("bluetooth is off")]
    BluetoothOff,
    #[error("device not found")]
    DeviceNotFound,
    #[error("connection failed")]
    ConnectionFailed,
    #[error("GATT error")]
    GattError,
    #[error("transport timed out")]
    Timeout,
    #[error("unknown transport error")]
    Unknown,
}

impl From<TransportError> for BeepconError {
    fn from(err: TransportError) -> Self {
        BeepconError::TransportUnavailable(err.to_string())
    }
}

/// Radio side used by the scan engine. Advertisements come back through
/// `ScanSession::on_advertisement`.
pub trait ScanTransport {
    fn start_scan(&mut self, service_uuid: Uuid) -> Result<(), TransportError>;
    fn stop_scan(&mut self) -> Result<(), TransportError>;
    /// Radio powered and authorized.
    fn is_available(&self) -> bool;
}

/// Exclusive command channel to one device. Responses come back through
/// `ConnectionSession::on_notification`, link changes through
/// `on_connection_established` / `on_connection_lost`.
pub trait LinkTransport {
    fn connect(&mut self, device: &DeviceId) -> Result<(), TransportError>;
    fn disconnect(&mut self) -> Result<(), TransportError>;
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Both halves, as owned by the manager.
pub trait Transport: ScanTransport + LinkTransport {}

impl<T: ScanTransport + LinkTransport> Transport for T {}
