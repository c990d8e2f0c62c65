use uuid::Uuid;

use crate::ble::{LinkTransport, ScanTransport, TransportError};
use crate::models::DeviceId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCall {
    StartScan(Uuid),
    StopScan,
    Connect(DeviceId),
    Disconnect,
    Write(Vec<u8>),
}

/// In-memory transport that records every call.
///
/// Set one of the `fail_*` fields to make the next matching call fail once.
#[derive(Clone, Debug)]
pub struct MockTransport {
    pub available: bool,
    pub calls: Vec<TransportCall>,
    pub fail_start_scan: Option<TransportError>,
    pub fail_connect: Option<TransportError>,
    pub fail_write: Option<TransportError>,
    pub fail_disconnect: Option<TransportError>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            available: true,
            calls: Vec::new(),
            fail_start_scan: None,
            fail_connect: None,
            fail_write: None,
            fail_disconnect: None,
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn powered_off() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    /// Frames written so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Write(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.writes().pop()
    }

    pub fn count(&self, probe: fn(&TransportCall) -> bool) -> usize {
        self.calls.iter().filter(|c| probe(c)).count()
    }
}

impl ScanTransport for MockTransport {
    fn start_scan(&mut self, service_uuid: Uuid) -> Result<(), TransportError> {
        if !self.available {
            return Err(TransportError::BluetoothOff);
        }
        if let Some(err) = self.fail_start_scan.take() {
            return Err(err);
        }
        self.calls.push(TransportCall::StartScan(service_uuid));
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.calls.push(TransportCall::StopScan);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

impl LinkTransport for MockTransport {
    fn connect(&mut self, device: &DeviceId) -> Result<(), TransportError> {
        if !self.available {
            return Err(TransportError::BluetoothOff);
        }
        if let Some(err) = self.fail_connect.take() {
            return Err(err);
        }
        self.calls.push(TransportCall::Connect(device.clone()));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(err) = self.fail_disconnect.take() {
            return Err(err);
        }
        self.calls.push(TransportCall::Disconnect);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if let Some(err) = self.fail_write.take() {
            return Err(err);
        }
        self.calls.push(TransportCall::Write(frame.to_vec()));
        Ok(())
    }
}
