//! Facade over one transport, one scan and one command session.
//!
//! Hosts own a single `Manager` and route every transport callback into it.
//! Events from both state machines come out of [`Manager::drain_events`] in
//! the order they were produced.

use std::collections::VecDeque;

use tracing::{info, warn};

use crate::ble::{Transport, TransportError};
use crate::config::{ScanConfig, SessionConfig};
use crate::error::Result;
use crate::firmware::FirmwareDescriptor;
use crate::models::{AdvertisementReport, DeviceId, DiscoveredDevice};
use crate::protocol::Command;
use crate::scan::{ScanEvent, ScanSession};
use crate::session::{ConnectionEvent, ConnectionSession};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Scan(ScanEvent),
    Connection(ConnectionEvent),
    /// Radio power or permission changed
    AuthorizationChanged { available: bool },
}

pub struct Manager<T: Transport> {
    transport: T,
    scan: ScanSession,
    session: ConnectionSession,
    transport_available: bool,
    events: VecDeque<Event>,
}

impl<T: Transport> Manager<T> {
    /// Fails when `session_config` does not validate.
    pub fn new(transport: T, session_config: SessionConfig) -> Result<Self> {
        let session = ConnectionSession::new(session_config)?;
        let transport_available = transport.is_available();
        Ok(Self {
            transport,
            scan: ScanSession::new(),
            session,
            transport_available,
            events: VecDeque::new(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn scan(&self) -> &ScanSession {
        &self.scan
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn start_scan(&mut self, config: ScanConfig, now_ms: u64) -> Result<()> {
        let result = self
            .scan
            .start(config, self.session.is_busy(), &mut self.transport, now_ms);
        self.collect();
        result
    }

    pub fn stop_scan(&mut self) {
        self.scan.stop(&mut self.transport);
        self.collect();
    }

    pub fn refresh_scan(&mut self) -> Result<()> {
        let result = self.scan.refresh(&mut self.transport);
        self.collect();
        result
    }

    pub fn connect(&mut self, device: DeviceId, password: Option<String>, now_ms: u64) -> Result<()> {
        if self.scan.is_scanning() {
            warn!(device = %device, "connecting while scanning, response timing may suffer");
        }
        let result = self
            .session
            .connect(device, password, &mut self.transport, now_ms);
        self.collect();
        result
    }

    pub fn disconnect(&mut self) -> Result<()> {
        let result = self.session.disconnect(&mut self.transport);
        self.collect();
        result
    }

    pub fn issue(&mut self, command: Command, now_ms: u64) -> Result<()> {
        let result = self.session.issue(command, &mut self.transport, now_ms);
        self.collect();
        result
    }

    pub fn begin_firmware_update(
        &mut self,
        image: Vec<u8>,
        filename: &str,
        now_ms: u64,
    ) -> Result<()> {
        let result = self
            .session
            .begin_firmware_update(image, filename, &mut self.transport, now_ms);
        self.collect();
        result
    }

    pub fn check_firmware_compatibility(&self, filename: &str) -> Result<FirmwareDescriptor> {
        self.session.check_firmware_compatibility(filename)
    }

    pub fn on_advertisement(&mut self, device: &DeviceId, report: AdvertisementReport, now_ms: u64) {
        self.scan.on_advertisement(device, report, now_ms);
        self.collect();
    }

    pub fn on_connection_established(&mut self, now_ms: u64) {
        self.session
            .on_connection_established(&mut self.transport, now_ms);
        self.collect();
    }

    pub fn on_connection_lost(&mut self, reason: Option<TransportError>) {
        self.session.on_connection_lost(reason);
        self.collect();
    }

    pub fn on_notification(&mut self, frame: &[u8], now_ms: u64) {
        self.session
            .on_notification(frame, &mut self.transport, now_ms);
        self.collect();
    }

    pub fn on_transport_state(&mut self, available: bool) {
        if available == self.transport_available {
            return;
        }
        info!(available, "transport availability changed");
        self.transport_available = available;
        self.events
            .push_back(Event::AuthorizationChanged { available });
        if !available {
            self.scan.on_radio_lost();
        }
        self.collect();
    }

    /// Drive both state machines' timers.
    pub fn poll(&mut self, now_ms: u64) {
        self.scan.poll(now_ms);
        self.session.poll(&mut self.transport, now_ms);
        self.collect();
    }

    pub fn tracked_identifiers(&self) -> Vec<DeviceId> {
        self.scan.registry().identifiers()
    }

    pub fn discovered_devices(&self, only_complete: bool) -> Vec<DiscoveredDevice> {
        self.scan.registry().list_all(only_complete)
    }

    pub fn discovered_devices_with_age(
        &mut self,
        only_complete: bool,
        max_age_seconds: u64,
        flush_stale: bool,
        now_ms: u64,
    ) -> Vec<DiscoveredDevice> {
        self.scan
            .registry_mut()
            .list_all_with_age(only_complete, max_age_seconds, flush_stale, now_ms)
    }

    pub fn is_in_process(&self) -> bool {
        self.session.is_in_process()
    }

    pub fn transport_available(&self) -> bool {
        self.transport_available
    }

    fn collect(&mut self) {
        for event in self.scan.drain_events() {
            self.events.push_back(Event::Scan(event));
        }
        for event in self.session.drain_events() {
            if let ConnectionEvent::Failure { device, error } = &event {
                self.scan.registry_mut().note_failure(device, error.clone());
            }
            self.events.push_back(Event::Connection(event));
        }
    }
}
