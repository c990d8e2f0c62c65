//! Scan lifecycle and periodic aggregation.
//!
//! The session does not own a timer. The host calls [`ScanSession::poll`]
//! as often as it likes; a tick fires once the configured interval elapsed.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::ble::ScanTransport;
use crate::config::ScanConfig;
use crate::error::{BeepconError, Result};
use crate::models::{AdvertisementReport, DeviceId};
use crate::registry::DeviceRegistry;
use crate::stats::AggregationTick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started,
    Stopped,
    /// One accepted advertisement, before aggregation
    Broadcast {
        device: DeviceId,
        report: AdvertisementReport,
        mean_rssi: Option<i32>,
        broadcast_count: u32,
    },
    Aggregated {
        device: DeviceId,
        tick: AggregationTick,
    },
    Failed(BeepconError),
}

#[derive(Debug)]
pub struct ScanSession {
    state: ScanState,
    config: Option<ScanConfig>,
    registry: DeviceRegistry,
    next_tick_ms: Option<u64>,
    events: VecDeque<ScanEvent>,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            state: ScanState::Idle,
            config: None,
            registry: DeviceRegistry::default(),
            next_tick_ms: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.state == ScanState::Scanning
    }

    /// Active configuration; `None` while idle.
    pub fn config(&self) -> Option<&ScanConfig> {
        self.config.as_ref()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    pub fn drain_events(&mut self) -> Vec<ScanEvent> {
        self.events.drain(..).collect()
    }

    /// Begin scanning. `link_busy` reports whether a command session is mid-command.
    pub fn start<T: ScanTransport + ?Sized>(
        &mut self,
        config: ScanConfig,
        link_busy: bool,
        transport: &mut T,
        now_ms: u64,
    ) -> Result<()> {
        if self.is_scanning() || link_busy {
            return Err(BeepconError::AlreadyInProgress);
        }
        if let Err(err) = config.validate() {
            return Err(self.failed(err));
        }
        if !transport.is_available() {
            return Err(self.failed(BeepconError::TransportUnavailable(
                "radio is off or not authorized".to_string(),
            )));
        }

        self.registry.reset(config.window_capacity);
        if let Err(err) = transport.start_scan(config.target_uuid) {
            return Err(self.failed(err.into()));
        }

        info!(
            uuid = %config.target_uuid,
            major = ?config.major_filter,
            minor = ?config.minor_filter,
            tick_ds = ?config.tick_interval_deciseconds,
            "scan started"
        );
        self.next_tick_ms = config.tick_interval_ms().map(|i| now_ms.saturating_add(i));
        self.config = Some(config);
        self.state = ScanState::Scanning;
        self.events.push_back(ScanEvent::Started);
        Ok(())
    }

    /// Feed one advertisement. Returns whether it passed the filters.
    pub fn on_advertisement(
        &mut self,
        device: &DeviceId,
        report: AdvertisementReport,
        now_ms: u64,
    ) -> bool {
        let Some(config) = self.config.as_ref().filter(|_| self.is_scanning()) else {
            return false;
        };
        if let Some(uuid) = report.service_uuid {
            if uuid != config.target_uuid {
                debug!(device = %device, %uuid, "advertisement for another service dropped");
                return false;
            }
        }
        if config.major_filter.is_some() && report.major != config.major_filter {
            debug!(device = %device, major = ?report.major, "major filter rejected advertisement");
            return false;
        }
        if config.minor_filter.is_some() && report.minor != config.minor_filter {
            debug!(device = %device, minor = ?report.minor, "minor filter rejected advertisement");
            return false;
        }
        let report_each = config.report_each_broadcast;

        let merged = self.registry.merge(device, &report, now_ms);
        if report_each {
            let event = ScanEvent::Broadcast {
                device: device.clone(),
                mean_rssi: merged.mean_rssi,
                broadcast_count: merged.broadcast_count,
                report,
            };
            self.events.push_back(event);
        }
        true
    }

    /// Emit one round of ticks if the interval elapsed.
    pub fn poll(&mut self, now_ms: u64) {
        if !self.is_scanning() {
            return;
        }
        let (Some(config), Some(due)) = (self.config.as_ref(), self.next_tick_ms) else {
            return;
        };
        if now_ms < due {
            return;
        }
        let Some(interval) = config.tick_interval_ms() else {
            return;
        };
        let (remove_outliers, exponent) = (config.remove_outliers, config.path_loss_exponent);

        self.emit_aggregation(remove_outliers, exponent);
        self.next_tick_ms = Some(now_ms.saturating_add(interval));
    }

    /// Stop scanning. Without ticking, the final aggregation is emitted here.
    pub fn stop<T: ScanTransport + ?Sized>(&mut self, transport: &mut T) {
        if !self.is_scanning() {
            debug!("stop requested while idle");
            return;
        }
        if let Err(err) = transport.stop_scan() {
            warn!(%err, "transport failed to stop scanning");
        }

        if let Some(config) = self.config.take() {
            if config.tick_interval_deciseconds.is_none() {
                self.emit_aggregation(config.remove_outliers, config.path_loss_exponent);
            }
        }
        self.next_tick_ms = None;
        self.state = ScanState::Idle;
        info!(devices = self.registry.len(), "scan stopped");
        self.events.push_back(ScanEvent::Stopped);
    }

    /// Re-issue the scan request without touching collected data.
    pub fn refresh<T: ScanTransport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        let Some(uuid) = self.config.as_ref().map(|c| c.target_uuid) else {
            debug!("refresh requested while idle");
            return Ok(());
        };
        if let Err(err) = transport.start_scan(uuid) {
            return Err(self.failed(err.into()));
        }
        debug!(%uuid, "scan refreshed");
        self.events.push_back(ScanEvent::Started);
        Ok(())
    }

    /// The radio went away under an active scan.
    pub fn on_radio_lost(&mut self) {
        if !self.is_scanning() {
            return;
        }
        warn!("radio became unavailable during scan");
        self.config = None;
        self.next_tick_ms = None;
        self.state = ScanState::Idle;
        self.failed(BeepconError::TransportUnavailable(
            "radio is off or not authorized".to_string(),
        ));
    }

    fn emit_aggregation(&mut self, remove_outliers: bool, path_loss_exponent: f64) {
        let ticks = self.registry.aggregate_all(remove_outliers, path_loss_exponent);
        debug!(devices = ticks.len(), "aggregation tick");
        self.events.extend(
            ticks
                .into_iter()
                .map(|(device, tick)| ScanEvent::Aggregated { device, tick }),
        );
    }

    fn failed(&mut self, err: BeepconError) -> BeepconError {
        warn!(%err, "scan failure");
        self.events.push_back(ScanEvent::Failed(err.clone()));
        err
    }
}
