use uuid::Uuid;

use crate::error::BeepconError;
use crate::stats::AggregationTick;

/// Platform-assigned device handle.
///
/// The platform may hand out a different identifier for the same physical
/// beepcon across scan sessions, so this is only ever a registry key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields decoded from one advertisement. Any of them may be missing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdvertisementReport {
    pub name: Option<String>,
    pub rssi: Option<i32>,
    pub tx_power: Option<i32>,
    pub major: Option<u16>,
    pub minor: Option<u16>,
    pub service_uuid: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProximityLabel {
    VeryClose,
    Close,
    Far,
    Unknown,
}

/// Lost power at or above this is "very close".
pub const VERY_CLOSE_LOST_POWER_DB: i32 = -10;

/// Lost power at or above this (and below very close) is "close".
pub const CLOSE_LOST_POWER_DB: i32 = -25;

/// Classify the attenuation between declared tx power and measured mean RSSI.
pub fn proximity_for_lost_power(lost_power: i32) -> ProximityLabel {
    if lost_power >= VERY_CLOSE_LOST_POWER_DB {
        ProximityLabel::VeryClose
    } else if lost_power >= CLOSE_LOST_POWER_DB {
        ProximityLabel::Close
    } else {
        ProximityLabel::Far
    }
}

/// One record per identifier seen during the current scan.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredDevice {
    pub identifier: DeviceId,
    pub name: Option<String>,
    /// Running mean of every valid RSSI since the record was created (dBm)
    pub mean_rssi: Option<i32>,
    /// Declared power at 1 m (dBm)
    pub tx_power: Option<i32>,
    pub major: Option<u16>,
    pub minor: Option<u16>,
    pub broadcast_count: u32,
    pub retry_count: u32,
    pub last_error: Option<BeepconError>,
    pub all_fields_received: bool,
    pub last_seen_at_ms: u64,
    pub last_computed: Option<AggregationTick>,
    pub(crate) rssi_sum: i64,
    pub(crate) rssi_count: u32,
}

impl DiscoveredDevice {
    pub fn new(identifier: DeviceId, first_seen_at_ms: u64) -> Self {
        Self {
            identifier,
            name: None,
            mean_rssi: None,
            tx_power: None,
            major: None,
            minor: None,
            broadcast_count: 0,
            retry_count: 0,
            last_error: None,
            all_fields_received: false,
            last_seen_at_ms: first_seen_at_ms,
            last_computed: None,
            rssi_sum: 0,
            rssi_count: 0,
        }
    }

    /// `mean_rssi - tx_power` when both are known.
    pub fn lost_power(&self) -> Option<i32> {
        match (self.mean_rssi, self.tx_power) {
            (Some(mean), Some(tx)) => Some(mean - tx),
            _ => None,
        }
    }

    pub fn proximity(&self) -> ProximityLabel {
        self.lost_power()
            .map(proximity_for_lost_power)
            .unwrap_or(ProximityLabel::Unknown)
    }

    pub(crate) fn record_rssi(&mut self, rssi: i32) {
        self.rssi_sum += i64::from(rssi);
        self.rssi_count += 1;
        let mean = self.rssi_sum as f64 / f64::from(self.rssi_count);
        self.mean_rssi = Some(mean.round() as i32);
    }

    pub(crate) fn refresh_completeness(&mut self) {
        self.all_fields_received = self.name.is_some()
            && self.tx_power.is_some()
            && self.major.is_some()
            && self.minor.is_some()
            && self.mean_rssi.is_some();
    }
}
