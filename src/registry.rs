//! Discovered devices keyed by platform identifier.
//!
//! Each record owns exactly one [`SampleWindow`]. Records keep the order in
//! which their identifier was first seen; listing never re-sorts them.

use std::collections::HashMap;

use crate::error::BeepconError;
use crate::models::{AdvertisementReport, DeviceId, DiscoveredDevice};
use crate::stats::AggregationTick;
use crate::window::{is_valid_rssi, SampleWindow, DEFAULT_WINDOW_CAPACITY};

#[derive(Debug, Clone)]
struct Track {
    device: DiscoveredDevice,
    window: SampleWindow,
}

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    order: Vec<DeviceId>,
    tracks: HashMap<DeviceId, Track>,
    window_capacity: usize,
    last_updated_ms: Option<u64>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_window_capacity(DEFAULT_WINDOW_CAPACITY)
    }
}

impl DeviceRegistry {
    pub fn with_window_capacity(window_capacity: usize) -> Self {
        Self {
            order: Vec::new(),
            tracks: HashMap::new(),
            window_capacity,
            last_updated_ms: None,
        }
    }

    /// Create or update the record for `identifier` from a partial report.
    ///
    /// Present fields replace stored ones, absent fields keep them. Valid RSSI
    /// feeds both the running mean and the sample window.
    pub fn merge(
        &mut self,
        identifier: &DeviceId,
        report: &AdvertisementReport,
        at_ms: u64,
    ) -> &DiscoveredDevice {
        let capacity = self.window_capacity;
        let order = &mut self.order;
        let track = self.tracks.entry(identifier.clone()).or_insert_with(|| {
            order.push(identifier.clone());
            Track {
                device: DiscoveredDevice::new(identifier.clone(), at_ms),
                window: SampleWindow::with_capacity(capacity),
            }
        });

        let device = &mut track.device;
        if let Some(name) = &report.name {
            device.name = Some(name.clone());
        }
        if let Some(tx_power) = report.tx_power {
            device.tx_power = Some(tx_power);
        }
        if let Some(major) = report.major {
            device.major = Some(major);
        }
        if let Some(minor) = report.minor {
            device.minor = Some(minor);
        }
        if let Some(rssi) = report.rssi.filter(|&r| is_valid_rssi(r)) {
            track.window.push(rssi, at_ms);
            device.record_rssi(rssi);
        }

        device.broadcast_count = device.broadcast_count.saturating_add(1);
        device.last_seen_at_ms = device.last_seen_at_ms.max(at_ms);
        device.refresh_completeness();

        self.last_updated_ms = Some(self.last_updated_ms.map_or(at_ms, |t| t.max(at_ms)));
        &track.device
    }

    /// Every record in insertion order, optionally only the complete ones.
    pub fn list_all(&self, only_complete: bool) -> Vec<DiscoveredDevice> {
        self.ordered()
            .filter(|d| !only_complete || d.all_fields_received)
            .cloned()
            .collect()
    }

    /// As [`list_all`](Self::list_all), skipping records not seen for more
    /// than `max_age_seconds`. With `flush_stale` those records are removed.
    pub fn list_all_with_age(
        &mut self,
        only_complete: bool,
        max_age_seconds: u64,
        flush_stale: bool,
        now_ms: u64,
    ) -> Vec<DiscoveredDevice> {
        let max_age_ms = max_age_seconds.saturating_mul(1000);
        let is_stale = |d: &DiscoveredDevice| now_ms.saturating_sub(d.last_seen_at_ms) > max_age_ms;

        let fresh = self
            .ordered()
            .filter(|d| !is_stale(d))
            .filter(|d| !only_complete || d.all_fields_received)
            .cloned()
            .collect();

        if flush_stale {
            let stale: Vec<DeviceId> = self
                .ordered()
                .filter(|d| is_stale(d))
                .map(|d| d.identifier.clone())
                .collect();
            for id in &stale {
                self.tracks.remove(id);
            }
            self.order.retain(|id| self.tracks.contains_key(id));
        }

        fresh
    }

    pub fn identifiers(&self) -> Vec<DeviceId> {
        self.order.clone()
    }

    pub fn get(&self, identifier: &DeviceId) -> Option<&DiscoveredDevice> {
        self.tracks.get(identifier).map(|t| &t.device)
    }

    pub fn window(&self, identifier: &DeviceId) -> Option<&SampleWindow> {
        self.tracks.get(identifier).map(|t| &t.window)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Timestamp of the most recent merge, `None` before the first one.
    pub fn last_updated_ms(&self) -> Option<u64> {
        self.last_updated_ms
    }

    /// Store `tick` as the device's latest aggregation. False if unknown.
    pub fn record_tick(&mut self, identifier: &DeviceId, tick: AggregationTick) -> bool {
        match self.tracks.get_mut(identifier) {
            Some(track) => {
                track.device.last_computed = Some(tick);
                true
            }
            None => false,
        }
    }

    /// Count a failed connection attempt against the device.
    pub fn note_failure(&mut self, identifier: &DeviceId, error: BeepconError) -> bool {
        match self.tracks.get_mut(identifier) {
            Some(track) => {
                track.device.retry_count = track.device.retry_count.saturating_add(1);
                track.device.last_error = Some(error);
                true
            }
            None => false,
        }
    }

    /// Compute and record one tick per tracked device, in insertion order.
    pub fn aggregate_all(
        &mut self,
        remove_outliers: bool,
        path_loss_exponent: f64,
    ) -> Vec<(DeviceId, AggregationTick)> {
        let mut ticks = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(track) = self.tracks.get_mut(id) {
                let tick = track.window.compute_tick(
                    remove_outliers,
                    path_loss_exponent,
                    track.device.tx_power,
                );
                track.device.last_computed = Some(tick.clone());
                ticks.push((id.clone(), tick));
            }
        }
        ticks
    }

    /// Drop every record and window. New windows use `window_capacity`.
    pub fn reset(&mut self, window_capacity: usize) {
        self.order.clear();
        self.tracks.clear();
        self.window_capacity = window_capacity;
        self.last_updated_ms = None;
    }

    fn ordered(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.order
            .iter()
            .filter_map(|id| self.tracks.get(id))
            .map(|t| &t.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn report(rssi: Option<i32>) -> AdvertisementReport {
        AdvertisementReport {
            rssi,
            ..Default::default()
        }
    }

    fn full_report() -> AdvertisementReport {
        AdvertisementReport {
            name: Some("BEEPCON".to_string()),
            rssi: Some(-70),
            tx_power: Some(-59),
            major: Some(10),
            minor: Some(20),
            service_uuid: None,
        }
    }

    #[test]
    fn test_merge_creates_then_updates() {
        let mut registry = DeviceRegistry::default();
        let id = DeviceId::new("dev-1");

        let device = registry.merge(&id, &full_report(), 1_000);
        assert_eq!(device.broadcast_count, 1);
        assert!(device.all_fields_received);

        let device = registry.merge(&id, &report(Some(-80)), 2_000);
        assert_eq!(device.broadcast_count, 2);
        assert_eq!(device.name.as_deref(), Some("BEEPCON"));
        assert_eq!(device.tx_power, Some(-59));
        assert_eq!(device.mean_rssi, Some(-75));
        assert_eq!(device.last_seen_at_ms, 2_000);
        assert_eq!(registry.window(&id).map(|w| w.len()), Some(2));
    }

    #[test]
    fn test_invalid_rssi_is_counted_as_broadcast_only() {
        let mut registry = DeviceRegistry::default();
        let id = DeviceId::new("dev-1");
        registry.merge(&id, &report(Some(-70)), 0);
        let device = registry.merge(&id, &report(Some(127)), 10);

        assert_eq!(device.broadcast_count, 2);
        assert_eq!(device.mean_rssi, Some(-70));
        assert_eq!(registry.window(&id).map(|w| w.len()), Some(1));
    }

    #[test]
    fn test_last_seen_never_moves_backwards() {
        let mut registry = DeviceRegistry::default();
        let id = DeviceId::new("dev-1");
        registry.merge(&id, &report(Some(-70)), 5_000);
        let device = registry.merge(&id, &report(Some(-70)), 4_000);
        assert_eq!(device.last_seen_at_ms, 5_000);
        assert_eq!(registry.last_updated_ms(), Some(5_000));
    }

    #[test]
    fn test_list_all_keeps_insertion_order() {
        let mut registry = DeviceRegistry::default();
        registry.merge(&DeviceId::new("c"), &report(Some(-90)), 0);
        registry.merge(&DeviceId::new("a"), &full_report(), 0);
        registry.merge(&DeviceId::new("b"), &report(Some(-40)), 0);

        let ids: Vec<String> = registry
            .list_all(false)
            .into_iter()
            .map(|d| d.identifier.0)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let complete = registry.list_all(true);
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].identifier, DeviceId::new("a"));
    }

    #[test]
    fn test_flush_stale_by_age() {
        let mut registry = DeviceRegistry::default();
        let now = 100_000;
        registry.merge(&DeviceId::new("old"), &report(Some(-70)), now - 31_000);
        registry.merge(&DeviceId::new("edge"), &report(Some(-70)), now - 30_000);
        registry.merge(&DeviceId::new("new"), &report(Some(-70)), now - 29_000);

        let listed = registry.list_all_with_age(false, 30, false, now);
        assert_eq!(listed.len(), 2);
        assert_eq!(registry.len(), 3);

        let listed = registry.list_all_with_age(false, 30, true, now);
        let ids: Vec<String> = listed.into_iter().map(|d| d.identifier.0).collect();
        assert_eq!(ids, vec!["edge", "new"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&DeviceId::new("old")).is_none());
        assert!(registry.window(&DeviceId::new("old")).is_none());
    }

    #[test]
    fn test_aggregate_all_records_last_computed() {
        let mut registry = DeviceRegistry::default();
        let id = DeviceId::new("dev-1");
        registry.merge(&id, &full_report(), 0);
        registry.merge(&id, &report(Some(-72)), 100);

        let ticks = registry.aggregate_all(false, 2.0);
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].1.sample_count, 2);
        assert_eq!(
            registry.get(&id).and_then(|d| d.last_computed.clone()),
            Some(ticks[0].1.clone())
        );
        assert!(!registry.record_tick(&DeviceId::new("ghost"), ticks[0].1.clone()));
    }

    #[test]
    fn test_note_failure_tracks_retries() {
        let mut registry = DeviceRegistry::default();
        let id = DeviceId::new("dev-1");
        assert!(!registry.note_failure(&id, BeepconError::Timeout));

        registry.merge(&id, &full_report(), 0);
        registry.note_failure(&id, BeepconError::Timeout);
        registry.note_failure(&id, BeepconError::LinkLost);
        let device = registry.get(&id).unwrap();
        assert_eq!(device.retry_count, 2);
        assert_eq!(device.last_error, Some(BeepconError::LinkLost));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut registry = DeviceRegistry::default();
        registry.merge(&DeviceId::new("a"), &report(Some(-70)), 0);
        registry.reset(5);
        assert!(registry.is_empty());
        assert!(registry.identifiers().is_empty());
        assert_eq!(registry.last_updated_ms(), None);

        let id = DeviceId::new("b");
        for i in 0..10 {
            registry.merge(&id, &report(Some(-70)), i);
        }
        assert_eq!(registry.window(&id).map(|w| w.capacity()), Some(5));
    }

    fn arb_report() -> impl Strategy<Value = AdvertisementReport> {
        (
            proptest::option::of("[a-z]{1,8}"),
            proptest::option::of(-130i32..=20),
            proptest::option::of(-100i32..=0),
            proptest::option::of(any::<u16>()),
            proptest::option::of(any::<u16>()),
        )
            .prop_map(|(name, rssi, tx_power, major, minor)| AdvertisementReport {
                name,
                rssi,
                tx_power,
                major,
                minor,
                service_uuid: None,
            })
    }

    proptest! {
        #[test]
        fn prop_merge_counts_calls_and_never_nulls_fields(
            reports in proptest::collection::vec(arb_report(), 1..40)
        ) {
            let mut registry = DeviceRegistry::default();
            let id = DeviceId::new("dev");

            for (i, r) in reports.iter().enumerate() {
                let before = registry.get(&id).cloned();
                let after = registry.merge(&id, r, i as u64).clone();

                prop_assert_eq!(after.broadcast_count as usize, i + 1);
                if let Some(before) = before {
                    if before.name.is_some() { prop_assert!(after.name.is_some()); }
                    if before.tx_power.is_some() { prop_assert!(after.tx_power.is_some()); }
                    if before.major.is_some() { prop_assert!(after.major.is_some()); }
                    if before.minor.is_some() { prop_assert!(after.minor.is_some()); }
                    if before.mean_rssi.is_some() { prop_assert!(after.mean_rssi.is_some()); }
                }
            }
        }
    }
}
