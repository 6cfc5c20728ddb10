//! Typed per-device counter snapshots.
//!
//! A [`DeviceSnapshot`] holds one device's cumulative counters at one sample
//! instant, normalized from the raw perf-dump representation (byte counts,
//! `{sum, avgcount}` latency records) into fixed internal units: 512-byte
//! sectors, raw operation counts and opaque latency-time accumulators.
//!
//! Parsing is permissive on purpose: daemon versions may omit counters (e.g.
//! flush stats on devices without flush support), so every field defaults to
//! zero and unrecognized keys are ignored.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// Mapping from device id to its current snapshot, one per acquisition pass.
///
/// A `BTreeMap` keeps iteration order deterministic, which in turn keeps the
/// row order of one diff call stable.
pub type SnapshotStore = BTreeMap<String, DeviceSnapshot>;

/// Latency counter as emitted by `perf dump`: a cumulative time sum paired
/// with the number of operations it covers.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LatencyRecord {
    pub avgcount: u64,
    pub sum: f64,
}

/// One device's cumulative counters at one sample instant.
///
/// All counters are monotonically non-decreasing between samples, except the
/// sector counters which may wrap at the 32-bit boundary (handled by the
/// rates engine). The time sums are opaque accumulators, only ever used as a
/// numerator over a count delta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    /// Opaque device identity, stable across samples.
    pub device_id: String,

    /// Cumulative sectors read (1 sector = 512 B).
    pub read_sectors: u64,
    /// Cumulative sectors written.
    pub write_sectors: u64,
    /// Cumulative sectors discarded.
    pub discard_sectors: u64,

    /// Cumulative read operation count.
    pub read_count: u64,
    /// Cumulative write operation count.
    pub write_count: u64,
    /// Cumulative discard operation count.
    pub discard_count: u64,

    /// Cumulative read latency-time sum.
    pub read_time_sum: f64,
    /// Cumulative write latency-time sum.
    pub write_time_sum: f64,
    /// Cumulative discard latency-time sum.
    pub discard_time_sum: f64,

    /// Monotonic elapsed seconds (system uptime) at sample time.
    pub sample_timestamp: f64,
}

impl DeviceSnapshot {
    /// Creates a snapshot with all counters zeroed.
    pub fn new(device_id: impl Into<String>, sample_timestamp: f64) -> Self {
        Self {
            device_id: device_id.into(),
            sample_timestamp,
            ..Self::default()
        }
    }

    /// Builds a snapshot from one raw perf-dump device record.
    ///
    /// Recognized keys are converted to internal units (byte counters are
    /// right-shifted by 9 into sectors, latency records split into time sum
    /// and count); everything else is ignored. Missing counters read as zero.
    pub fn from_perf_record(
        device_id: impl Into<String>,
        record: &serde_json::Map<String, Value>,
        sample_timestamp: f64,
    ) -> Self {
        let mut snap = Self::new(device_id, sample_timestamp);

        for (key, value) in record {
            match key.as_str() {
                "read_bytes" => snap.read_sectors = as_u64(value) >> 9,
                "write_bytes" => snap.write_sectors = as_u64(value) >> 9,
                "flush_bytes" => snap.discard_sectors = as_u64(value) >> 9,
                "read_lat" => {
                    let lat = as_latency(value);
                    snap.read_time_sum = lat.sum;
                    snap.read_count = lat.avgcount;
                }
                "write_lat" => {
                    let lat = as_latency(value);
                    snap.write_time_sum = lat.sum;
                    snap.write_count = lat.avgcount;
                }
                "flush_lat" => {
                    let lat = as_latency(value);
                    snap.discard_time_sum = lat.sum;
                    snap.discard_count = lat.avgcount;
                }
                _ => {}
            }
        }

        snap
    }
}

/// Extracts an unsigned counter, defaulting to zero for anything that is not
/// a non-negative number.
fn as_u64(value: &Value) -> u64 {
    value.as_u64().unwrap_or(0)
}

/// Extracts a `{sum, avgcount}` latency record, defaulting to zeroes when the
/// value has a different shape.
fn as_latency(value: &Value) -> LatencyRecord {
    LatencyRecord::deserialize(value).unwrap_or_default()
}
