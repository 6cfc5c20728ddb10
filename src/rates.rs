//! Counter-diff and rate-derivation engine.
//!
//! This module is the **single source of truth** for interval arithmetic:
//! given two snapshot stores separated by a known time interval, it produces
//! per-device throughput, operation-rate and average-latency figures,
//! handling 32-bit sector-counter wraparound, cold start (no previous
//! sample), divide-by-zero avoidance and display-unit conversion.
//!
//! The engine is pure: no I/O, no shared state. Acquisition failures are the
//! collector's problem; a device missing from the previous store is not an
//! error, it merely gets cold-start treatment.

use crate::model::{DeviceSnapshot, SnapshotStore};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Wraparound boundary of the device sector counters. Counters at or below
/// this value are assumed 32 bits wide; a decrease is treated as exactly one
/// wraparound and corrected by masking. Wider counters are diffed as-is.
pub const SECTOR_COUNTER_MAX: u64 = 0xFFFF_FFFF;

/// Number of columns in a derived row, matching the table header width.
pub const ROW_FIELDS: usize = 14;

const KB_HEADER: [&str; ROW_FIELDS] = [
    "Device", "tps", "KB_read/s", "KB_wrtn/s", "KB_dscd/s", "KB_read", "KB_wrtn", "KB_dscd",
    "lat_read", "lat_write", "lat_dc", "rd_count", "wr_count", "dc_count",
];

const MB_HEADER: [&str; ROW_FIELDS] = [
    "Device", "tps", "MB_read/s", "MB_wrtn/s", "MB_dscd/s", "MB_read", "MB_wrtn", "MB_dscd",
    "lat_read", "lat_write", "lat_dc", "rd_count", "wr_count", "dc_count",
];

// ---------------------------------------------------------------------------
// Display unit
// ---------------------------------------------------------------------------

/// Output unit for the rate and total columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayUnit {
    /// Kibibytes: 1 sector = 512 B = 0.5 KiB, so sectors / 2.
    #[default]
    Kib,
    /// Mebibytes: 512 B / 1 MiB = 1/2048, so sectors / 2048.
    Mib,
}

impl DisplayUnit {
    /// Divisor converting a sector count into this unit.
    pub fn divisor(self) -> f64 {
        match self {
            DisplayUnit::Kib => 2.0,
            DisplayUnit::Mib => 2048.0,
        }
    }

    /// Column headers matching [`DerivedMetricRow::columns`].
    pub fn headers(self) -> &'static [&'static str; ROW_FIELDS] {
        match self {
            DisplayUnit::Kib => &KB_HEADER,
            DisplayUnit::Mib => &MB_HEADER,
        }
    }
}

// ---------------------------------------------------------------------------
// Output row
// ---------------------------------------------------------------------------

/// One device's derived metrics for one interval.
///
/// Rates and totals are in the configured display unit; latency averages are
/// time-sum units per operation; op deltas are plain count differences (not
/// divided by the interval) and may be negative on a counter reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedMetricRow {
    pub device_id: String,
    pub ops_per_sec: f64,
    pub read_rate: f64,
    pub write_rate: f64,
    pub discard_rate: f64,
    pub read_total: f64,
    pub write_total: f64,
    pub discard_total: f64,
    pub read_latency_avg: f64,
    pub write_latency_avg: f64,
    pub discard_latency_avg: f64,
    pub read_ops_delta: f64,
    pub write_ops_delta: f64,
    pub discard_ops_delta: f64,
}

impl DerivedMetricRow {
    /// Renders the row as table cells, in header order.
    ///
    /// Rates and totals use two decimals, latencies six, op deltas one,
    /// matching classic iostat output.
    pub fn columns(&self) -> Vec<String> {
        vec![
            self.device_id.clone(),
            format!("{:.2}", self.ops_per_sec),
            format!("{:.2}", self.read_rate),
            format!("{:.2}", self.write_rate),
            format!("{:.2}", self.discard_rate),
            format!("{:.2}", self.read_total),
            format!("{:.2}", self.write_total),
            format!("{:.2}", self.discard_total),
            format!("{:.6}", self.read_latency_avg),
            format!("{:.6}", self.write_latency_avg),
            format!("{:.6}", self.discard_latency_avg),
            format!("{:.1}", self.read_ops_delta),
            format!("{:.1}", self.write_ops_delta),
            format!("{:.1}", self.discard_ops_delta),
        ]
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A snapshot pair whose interval is not strictly positive.
///
/// Monotonic timestamps make this unreachable in normal operation; it
/// indicates the caller fed stores out of order.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidIntervalError {
    pub device_id: String,
    pub interval: f64,
}

impl std::fmt::Display for InvalidIntervalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "non-positive sample interval {:.6}s for device {}",
            self.interval, self.device_id
        )
    }
}

impl std::error::Error for InvalidIntervalError {}

// ---------------------------------------------------------------------------
// Diff computation
// ---------------------------------------------------------------------------

/// Derives one metric row per device in `curr`, in key order.
///
/// Devices with a counterpart in `prev` are diffed over the inter-sample
/// interval; devices without one (first pass, or newly appeared) fall back to
/// cold start per device: deltas are the cumulative values and the interval
/// is the device's own `sample_timestamp`, i.e. the first reported rate is
/// the daemon-lifetime average. Devices present only in `prev` produce no
/// row.
pub fn compute_rows(
    prev: Option<&SnapshotStore>,
    curr: &SnapshotStore,
    unit: DisplayUnit,
) -> Result<Vec<DerivedMetricRow>, InvalidIntervalError> {
    let mut rows = Vec::with_capacity(curr.len());

    for (device_id, snap) in curr {
        let row = match prev.and_then(|p| p.get(device_id)) {
            Some(last) => diff_row(snap, last, unit)?,
            None => diff_row(snap, &DeviceSnapshot::new(device_id.clone(), 0.0), unit)?,
        };
        rows.push(row);
    }

    Ok(rows)
}

/// Diffs one device against its previous snapshot.
///
/// Cold start is the degenerate case of a zeroed previous snapshot with
/// `sample_timestamp` 0, which makes the interval the device's own uptime.
fn diff_row(
    curr: &DeviceSnapshot,
    prev: &DeviceSnapshot,
    unit: DisplayUnit,
) -> Result<DerivedMetricRow, InvalidIntervalError> {
    let interval = curr.sample_timestamp - prev.sample_timestamp;
    if interval <= 0.0 {
        return Err(InvalidIntervalError {
            device_id: curr.device_id.clone(),
            interval,
        });
    }

    let rd_sec = sector_delta(curr.read_sectors, prev.read_sectors);
    let wr_sec = sector_delta(curr.write_sectors, prev.write_sectors);
    let dc_sec = sector_delta(curr.discard_sectors, prev.discard_sectors);

    let rd_ops = count_delta(curr.read_count, prev.read_count);
    let wr_ops = count_delta(curr.write_count, prev.write_count);
    let dc_ops = count_delta(curr.discard_count, prev.discard_count);

    let divisor = unit.divisor();

    Ok(DerivedMetricRow {
        device_id: curr.device_id.clone(),
        ops_per_sec: (rd_ops + wr_ops + dc_ops) as f64 / interval,
        read_rate: rd_sec as f64 / interval / divisor,
        write_rate: wr_sec as f64 / interval / divisor,
        discard_rate: dc_sec as f64 / interval / divisor,
        read_total: rd_sec as f64 / divisor,
        write_total: wr_sec as f64 / divisor,
        discard_total: dc_sec as f64 / divisor,
        read_latency_avg: latency_avg(curr.read_time_sum - prev.read_time_sum, rd_ops, false),
        write_latency_avg: latency_avg(curr.write_time_sum - prev.write_time_sum, wr_ops, false),
        // Discard accepts a negative count delta as divisor, unlike
        // read/write. Carried over from the reference behavior.
        discard_latency_avg: latency_avg(
            curr.discard_time_sum - prev.discard_time_sum,
            dc_ops,
            true,
        ),
        read_ops_delta: rd_ops as f64,
        write_ops_delta: wr_ops as f64,
        discard_ops_delta: dc_ops as f64,
    })
}

/// Sector counter delta with 32-bit wraparound correction.
///
/// A decrease with `prev` within the 32-bit range is assumed to be exactly
/// one wraparound and is reconstructed by masking. A decrease with `prev`
/// above the boundary comes from a wider counter, so it is a genuine anomaly
/// and passes through negative.
fn sector_delta(curr: u64, prev: u64) -> i64 {
    let raw = curr as i64 - prev as i64;
    if raw < 0 && prev <= SECTOR_COUNTER_MAX {
        raw & SECTOR_COUNTER_MAX as i64
    } else {
        raw
    }
}

/// Operation-count delta. Count counters are assumed wide enough not to
/// wrap; a decrease passes through as a negative delta.
fn count_delta(curr: u64, prev: u64) -> i64 {
    curr as i64 - prev as i64
}

/// Average latency over the interval, zero when the count delta does not
/// qualify as a divisor.
fn latency_avg(time_delta: f64, ops_delta: i64, accept_negative: bool) -> f64 {
    let divides = if accept_negative {
        ops_delta != 0
    } else {
        ops_delta > 0
    };
    if divides {
        time_delta / ops_delta as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- helpers --

    #[allow(clippy::too_many_arguments)]
    fn snap(
        id: &str,
        rd_sectors: u64,
        wr_sectors: u64,
        rd_count: u64,
        wr_count: u64,
        rd_time: f64,
        wr_time: f64,
        ts: f64,
    ) -> DeviceSnapshot {
        DeviceSnapshot {
            device_id: id.to_string(),
            read_sectors: rd_sectors,
            write_sectors: wr_sectors,
            read_count: rd_count,
            write_count: wr_count,
            read_time_sum: rd_time,
            write_time_sum: wr_time,
            sample_timestamp: ts,
            ..DeviceSnapshot::default()
        }
    }

    fn store(snaps: Vec<DeviceSnapshot>) -> SnapshotStore {
        snaps.into_iter().map(|s| (s.device_id.clone(), s)).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // -- unit conversion --

    #[test]
    fn kib_and_mib_divisors() {
        assert!(approx(DisplayUnit::Kib.divisor(), 2.0));
        assert!(approx(DisplayUnit::Mib.divisor(), 2048.0));
    }

    #[test]
    fn unit_conversion_at_unit_interval() {
        let prev = store(vec![snap("d", 0, 0, 0, 0, 0.0, 0.0, 1.0)]);
        let curr = store(vec![snap("d", 4096, 0, 0, 0, 0.0, 0.0, 2.0)]);

        let kib = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        assert!(approx(kib[0].read_rate, 2048.0));

        let mib = compute_rows(Some(&prev), &curr, DisplayUnit::Mib).unwrap();
        assert!(approx(mib[0].read_rate, 2.0));
    }

    // -- wraparound --

    #[test]
    fn wraparound_is_corrected() {
        let prev = store(vec![snap("d", 0xFFFF_FFF0, 0, 0, 0, 0.0, 0.0, 1.0)]);
        let curr = store(vec![snap("d", 0x0000_0005, 0, 0, 0, 0.0, 0.0, 2.0)]);

        let rows = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        // 0x15 sectors = 21, over 1s at divisor 2
        assert!(approx(rows[0].read_rate, 21.0 / 2.0));
        assert!(approx(rows[0].read_total, 21.0 / 2.0));
    }

    #[test]
    fn wide_counter_decrease_is_not_corrected() {
        let prev = store(vec![snap("d", 0x1_0000_0010, 0, 0, 0, 0.0, 0.0, 1.0)]);
        let curr = store(vec![snap("d", 0x1_0000_0005, 0, 0, 0, 0.0, 0.0, 2.0)]);

        let rows = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        // genuine decrease of 11 sectors passes through negative
        assert!(approx(rows[0].read_total, -11.0 / 2.0));
        assert!(approx(rows[0].read_rate, -11.0 / 2.0));
    }

    #[test]
    fn sector_delta_edges() {
        assert_eq!(sector_delta(5, 5), 0);
        assert_eq!(sector_delta(10, 5), 5);
        assert_eq!(sector_delta(0, SECTOR_COUNTER_MAX), 1);
        assert_eq!(sector_delta(0x5, 0xFFFF_FFF0), 0x15);
    }

    // -- cold start --

    #[test]
    fn cold_start_uses_sample_timestamp_as_interval() {
        let curr = store(vec![snap("d", 1000, 0, 100, 0, 500.0, 0.0, 50.0)]);

        let rows = compute_rows(None, &curr, DisplayUnit::Kib).unwrap();
        let r = &rows[0];
        assert!(approx(r.read_latency_avg, 5.0));
        assert!(approx(r.ops_per_sec, 100.0 / 50.0));
        assert!(approx(r.read_rate, 1000.0 / 50.0 / 2.0));
        assert!(approx(r.read_total, 500.0));
        assert!(approx(r.read_ops_delta, 100.0));
    }

    #[test]
    fn cold_start_with_zero_timestamp_is_invalid() {
        let curr = store(vec![snap("d", 10, 0, 1, 0, 1.0, 0.0, 0.0)]);
        let err = compute_rows(None, &curr, DisplayUnit::Kib).unwrap_err();
        assert_eq!(err.device_id, "d");
    }

    // -- divide safety --

    #[test]
    fn equal_counts_yield_zero_latency() {
        let prev = store(vec![snap("d", 0, 0, 5, 7, 1.0, 2.0, 1.0)]);
        let curr = store(vec![snap("d", 0, 0, 5, 7, 9.0, 9.0, 2.0)]);

        let rows = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        assert!(approx(rows[0].read_latency_avg, 0.0));
        assert!(approx(rows[0].write_latency_avg, 0.0));
        assert!(approx(rows[0].discard_latency_avg, 0.0));
    }

    #[test]
    fn discard_latency_accepts_negative_count_delta() {
        let mut prev = snap("d", 0, 0, 0, 0, 0.0, 0.0, 1.0);
        prev.discard_count = 10;
        prev.discard_time_sum = 30.0;
        let mut curr = snap("d", 0, 0, 0, 0, 0.0, 0.0, 2.0);
        curr.discard_count = 5;
        curr.discard_time_sum = 20.0;

        let rows =
            compute_rows(Some(&store(vec![prev])), &store(vec![curr]), DisplayUnit::Kib).unwrap();
        // delta -10 / delta -5 = 2.0
        assert!(approx(rows[0].discard_latency_avg, 2.0));
    }

    #[test]
    fn read_latency_rejects_negative_count_delta() {
        let prev = store(vec![snap("d", 0, 0, 10, 0, 30.0, 0.0, 1.0)]);
        let curr = store(vec![snap("d", 0, 0, 5, 0, 20.0, 0.0, 2.0)]);

        let rows = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        assert!(approx(rows[0].read_latency_avg, 0.0));
        assert!(approx(rows[0].read_ops_delta, -5.0));
    }

    // -- interval contract --

    #[test]
    fn non_positive_interval_is_an_error() {
        let prev = store(vec![snap("d", 0, 0, 0, 0, 0.0, 0.0, 10.0)]);
        let curr = store(vec![snap("d", 0, 0, 0, 0, 0.0, 0.0, 10.0)]);
        let err = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap_err();
        assert_eq!(err.device_id, "d");
        assert!(approx(err.interval, 0.0));

        let curr = store(vec![snap("d", 0, 0, 0, 0, 0.0, 0.0, 9.0)]);
        assert!(compute_rows(Some(&prev), &curr, DisplayUnit::Kib).is_err());
    }

    // -- per-device independence --

    #[test]
    fn new_device_is_cold_while_others_are_warm() {
        let prev = store(vec![snap("a", 1000, 0, 10, 0, 100.0, 0.0, 10.0)]);
        let curr = store(vec![
            snap("a", 2000, 0, 20, 0, 300.0, 0.0, 20.0),
            snap("b", 400, 0, 4, 0, 8.0, 0.0, 20.0),
        ]);

        let rows = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        assert_eq!(rows.len(), 2);
        // warm: interval 10
        assert!(approx(rows[0].read_rate, 1000.0 / 10.0 / 2.0));
        // cold: interval = its own timestamp, 20
        assert!(approx(rows[1].read_rate, 400.0 / 20.0 / 2.0));
        assert!(approx(rows[1].read_latency_avg, 2.0));
    }

    #[test]
    fn removed_device_emits_no_row() {
        let prev = store(vec![
            snap("a", 0, 0, 0, 0, 0.0, 0.0, 1.0),
            snap("b", 0, 0, 0, 0, 0.0, 0.0, 1.0),
        ]);
        let curr = store(vec![snap("a", 0, 0, 0, 0, 0.0, 0.0, 2.0)]);

        let rows = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_id, "a");
    }

    // -- shape and ordering --

    #[test]
    fn rows_have_stable_field_count() {
        let curr = store(vec![
            snap("a", 1, 2, 3, 4, 5.0, 6.0, 7.0),
            snap("b", 0, 0, 0, 0, 0.0, 0.0, 7.0),
        ]);

        let rows = compute_rows(None, &curr, DisplayUnit::Mib).unwrap();
        for row in &rows {
            assert_eq!(row.columns().len(), ROW_FIELDS);
        }
        assert_eq!(DisplayUnit::Kib.headers().len(), ROW_FIELDS);
        assert_eq!(DisplayUnit::Mib.headers().len(), ROW_FIELDS);
    }

    #[test]
    fn rows_follow_store_key_order() {
        let curr = store(vec![
            snap("zeta", 0, 0, 0, 0, 0.0, 0.0, 1.0),
            snap("alpha", 0, 0, 0, 0, 0.0, 0.0, 1.0),
            snap("mid", 0, 0, 0, 0, 0.0, 0.0, 1.0),
        ]);

        let rows = compute_rows(None, &curr, DisplayUnit::Kib).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(ids, ["alpha", "mid", "zeta"]);
    }

    // -- end to end --

    #[test]
    fn end_to_end_kib_scenario() {
        let prev = store(vec![snap("dev_a", 1000, 0, 10, 0, 100.0, 0.0, 10.0)]);
        let curr = store(vec![snap("dev_a", 2000, 0, 20, 0, 300.0, 0.0, 20.0)]);

        let rows = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        let r = &rows[0];
        assert!(approx(r.read_rate, 50.0));
        assert!(approx(r.read_total, 500.0));
        assert!(approx(r.read_latency_avg, 20.0));
        assert!(approx(r.read_ops_delta, 10.0));
        assert!(approx(r.ops_per_sec, 1.0));
    }

    #[test]
    fn columns_format_like_iostat() {
        let prev = store(vec![snap("dev_a", 1000, 0, 10, 0, 100.0, 0.0, 10.0)]);
        let curr = store(vec![snap("dev_a", 2000, 0, 20, 0, 300.0, 0.0, 20.0)]);

        let rows = compute_rows(Some(&prev), &curr, DisplayUnit::Kib).unwrap();
        let cols = rows[0].columns();
        assert_eq!(cols[0], "dev_a");
        assert_eq!(cols[1], "1.00");
        assert_eq!(cols[2], "50.00");
        assert_eq!(cols[5], "500.00");
        assert_eq!(cols[8], "20.000000");
        assert_eq!(cols[11], "10.0");
    }
}
