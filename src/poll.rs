//! The acquire/diff/emit/sleep cycle.
//!
//! One cycle acquires a fresh snapshot store, diffs it against the previous
//! cycle's store (cold start on the first pass), renders the derived rows and
//! sleeps. The previous store is carried forward exactly one cycle; no
//! history accumulates. Cancellation is cooperative: the shared flag is
//! checked before each new acquisition and during the sliced sleep, so an
//! interrupt stops the loop between cycles, never mid-cycle.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::collector::{CollectError, OsdCollector, PerfSource};
use crate::model::SnapshotStore;
use crate::rates::{DisplayUnit, compute_rows};
use crate::render::render_table;

/// Poll-loop configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Sleep between cycles. Acquisition latency is not subtracted, so the
    /// actual period is at least this long.
    pub interval: Duration,
    /// Total polling duration; `None` polls until cancelled.
    pub duration: Option<Duration>,
    /// Display unit for rate and total columns.
    pub unit: DisplayUnit,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            duration: None,
            unit: DisplayUnit::Kib,
        }
    }
}

/// Runs acquisition/diff/emit cycles until the duration elapses or `running`
/// is cleared. Tables are written to `out`.
///
/// A failed acquisition skips the cycle (the previous store is kept, so the
/// next successful cycle still diffs warm where possible); an empty store
/// emits nothing. Only write failures on `out` abort the loop.
pub fn run<S: PerfSource, W: Write>(
    collector: &OsdCollector<S>,
    config: &PollConfig,
    running: &AtomicBool,
    out: &mut W,
) -> io::Result<()> {
    let mut prev: Option<SnapshotStore> = None;
    let mut elapsed = Duration::ZERO;

    while running.load(Ordering::SeqCst) {
        match collector.collect_store() {
            Ok(curr) => {
                emit_cycle(prev.as_ref(), &curr, config.unit, out)?;
                prev = Some(curr);
            }
            Err(e) => log_collect_error(&e),
        }

        sleep_sliced(config.interval, running);
        elapsed += config.interval;

        // Done once elapsed polling time reaches the duration; the check
        // sits before the next acquisition so the loop never overruns.
        if let Some(total) = config.duration {
            if elapsed >= total {
                break;
            }
        }
    }

    Ok(())
}

/// Diffs one cycle and renders it, tolerating empty stores and out-of-order
/// samples without aborting the loop.
fn emit_cycle<W: Write>(
    prev: Option<&SnapshotStore>,
    curr: &SnapshotStore,
    unit: DisplayUnit,
    out: &mut W,
) -> io::Result<()> {
    if curr.is_empty() {
        warn!("no block devices found in this pass");
        return Ok(());
    }

    match compute_rows(prev, curr, unit) {
        Ok(rows) => {
            let cells: Vec<Vec<String>> = rows.iter().map(|r| r.columns()).collect();
            out.write_all(render_table(unit.headers(), &cells).as_bytes())?;
            out.flush()?;
        }
        Err(e) => warn!("skipping cycle: {}", e),
    }

    Ok(())
}

fn log_collect_error(e: &CollectError) {
    error!("acquisition failed: {}", e);
}

/// Sleeps `total` in 100ms slices so a cancellation takes effect promptly.
fn sleep_sliced(total: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    debug!("cycle sleep done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockSource;
    use serde_json::json;

    fn dump(read_bytes: u64, read_count: u64) -> String {
        json!({
            "NVMEDevice-dev0": {
                "read_bytes": read_bytes,
                "read_lat": { "avgcount": read_count, "sum": 2.0 },
            },
        })
        .to_string()
    }

    fn collector(source: MockSource) -> OsdCollector<MockSource> {
        let mut c = OsdCollector::new(source, None);
        c.discover().unwrap();
        c
    }

    fn fast_config(cycles: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            duration: Some(Duration::from_millis(cycles)),
            unit: DisplayUnit::Kib,
        }
    }

    #[test]
    fn bounded_run_emits_tables_and_stops() {
        let mut source = MockSource::new();
        source.set_uptime(10.0);
        source.set_uptime_tick(1.0);
        source.add_dump("ceph-osd.0.asok", dump(1024, 4));

        let collector = collector(source);
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        run(&collector, &fast_config(2), &running, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Device"));
        assert!(text.contains("dev0"));
        // cold-start cycle plus one warm cycle, then the duration is up
        assert_eq!(text.matches("Device").count(), 2);
    }

    #[test]
    fn duration_bounds_exact_cycle_count() {
        let mut source = MockSource::new();
        source.set_uptime(10.0);
        source.set_uptime_tick(1.0);
        source.add_dump("ceph-osd.0.asok", dump(1024, 4));

        let collector = collector(source);
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        let config = PollConfig {
            interval: Duration::from_millis(5),
            duration: Some(Duration::from_millis(10)),
            unit: DisplayUnit::Kib,
        };
        run(&collector, &config, &running, &mut out).unwrap();

        // interval 5, duration 10: elapsed reaches the duration after the
        // second cycle's sleep, so no third cycle starts
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Device").count(), 2);
    }

    #[test]
    fn cleared_flag_prevents_any_cycle() {
        let mut source = MockSource::new();
        source.add_dump("ceph-osd.0.asok", dump(1024, 4));

        let collector = collector(source);
        let running = AtomicBool::new(false);
        let mut out = Vec::new();

        run(&collector, &fast_config(10), &running, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn empty_store_emits_nothing() {
        let mut source = MockSource::new();
        source.add_dump("ceph-osd.0.asok", r#"{"osd": {}}"#);

        let collector = collector(source);
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        run(&collector, &fast_config(1), &running, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn same_timestamp_cycle_is_skipped_not_fatal() {
        let mut source = MockSource::new();
        source.set_uptime(10.0);
        source.add_dump("ceph-osd.0.asok", dump(1024, 4));

        // uptime never advances, so every warm diff sees a zero interval
        let collector = collector(source);
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        run(&collector, &fast_config(3), &running, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        // only the cold-start cycle produced a table
        assert_eq!(text.matches("Device").count(), 1);
    }
}
