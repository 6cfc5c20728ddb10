//! bdevstat - interval I/O statistics for Ceph SPDK block devices.
//!
//! Polls the admin sockets of a fleet of Ceph OSD daemons, extracts the
//! cumulative per-device counters from `perf dump`, and derives throughput,
//! operation-rate and average-latency figures between consecutive samples,
//! printed as a column-aligned table (iostat style).
//!
//! The crate splits into:
//! - [`model`] - typed per-device counter snapshots
//! - [`rates`] - the pure counter-diff and rate-derivation engine
//! - [`collector`] - admin-socket discovery and perf-dump acquisition
//! - [`render`] - fixed-width table output
//! - [`poll`] - the acquire/diff/emit/sleep cycle

pub mod collector;
pub mod model;
pub mod poll;
pub mod rates;
pub mod render;
