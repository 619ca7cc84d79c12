//! # cpuwatch-core
//!
//! Turns cumulative per-core CPU time counters into windowed utilization
//! rates, and reports OS load averages next to them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! use cpuwatch_core::{CapabilityTable, HostCpuSource, RawConfig, UtilizationWatcher, WatcherConfig};
//!
//! let caps = CapabilityTable::builtin().current();
//! let (config, _warnings) = WatcherConfig::configure(&RawConfig::default(), &caps);
//! let watcher = Arc::new(UtilizationWatcher::new(config, Arc::new(HostCpuSource)));
//!
//! let running = Arc::new(AtomicBool::new(true));
//! let handle = watcher.spawn(Arc::clone(&running)).expect("spawn sampler");
//!
//! std::thread::sleep(std::time::Duration::from_secs(65));
//! for (name, value) in watcher.results().measurements.flatten() {
//!     println!("{name} = {value:?}");
//! }
//!
//! running.store(false, std::sync::atomic::Ordering::SeqCst);
//! handle.join().unwrap();
//! ```
//!
//! ## Architecture
//!
//! Host counters → [`UtilizationWatcher::sample_once`] → [`TimeSeries`] → [`UtilizationWatcher::results`]
//!
//! Rates are seconds of CPU-state time per second of wall time. The `total`
//! scope is the mean across cores.

pub mod capability;
pub mod config;
pub mod host;
pub mod metric;
pub mod series;
pub mod watcher;

pub use capability::{CapabilityTable, PlatformCapabilities};
pub use config::{ConfigError, ConfigWarning, RawConfig, WatcherConfig};
pub use host::{CpuTimes, CpuTimesSource, HostCpuSource, HostError, LoadAverage};
pub use metric::{CpuScope, LoadWindow, MetricKey, MetricName, UtilizationType, Window};
pub use series::{SeriesError, Snapshot, TimeSeries};
pub use watcher::{
    Measurements, QUERY_TIMEOUT, Report, ResultsError, ResultsFailure, SAMPLE_INTERVAL,
    UtilizationWatcher, WatcherError,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
