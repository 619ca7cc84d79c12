//! CPU utilization watcher.
//!
//! Lifecycle:
//! 1. [`WatcherConfig::configure`] narrows the requested metrics to the platform
//! 2. [`UtilizationWatcher::new`] pairs the config with a counter source
//! 3. [`UtilizationWatcher::run`] (usually on its own thread) samples every
//!    [`SAMPLE_INTERVAL`] until the shared `running` flag is cleared
//! 4. [`UtilizationWatcher::results`] can be called from any thread at any time
//!
//! The time series is the only shared mutable state. It lives behind a
//! single mutex in [`WatcherState`]; appends and whole-window computations
//! each hold the lock for their full duration.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::config::WatcherConfig;
use crate::host::{CpuTimes, CpuTimesSource, HostError};
use crate::metric::{CpuScope, LoadWindow, MetricKey, MetricName, UtilizationType};
use crate::series::{Averages, SeriesError, Snapshot, TimeSeries};

/// Spacing between samples. Window lengths are converted to sample counts
/// with this value.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on a single per-core CPU time query.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Granularity at which a waiting run loop notices cancellation.
const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to read CPU times: {0}")]
    Query(#[from] HostError),
    #[error("CPU times query timed out after {0:?}")]
    Timeout(Duration),
    #[error("previous CPU times query is still running")]
    Busy,
    #[error("CPU times query worker exited without a result")]
    WorkerLost,
    #[error("failed to spawn CPU times query worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("CPU times query returned no cores")]
    NoCores,
}

/// One part of [`UtilizationWatcher::results`] that could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum ResultsFailure {
    #[error(transparent)]
    Utilization(#[from] SeriesError),
    #[error("failed to read load average: {0}")]
    LoadAverage(#[source] HostError),
}

/// Everything that went wrong while building one [`Report`].
#[derive(Debug)]
pub struct ResultsError {
    pub failures: Vec<ResultsFailure>,
}

impl fmt::Display for ResultsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CPU: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ResultsError {}

/// Exported values. `None` means the window has not collected enough
/// history yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements(BTreeMap<MetricName, Option<f64>>);

impl Measurements {
    pub fn get(&self, name: &MetricName) -> Option<Option<f64>> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricName, &Option<f64>)> {
        self.0.iter()
    }

    /// Render names to their dotted export form (`util.idle.5.total`).
    pub fn flatten(&self) -> BTreeMap<String, Option<f64>> {
        self.0
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    fn insert(&mut self, name: MetricName, value: Option<f64>) {
        self.0.insert(name, value);
    }
}

/// Best-effort results plus a description of whatever could not be produced.
#[derive(Debug)]
pub struct Report {
    pub measurements: Measurements,
    pub error: Option<ResultsError>,
}

impl Report {
    /// Drop the partial data if anything failed.
    pub fn into_result(self) -> Result<Measurements, ResultsError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.measurements),
        }
    }
}

/// Mutable runtime state shared between the sampling loop and readers.
#[derive(Debug)]
pub struct WatcherState {
    series: Mutex<TimeSeries<MetricKey>>,
    query_in_flight: Arc<AtomicBool>,
}

impl WatcherState {
    fn new(series: TimeSeries<MetricKey>) -> Self {
        Self {
            series: Mutex::new(series),
            query_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append only ever pops from the front and pushes to the back, so a
    /// panic elsewhere cannot leave the series half-updated.
    fn lock(&self) -> MutexGuard<'_, TimeSeries<MetricKey>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive claim on the single query thread; released on drop, including
/// when the source panics.
struct QuerySlot(Arc<AtomicBool>);

impl QuerySlot {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for QuerySlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Samples per-core CPU counters and reports windowed rates.
pub struct UtilizationWatcher {
    config: WatcherConfig,
    state: WatcherState,
    source: Arc<dyn CpuTimesSource>,
    interval: Duration,
    query_timeout: Duration,
}

impl UtilizationWatcher {
    pub fn new(config: WatcherConfig, source: Arc<dyn CpuTimesSource>) -> Self {
        Self::with_timing(config, source, SAMPLE_INTERVAL, QUERY_TIMEOUT)
    }

    /// Use a non-default sampling interval and query timeout.
    pub fn with_timing(
        config: WatcherConfig,
        source: Arc<dyn CpuTimesSource>,
        interval: Duration,
        query_timeout: Duration,
    ) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let series = TimeSeries::for_windows(config.utilization_windows(), interval);
        Self {
            config,
            state: WatcherState::new(series),
            source,
            interval,
            query_timeout,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of snapshots currently retained.
    pub fn sample_count(&self) -> usize {
        self.state.lock().len()
    }

    /// Take one sample, stamped when the OS query returns.
    pub fn sample_once(&self) -> Result<(), WatcherError> {
        if !self.config.utilization_enabled() {
            return Ok(());
        }
        let times = self.query_per_core_times()?;
        self.record(&times, Instant::now())
    }

    /// Take one sample and record it under `timestamp` instead of the
    /// query's completion time. Used to replay samples on a synthetic clock.
    ///
    /// Timestamps must increase from call to call.
    #[doc(hidden)]
    pub fn sample_at(&self, timestamp: Instant) -> Result<(), WatcherError> {
        if !self.config.utilization_enabled() {
            return Ok(());
        }
        let times = self.query_per_core_times()?;
        self.record(&times, timestamp)
    }

    fn record(&self, times: &[CpuTimes], timestamp: Instant) -> Result<(), WatcherError> {
        let values = snapshot_values(times, self.config.utilization_types())?;
        self.state.lock().append(Snapshot::new(timestamp, values));
        Ok(())
    }

    /// Run the OS query on a helper thread and give up after the timeout.
    ///
    /// At most one query is outstanding: while an abandoned query is still
    /// running, new ticks fail with [`WatcherError::Busy`] instead of
    /// starting another thread.
    fn query_per_core_times(&self) -> Result<Vec<CpuTimes>, WatcherError> {
        let slot = QuerySlot::claim(&self.state.query_in_flight).ok_or(WatcherError::Busy)?;

        let (tx, rx) = mpsc::channel();
        let source = Arc::clone(&self.source);
        std::thread::Builder::new()
            .name("cpuwatch-query".to_string())
            .spawn(move || {
                let result = source.per_core_times();
                drop(slot);
                let _ = tx.send(result);
            })
            .map_err(WatcherError::Spawn)?;

        match rx.recv_timeout(self.query_timeout) {
            Ok(result) => Ok(result?),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(WatcherError::Timeout(self.query_timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(WatcherError::WorkerLost),
        }
    }

    /// True while a query thread (finished or abandoned) has not returned.
    pub fn query_in_flight(&self) -> bool {
        self.state.query_in_flight.load(Ordering::SeqCst)
    }

    /// Sample on a fixed schedule until `running` is cleared.
    ///
    /// Errors are logged and the next tick proceeds normally. Ticks missed
    /// because a sample overran are skipped, not replayed.
    pub fn run(&self, running: &AtomicBool) {
        let mut next = Instant::now();
        while running.load(Ordering::SeqCst) {
            if let Err(e) = self.sample_once() {
                error!("[CPU] Failed to read utilisation metrics: {e}");
            }

            next += self.interval;
            let now = Instant::now();
            while next <= now {
                next += self.interval;
            }

            while running.load(Ordering::SeqCst) {
                let remaining = next.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                std::thread::sleep(remaining.min(STOP_POLL));
            }
        }
        debug!("[CPU] sampling loop stopped");
    }

    /// Start [`run`](Self::run) on a dedicated thread.
    pub fn spawn(self: &Arc<Self>, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        let watcher = Arc::clone(self);
        std::thread::Builder::new()
            .name("cpuwatch-sampler".to_string())
            .spawn(move || watcher.run(&running))
    }

    /// Windowed utilization rates from the retained samples plus fresh load
    /// averages from the OS.
    pub fn results(&self) -> Report {
        let mut measurements = Measurements::default();
        let mut failures = Vec::new();

        if self.config.utilization_enabled() {
            let rates = {
                let series = self.state.lock();
                series.percentage_rate(self.config.utilization_windows())
            };
            match rates {
                Ok(rates) => {
                    for (window, per_key) in rates {
                        for (key, rate) in per_key {
                            let name = MetricName::Utilization {
                                kind: key.kind,
                                window,
                                scope: key.scope,
                            };
                            measurements.insert(name, rate);
                        }
                    }
                }
                Err(e) => {
                    error!("[CPU] Failed to read utilisation metrics: {e}");
                    failures.push(ResultsFailure::from(e));
                }
            }
        }

        let load_windows = self.config.load_average_windows();
        if !load_windows.is_empty() {
            match self.source.load_average() {
                Ok(load) => {
                    for window in load_windows {
                        let value = match window {
                            LoadWindow::One => load.one,
                            LoadWindow::Five => load.five,
                            LoadWindow::Fifteen => load.fifteen,
                        };
                        measurements.insert(MetricName::LoadAverage(*window), Some(value));
                    }
                }
                Err(e) => {
                    error!("[CPU] Failed to read load_avg: {e}");
                    failures.push(ResultsFailure::LoadAverage(e));
                }
            }
        }

        Report {
            measurements,
            error: (!failures.is_empty()).then_some(ResultsError { failures }),
        }
    }

    /// Plain per-window means of the retained per-key counter values.
    pub fn averages(&self) -> Averages<MetricKey> {
        self.state.lock().average(self.config.utilization_windows())
    }
}

/// Per-core values for every enabled type, plus a `Total` equal to the mean
/// across cores.
fn snapshot_values(
    times: &[CpuTimes],
    types: &BTreeSet<UtilizationType>,
) -> Result<HashMap<MetricKey, f64>, WatcherError> {
    if times.is_empty() {
        return Err(WatcherError::NoCores);
    }

    let mut values = HashMap::with_capacity(types.len() * (times.len() + 1));
    for kind in types {
        let mut sum = 0.0;
        for (index, core) in times.iter().enumerate() {
            let value = core.value(*kind);
            values.insert(MetricKey::new(*kind, CpuScope::Core(index)), value);
            sum += value;
        }
        values.insert(
            MetricKey::new(*kind, CpuScope::Total),
            sum / times.len() as f64,
        );
    }
    Ok(values)
}
