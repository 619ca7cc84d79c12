//! Rolling time series of metric snapshots.
//!
//! Snapshots are appended in time order by a single writer and pruned from
//! the front on every insertion, so the series never holds more than the
//! largest configured window. Reads never prune.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use log::debug;

use crate::metric::Window;

/// One sampling pass worth of values.
#[derive(Debug, Clone)]
pub struct Snapshot<K> {
    pub timestamp: Instant,
    pub values: HashMap<K, f64>,
}

impl<K> Snapshot<K> {
    pub fn new(timestamp: Instant, values: HashMap<K, f64>) -> Self {
        Self { timestamp, values }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesError {
    #[error("CPU metrics are not collected yet")]
    NotCollected,
}

/// Per-window, per-key rate of change. `None` marks a window that does not
/// have enough history yet.
pub type Rates<K> = BTreeMap<Window, HashMap<K, Option<f64>>>;

/// Per-window, per-key arithmetic mean.
pub type Averages<K> = BTreeMap<Window, HashMap<K, f64>>;

/// Append-only, self-pruning series of snapshots, oldest first.
#[derive(Debug)]
pub struct TimeSeries<K> {
    snapshots: VecDeque<Snapshot<K>>,
    retention: Duration,
    interval: Duration,
}

impl<K: Eq + Hash + Clone> TimeSeries<K> {
    /// Create an empty series keeping `retention` worth of snapshots taken
    /// every `interval`.
    pub fn new(retention: Duration, interval: Duration) -> Self {
        Self {
            snapshots: VecDeque::new(),
            retention,
            interval,
        }
    }

    /// Create a series whose retention is the largest of `windows`.
    pub fn for_windows<'a>(
        windows: impl IntoIterator<Item = &'a Window>,
        interval: Duration,
    ) -> Self {
        let retention = windows
            .into_iter()
            .map(Window::duration)
            .max()
            .unwrap_or(Duration::ZERO);
        Self::new(retention, interval)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot<K>> {
        self.snapshots.iter()
    }

    pub fn latest(&self) -> Option<&Snapshot<K>> {
        self.snapshots.back()
    }

    /// Drop everything older than the retention window relative to the new
    /// snapshot, then push it to the tail.
    ///
    /// Timestamps must be strictly increasing; this is not checked.
    pub fn append(&mut self, snapshot: Snapshot<K>) {
        let now = snapshot.timestamp;
        while let Some(oldest) = self.snapshots.front() {
            if now.saturating_duration_since(oldest.timestamp) > self.retention {
                self.snapshots.pop_front();
            } else {
                break;
            }
        }
        self.snapshots.push_back(snapshot);
    }

    /// Mean of each key over every snapshot younger than each window,
    /// measured from the current instant.
    pub fn average(&self, windows: &BTreeSet<Window>) -> Averages<K> {
        self.average_at(windows, Instant::now())
    }

    /// Mean of each key over every snapshot with `now - timestamp < window`.
    ///
    /// Counts are kept per key: a key absent from some snapshots is averaged
    /// over the snapshots that carried it. Keys with no samples inside a
    /// window are left out of that window's map.
    pub fn average_at(&self, windows: &BTreeSet<Window>, now: Instant) -> Averages<K> {
        let mut sums: BTreeMap<Window, HashMap<K, (f64, usize)>> =
            windows.iter().map(|w| (*w, HashMap::new())).collect();

        for snapshot in &self.snapshots {
            let age = now.saturating_duration_since(snapshot.timestamp);
            for window in windows {
                if age >= window.duration() {
                    continue;
                }
                let Some(acc) = sums.get_mut(window) else {
                    continue;
                };
                for (key, value) in &snapshot.values {
                    let entry = acc.entry(key.clone()).or_insert((0.0, 0));
                    entry.0 += value;
                    entry.1 += 1;
                }
            }
        }

        sums.into_iter()
            .map(|(window, acc)| {
                let means = acc
                    .into_iter()
                    .map(|(key, (sum, count))| (key, sum / count as f64))
                    .collect();
                (window, means)
            })
            .collect()
    }

    /// Per-second rate of change of each key over each trailing window.
    ///
    /// The reference snapshot sits `window.steps(interval)` samples back from
    /// the end of the series. Windows reaching further back than the
    /// retained history yield `None` for every key. Rates are rounded half-up
    /// to four decimal places.
    pub fn percentage_rate(
        &self,
        windows: &BTreeSet<Window>,
    ) -> Result<Rates<K>, SeriesError> {
        let latest = self.snapshots.back().ok_or(SeriesError::NotCollected)?;
        let mut rates = Rates::new();

        for window in windows {
            let steps = window.steps(self.interval);
            let reference = self
                .snapshots
                .len()
                .checked_sub(steps)
                .and_then(|idx| self.snapshots.get(idx));
            if reference.is_none() {
                debug!(
                    "cpu.util metrics for {} min avg calculation are not collected yet",
                    window
                );
            }

            let per_key = latest
                .values
                .iter()
                .map(|(key, last)| {
                    let rate = reference.and_then(|r| rate_between(r, latest, key, *last));
                    (key.clone(), rate)
                })
                .collect();
            rates.insert(*window, per_key);
        }

        Ok(rates)
    }
}

fn rate_between<K: Eq + Hash>(
    reference: &Snapshot<K>,
    latest: &Snapshot<K>,
    key: &K,
    last: f64,
) -> Option<f64> {
    let first = reference.values.get(key)?;
    let elapsed = latest
        .timestamp
        .saturating_duration_since(reference.timestamp)
        .as_secs_f64();
    if elapsed <= 0.0 {
        return None;
    }
    Some(round4((last - first) / elapsed))
}

/// Round half-up to four decimal places.
pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0 + 0.5).floor() / 10_000.0
}
