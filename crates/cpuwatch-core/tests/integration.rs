//! Integration tests for cpuwatch-core.
//!
//! These drive the full path with scripted counter sources:
//! configuration → sampling → time series → exported results.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use cpuwatch_core::{
    CapabilityTable, CpuScope, CpuTimes, CpuTimesSource, HostCpuSource, HostError, LoadAverage,
    MetricName, PlatformCapabilities, RawConfig, SAMPLE_INTERVAL, UtilizationType,
    UtilizationWatcher, WatcherConfig, WatcherError, Window,
};

/// `cores` identical cores whose counters advance by `step` on every query.
struct Counter {
    cores: usize,
    step: f64,
    calls: AtomicU32,
}

impl Counter {
    fn new(cores: usize, step: f64) -> Arc<Self> {
        Arc::new(Self {
            cores,
            step,
            calls: AtomicU32::new(0),
        })
    }
}

impl CpuTimesSource for Counter {
    fn per_core_times(&self) -> Result<Vec<CpuTimes>, HostError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let v = f64::from(n) * self.step;
        let core = CpuTimes {
            user: v,
            system: v,
            nice: v,
            idle: v,
            iowait: v,
            irq: v,
            softirq: v,
            steal: v,
        };
        Ok(vec![core; self.cores])
    }

    fn load_average(&self) -> Result<LoadAverage, HostError> {
        Ok(LoadAverage {
            one: 1.5,
            five: 1.0,
            fifteen: 0.5,
        })
    }
}

/// Never answers within any reasonable timeout.
struct Stalled;

impl CpuTimesSource for Stalled {
    fn per_core_times(&self) -> Result<Vec<CpuTimes>, HostError> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(vec![CpuTimes::default()])
    }

    fn load_average(&self) -> Result<LoadAverage, HostError> {
        Err(HostError::Unsupported {
            what: "load average",
            os: "test",
        })
    }
}

/// Fails every query.
struct Broken {
    calls: AtomicU32,
}

impl CpuTimesSource for Broken {
    fn per_core_times(&self) -> Result<Vec<CpuTimes>, HostError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HostError::Parse {
            what: "/proc/stat",
            detail: "scripted failure".to_string(),
        })
    }

    fn load_average(&self) -> Result<LoadAverage, HostError> {
        Err(HostError::Parse {
            what: "getloadavg",
            detail: "scripted failure".to_string(),
        })
    }
}

/// Blocks every query until released.
struct Hung {
    calls: AtomicU32,
    released: AtomicBool,
}

impl CpuTimesSource for Hung {
    fn per_core_times(&self) -> Result<Vec<CpuTimes>, HostError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        while !self.released.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(vec![CpuTimes::default()])
    }

    fn load_average(&self) -> Result<LoadAverage, HostError> {
        Err(HostError::Unsupported {
            what: "load average",
            os: "test",
        })
    }
}

/// `user` tracks wall-clock seconds, so its true rate is 1.0. Every query
/// after the first stalls for `delay` before reading the clock.
struct WallClock {
    start: Instant,
    delay: Duration,
    calls: AtomicU32,
}

impl CpuTimesSource for WallClock {
    fn per_core_times(&self) -> Result<Vec<CpuTimes>, HostError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            std::thread::sleep(self.delay);
        }
        Ok(vec![CpuTimes {
            user: self.start.elapsed().as_secs_f64(),
            ..CpuTimes::default()
        }])
    }

    fn load_average(&self) -> Result<LoadAverage, HostError> {
        Err(HostError::Unsupported {
            what: "load average",
            os: "test",
        })
    }
}

fn raw(load: &[&str], windows: &[&str], types: &[&str]) -> RawConfig {
    RawConfig {
        load_average_windows: load.iter().map(|s| s.to_string()).collect(),
        utilization_windows: windows.iter().map(|s| s.to_string()).collect(),
        utilization_types: types.iter().map(|s| s.to_string()).collect(),
    }
}

fn linux_config(load: &[&str], windows: &[&str], types: &[&str]) -> WatcherConfig {
    let caps = CapabilityTable::builtin().lookup("linux");
    let (config, warnings) = WatcherConfig::configure(&raw(load, windows, types), &caps);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    config
}

fn total(kind: UtilizationType, minutes: u32) -> MetricName {
    MetricName::Utilization {
        kind,
        window: Window::minutes(minutes).unwrap(),
        scope: CpuScope::Total,
    }
}

#[test]
fn end_to_end_one_minute_window() {
    let watcher = UtilizationWatcher::new(
        linux_config(&["avg1", "avg5", "avg15"], &["avg1"], &["idle"]),
        Counter::new(4, 1.0),
    );

    let t0 = Instant::now();
    for i in 0..12u32 {
        watcher.sample_at(t0 + SAMPLE_INTERVAL * i).unwrap();
    }

    let flat = watcher.results().into_result().unwrap().flatten();
    assert_eq!(flat.get("util.idle.1.total"), Some(&Some(0.2)));
    for core in 0..4 {
        assert_eq!(flat.get(&format!("util.idle.1.cpu{core}")), Some(&Some(0.2)));
    }
    assert_eq!(flat.get("load.avg.1"), Some(&Some(1.5)));
    assert_eq!(flat.get("load.avg.5"), Some(&Some(1.0)));
    assert_eq!(flat.get("load.avg.15"), Some(&Some(0.5)));
    // 4 cores + total, plus three load windows.
    assert_eq!(flat.len(), 8);
}

#[test]
fn windows_fill_in_as_history_accumulates() {
    let watcher = UtilizationWatcher::new(
        linux_config(&[], &["avg1", "avg2"], &["user"]),
        Counter::new(1, 0.5),
    );
    let t0 = Instant::now();

    for i in 0..12u32 {
        watcher.sample_at(t0 + SAMPLE_INTERVAL * i).unwrap();
    }
    let first = watcher.results().measurements;
    assert_eq!(first.get(&total(UtilizationType::User, 1)), Some(Some(0.1)));
    assert_eq!(first.get(&total(UtilizationType::User, 2)), Some(None));

    for i in 12..24u32 {
        watcher.sample_at(t0 + SAMPLE_INTERVAL * i).unwrap();
    }
    let second = watcher.results().measurements;
    assert_eq!(second.get(&total(UtilizationType::User, 1)), Some(Some(0.1)));
    assert_eq!(second.get(&total(UtilizationType::User, 2)), Some(Some(0.1)));
}

#[test]
fn store_stays_bounded_by_largest_window() {
    let watcher = UtilizationWatcher::new(linux_config(&[], &["avg1"], &["user"]), Counter::new(2, 1.0));
    let t0 = Instant::now();
    for i in 0..500u32 {
        watcher.sample_at(t0 + SAMPLE_INTERVAL * i).unwrap();
    }
    // Samples at 0s..=60s back from the newest one.
    assert_eq!(watcher.sample_count(), 13);
}

#[test]
fn unsupported_type_narrowed_once() {
    let caps = PlatformCapabilities::new(
        "testos",
        [UtilizationType::User, UtilizationType::Idle],
        false,
    );
    let (config, warnings) =
        WatcherConfig::configure(&raw(&[], &["avg1"], &["user", "steal", "idle"]), &caps);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].to_string(),
        "utilization metric 'steal' not implemented on testos"
    );
    assert!(config.utilization_types().contains(&UtilizationType::User));
    assert!(config.utilization_types().contains(&UtilizationType::Idle));
    assert!(!config.utilization_types().contains(&UtilizationType::Steal));
}

#[test]
fn timed_out_query_is_skipped() {
    let watcher = UtilizationWatcher::with_timing(
        linux_config(&[], &["avg1"], &["user"]),
        Arc::new(Stalled),
        SAMPLE_INTERVAL,
        Duration::from_millis(50),
    );
    let started = Instant::now();
    let err = watcher.sample_once().unwrap_err();
    assert!(matches!(err, WatcherError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_millis(450));
    assert_eq!(watcher.sample_count(), 0);
}

#[test]
fn slow_query_is_stamped_when_it_returns() {
    // 30s interval: a one-minute window looks back two samples.
    let watcher = UtilizationWatcher::with_timing(
        linux_config(&[], &["avg1"], &["user"]),
        Arc::new(WallClock {
            start: Instant::now(),
            delay: Duration::from_millis(300),
            calls: AtomicU32::new(0),
        }),
        Duration::from_secs(30),
        Duration::from_secs(5),
    );

    watcher.sample_once().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    watcher.sample_once().unwrap();

    let rate = watcher
        .results()
        .measurements
        .get(&total(UtilizationType::User, 1))
        .flatten()
        .unwrap();
    assert!((rate - 1.0).abs() < 0.1, "rate {rate} for a 1.0 s/s counter");
}

#[test]
fn hung_query_blocks_new_queries_until_it_returns() {
    let source = Arc::new(Hung {
        calls: AtomicU32::new(0),
        released: AtomicBool::new(false),
    });
    let watcher = UtilizationWatcher::with_timing(
        linux_config(&[], &["avg1"], &["user"]),
        source.clone(),
        SAMPLE_INTERVAL,
        Duration::from_millis(5),
    );

    assert!(matches!(watcher.sample_once(), Err(WatcherError::Timeout(_))));
    for _ in 0..49 {
        assert!(matches!(watcher.sample_once(), Err(WatcherError::Busy)));
    }
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert!(watcher.query_in_flight());

    source.released.store(true, Ordering::SeqCst);
    let deadline = Instant::now() + Duration::from_secs(5);
    while watcher.query_in_flight() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!watcher.query_in_flight());

    watcher.sample_once().unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(watcher.sample_count(), 1);
}

#[test]
fn failed_query_is_reported_and_not_recorded() {
    let watcher = UtilizationWatcher::new(
        linux_config(&["avg1"], &["avg1"], &["user"]),
        Arc::new(Broken {
            calls: AtomicU32::new(0),
        }),
    );
    assert!(matches!(watcher.sample_once(), Err(WatcherError::Query(_))));
    assert_eq!(watcher.sample_count(), 0);

    let report = watcher.results();
    assert!(report.measurements.is_empty());
    let err = report.error.unwrap();
    assert_eq!(err.failures.len(), 2);
    let msg = err.to_string();
    assert!(msg.contains("not collected yet"), "{msg}");
    assert!(msg.contains("load average"), "{msg}");
}

#[test]
fn run_loop_survives_failures_and_stops_on_flag() {
    let source = Arc::new(Broken {
        calls: AtomicU32::new(0),
    });
    let watcher = Arc::new(UtilizationWatcher::with_timing(
        linux_config(&[], &["avg1"], &["user"]),
        source.clone(),
        Duration::from_millis(10),
        Duration::from_secs(1),
    ));
    let running = Arc::new(AtomicBool::new(true));
    let handle = watcher.spawn(Arc::clone(&running)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while source.calls.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    assert!(source.calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(watcher.sample_count(), 0);
}

#[test]
fn run_loop_collects_samples() {
    let watcher = Arc::new(UtilizationWatcher::with_timing(
        linux_config(&[], &["avg1"], &["user"]),
        Counter::new(2, 1.0),
        Duration::from_millis(10),
        Duration::from_secs(1),
    ));
    let running = Arc::new(AtomicBool::new(true));
    let handle = watcher.spawn(Arc::clone(&running)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while watcher.sample_count() < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    assert!(watcher.sample_count() >= 3);
}

#[test]
fn concurrent_results_see_consistent_windows() {
    const READERS: usize = 4;
    const SAMPLES: u32 = 400;

    let watcher = Arc::new(UtilizationWatcher::new(
        linux_config(&[], &["avg1"], &["user", "idle"]),
        Counter::new(2, 1.0),
    ));
    let t0 = Instant::now();
    let barrier = Arc::new(Barrier::new(READERS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let watcher = Arc::clone(&watcher);
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                barrier.wait();
                let mut seen = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let report = watcher.results();
                    for (name, value) in report.measurements.iter() {
                        // Every consistent latest/reference pair is exactly
                        // 1 unit per 5s apart.
                        if let Some(v) = value {
                            assert_eq!(*v, 0.2, "{name} paired mismatched snapshots");
                            seen += 1;
                        }
                    }
                }
                seen
            })
        })
        .collect();

    barrier.wait();
    for i in 0..SAMPLES {
        watcher.sample_at(t0 + SAMPLE_INTERVAL * i).unwrap();
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        reader.join().unwrap();
    }

    let report = watcher.results();
    assert!(report.error.is_none());
    assert_eq!(
        report.measurements.get(&total(UtilizationType::Idle, 1)),
        Some(Some(0.2))
    );
}

#[test]
fn builtin_defaults_configure_for_current_platform() {
    let caps = CapabilityTable::builtin().current();
    let (config, _) = WatcherConfig::configure(&RawConfig::default(), &caps);
    for kind in config.utilization_types() {
        assert!(caps.supports(*kind));
    }
}

#[test]
#[ignore] // Run with: cargo test -- --ignored
fn host_watcher_produces_measurements() {
    let caps = CapabilityTable::builtin().current();
    let (config, _) = WatcherConfig::configure(&RawConfig::default(), &caps);
    let watcher = UtilizationWatcher::new(config, Arc::new(HostCpuSource));
    watcher.sample_once().unwrap();
    watcher.sample_once().unwrap();
    let report = watcher.results();
    assert!(!report.measurements.is_empty());
}
