//! `cpuwatch watch` — sample in the background and print windowed results.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpuwatch_core::{CapabilityTable, HostCpuSource, RawConfig, UtilizationWatcher, WatcherConfig};

use super::{format_value, parse_duration, split_list};

pub struct WatchCommandConfig<'a> {
    pub config_path: Option<&'a str>,
    pub load: Option<&'a str>,
    pub util: Option<&'a str>,
    pub types: Option<&'a str>,
    pub export_every: &'a str,
    pub duration: Option<&'a str>,
}

/// Run the watch command.
pub fn run(cfg: WatchCommandConfig<'_>) {
    let export_every = parse_duration(cfg.export_every).unwrap_or_else(|e| fail(&e));
    let max_duration = cfg
        .duration
        .map(|d| parse_duration(d).unwrap_or_else(|e| fail(&e)));

    let raw = resolve_config(&cfg).unwrap_or_else(|e| fail(&e));
    let caps = CapabilityTable::builtin().current();
    let (config, warnings) = WatcherConfig::configure(&raw, &caps);
    for warning in &warnings {
        eprintln!("Warning: {warning}");
    }
    if config.is_empty() {
        fail(&format!("nothing to collect on {}", caps.os));
    }

    let watcher = Arc::new(UtilizationWatcher::new(config, Arc::new(HostCpuSource)));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        fail(&format!("setting Ctrl+C handler: {e}"));
    }

    print_header(watcher.config(), export_every, max_duration);

    let sampler = match watcher.spawn(Arc::clone(&running)) {
        Ok(handle) => handle,
        Err(e) => fail(&format!("starting sampler: {e}")),
    };

    let start = Instant::now();
    let mut next_export = start.checked_add(export_every);
    while running.load(Ordering::SeqCst) {
        if let Some(max) = max_duration
            && start.elapsed() >= max
        {
            break;
        }
        if let Some(due) = next_export
            && Instant::now() >= due
        {
            export(&watcher, start.elapsed());
            next_export = due.checked_add(export_every);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    running.store(false, Ordering::SeqCst);
    if sampler.join().is_err() {
        eprintln!("Error: sampler thread panicked");
    }

    println!();
    println!("Final results after {:.0}s:", start.elapsed().as_secs_f64());
    export(&watcher, start.elapsed());
}

/// Config file (or agent defaults) with command-line lists layered on top.
fn resolve_config(cfg: &WatchCommandConfig<'_>) -> Result<RawConfig, String> {
    let mut raw = match cfg.config_path {
        Some(path) => RawConfig::load_from_path(Path::new(path)).map_err(|e| e.to_string())?,
        None => RawConfig::default(),
    };
    if let Some(load) = cfg.load {
        raw.load_average_windows = split_list(load);
    }
    if let Some(util) = cfg.util {
        raw.utilization_windows = split_list(util);
    }
    if let Some(types) = cfg.types {
        raw.utilization_types = split_list(types);
    }
    Ok(raw)
}

fn print_header(config: &WatcherConfig, export_every: Duration, max_duration: Option<Duration>) {
    let join = |items: Vec<String>| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join(", ")
        }
    };

    println!("Watching CPU");
    println!(
        "  Load:      {}",
        join(
            config
                .load_average_windows()
                .iter()
                .map(|w| format!("avg{}", w.as_minutes()))
                .collect()
        )
    );
    println!(
        "  Windows:   {}",
        join(
            config
                .utilization_windows()
                .iter()
                .map(|w| format!("avg{w}"))
                .collect()
        )
    );
    println!(
        "  Types:     {}",
        join(
            config
                .utilization_types()
                .iter()
                .map(ToString::to_string)
                .collect()
        )
    );
    println!("  Export:    every {}s", export_every.as_secs_f64());
    match max_duration {
        Some(d) => println!("  Duration:  {}s", d.as_secs()),
        None => println!("  Duration:  until Ctrl+C"),
    }
    println!();
}

fn export(watcher: &UtilizationWatcher, elapsed: Duration) {
    let report = watcher.results();
    println!(
        "[{:>6.0}s] {} samples",
        elapsed.as_secs_f64(),
        watcher.sample_count()
    );
    for (name, value) in report.measurements.flatten() {
        println!("  {name:<28} {}", format_value(value));
    }
    if let Some(err) = report.error {
        eprintln!("  {err}");
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}
