//! CLI for cpuwatch — rolling CPU utilization and load averages.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cpuwatch")]
#[command(about = "cpuwatch — rolling CPU utilization and load averages")]
#[command(version = cpuwatch_core::VERSION)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which utilization types and load averages a platform supports
    Capabilities {
        /// Platform name as reported by Rust (linux, macos, windows, freebsd, ...)
        #[arg(long)]
        os: Option<String>,

        /// List every known platform
        #[arg(long, conflicts_with = "os")]
        all: bool,
    },

    /// Read per-core CPU time counters and the load average once
    Sample,

    /// Sample continuously and print windowed results on a fixed period
    Watch {
        /// JSON config file with load/utilization windows and types
        #[arg(long)]
        config: Option<String>,

        /// Comma-separated load average windows (avg1,avg5,avg15)
        #[arg(long)]
        load: Option<String>,

        /// Comma-separated utilization windows in minutes (e.g. avg1,avg5)
        #[arg(long)]
        util: Option<String>,

        /// Comma-separated utilization types (user,system,idle,iowait,...)
        #[arg(long)]
        types: Option<String>,

        /// How often to print results (e.g. "30s", "1m")
        #[arg(long, default_value = "60s")]
        export_every: String,

        /// Stop after this long (e.g. "5m", "1h"); default: until Ctrl+C
        #[arg(long)]
        duration: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Capabilities { os, all } => commands::capabilities::run(os.as_deref(), all),
        Commands::Sample => commands::sample::run(),
        Commands::Watch {
            config,
            load,
            util,
            types,
            export_every,
            duration,
        } => commands::watch::run(commands::watch::WatchCommandConfig {
            config_path: config.as_deref(),
            load: load.as_deref(),
            util: util.as_deref(),
            types: types.as_deref(),
            export_every: &export_every,
            duration: duration.as_deref(),
        }),
    }
}
