use cpuwatch_core::{CpuTimesSource, HostCpuSource};

pub fn run() {
    let source = HostCpuSource;
    let mut failed = false;

    match source.per_core_times() {
        Ok(cores) => {
            println!(
                "{:<6} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
                "core", "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal"
            );
            for (i, c) in cores.iter().enumerate() {
                println!(
                    "{:<6} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2}",
                    format!("cpu{i}"),
                    c.user,
                    c.nice,
                    c.system,
                    c.idle,
                    c.iowait,
                    c.irq,
                    c.softirq,
                    c.steal
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            failed = true;
        }
    }

    match source.load_average() {
        Ok(load) => println!(
            "\nload average: {:.2} {:.2} {:.2}",
            load.one, load.five, load.fifteen
        ),
        Err(e) => {
            eprintln!("\nload average unavailable: {e}");
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
}
