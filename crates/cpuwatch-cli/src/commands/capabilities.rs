use cpuwatch_core::{CapabilityTable, PlatformCapabilities};

pub fn run(os: Option<&str>, all: bool) {
    let table = CapabilityTable::builtin();

    if all {
        let mut platforms: Vec<&PlatformCapabilities> = table.platforms().collect();
        platforms.sort_by(|a, b| a.os.cmp(&b.os));
        for caps in platforms {
            print_platform(caps);
        }
        return;
    }

    let caps = match os {
        Some(os) => table.lookup(os),
        None => table.current(),
    };
    print_platform(&caps);
}

fn print_platform(caps: &PlatformCapabilities) {
    let types: Vec<&str> = caps.utilization_types.iter().map(|t| t.as_str()).collect();
    println!("{}", caps.os);
    println!(
        "  utilization types: {}",
        if types.is_empty() {
            "(none)".to_string()
        } else {
            types.join(", ")
        }
    );
    println!(
        "  load average:      {}",
        if caps.load_average { "yes" } else { "no" }
    );
}
