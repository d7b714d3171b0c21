// Prints counters of a ring without attaching as producer or consumer.
use fmadring::RingBuilder;
use std::env;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut ring_path = None;
    let mut json = false;
    let mut depth = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-i" => {
                i += 1;
                ring_path = args.get(i).cloned();
            }
            "--depth" => {
                i += 1;
                depth = args.get(i).and_then(|s| s.parse::<u64>().ok());
            }
            "--json" => json = true,
            "--help" => {
                eprintln!("Usage: {} -i <ring file> [--depth <n>] [--json]", args[0]);
                return;
            }
            _ => {}
        }
        i += 1;
    }

    let Some(ring_path) = ring_path else {
        eprintln!("specify ring interface with -i <path to ring file>");
        std::process::exit(1);
    };

    let mut builder = RingBuilder::new(&ring_path);
    if let Some(depth) = depth {
        builder = builder.with_depth(depth);
    }

    let monitor = match builder.build_monitor() {
        Ok(m) => m,
        Err(e) => {
            eprintln!("failed to open ring {}: {}", ring_path, e);
            std::process::exit(1);
        }
    };

    let stats = monitor.stats();
    if json {
        println!("{}", stats.to_json_line());
    } else {
        println!("{}", stats);
    }
}
