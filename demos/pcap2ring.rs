// Reads a pcap stream on stdin and publishes every packet into a ring.
use fmadring::pcap::PcapReader;
use fmadring::Core::affinity;
use fmadring::SPSC::SLOT_PAYLOAD_CAPACITY;
use fmadring::{RingBuilder, RingError};
use std::env;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn usage(prog: &str) -> ! {
    eprintln!("Usage: {} -i <ring file> [--cpu <n>] [--flow-control] [--reset] < input.pcap", prog);
    std::process::exit(1);
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut ring_path = None;
    let mut cpu = None;
    let mut flow_control = false;
    let mut reset = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-i" => {
                i += 1;
                ring_path = Some(args.get(i).cloned().unwrap_or_else(|| usage(&args[0])));
            }
            "--cpu" => {
                i += 1;
                cpu = args.get(i).and_then(|s| s.parse::<usize>().ok());
                if cpu.is_none() {
                    usage(&args[0]);
                }
            }
            "--flow-control" => flow_control = true,
            "--reset" => reset = true,
            "--help" => usage(&args[0]),
            other => eprintln!("ignoring unknown argument {}", other),
        }
        i += 1;
    }

    let Some(ring_path) = ring_path else {
        eprintln!("Missing arguments `-i <ring file>`");
        usage(&args[0]);
    };

    if let Some(cpu) = cpu {
        eprintln!("Will pin thread to CPU {}.", cpu);
        if let Err(e) = affinity::pin_current_thread(cpu) {
            eprintln!("failed to pin to CPU {}: {}", cpu, e);
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let stdin = io::stdin();
    let mut reader = match PcapReader::new(stdin.lock()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to read pcap header: {}", e);
            std::process::exit(2);
        }
    };
    eprintln!(
        "{} PCAP",
        if reader.time_scale() == 1 { "Nano" } else { "USec" }
    );

    let mut producer = match RingBuilder::new(&ring_path)
        .with_reset(reset)
        .with_flow_control(flow_control, Duration::from_millis(1))
        .build_producer()
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to open ring {}: {}", ring_path, e);
            std::process::exit(3);
        }
    };

    let mut buf = vec![0u8; 64 * 1024];
    let mut last_ts = 0u64;
    let mut sent = 0u64;
    let mut skipped = 0u64;

    while !stop.load(Ordering::SeqCst) {
        let header = match reader.next_record(&mut buf) {
            Ok(Some(h)) => h,
            Ok(None) => {
                eprintln!("Reached end of PCAP file.");
                break;
            }
            Err(e) => {
                eprintln!("pcap read stopped: {}", e);
                break;
            }
        };

        let ts = header.timestamp_ns(reader.time_scale());
        let len = header.length_capture as usize;
        if len > SLOT_PAYLOAD_CAPACITY {
            skipped += 1;
            continue;
        }

        // retry under backpressure until the consumer drains or we are stopped
        loop {
            match producer.send(ts, header.wire_length(), header.port(), &buf[..len]) {
                Ok(_) => {
                    sent += 1;
                    break;
                }
                Err(RingError::BackpressureTimeout { .. }) if !stop.load(Ordering::SeqCst) => {}
                Err(e) => {
                    eprintln!("send failed: {}", e);
                    break;
                }
            }
        }
        last_ts = ts;
    }

    if let Err(e) = producer.send_end_of_stream(last_ts) {
        eprintln!("failed to send end of stream: {}", e);
    }

    eprintln!("TotalPkt: {} Skipped(too large): {}", sent, skipped);
}
