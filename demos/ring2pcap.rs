// Drains a ring to a nanosecond pcap on stdout until end of stream or Ctrl-C.
use fmadring::pcap::{PcapFileHeader, PcapWriter, LINK_ETHERNET};
use fmadring::Core::{affinity, timing};
use fmadring::{Received, RingBuilder};
use std::env;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn usage(prog: &str) -> ! {
    eprintln!("Usage: {} -i <ring file> [--cpu <n>] [--no-sleep] > out.pcap", prog);
    std::process::exit(1);
}

fn main() -> io::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut ring_path = None;
    let mut cpu = None;
    let mut no_sleep = false;

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
            "--no-sleep" => no_sleep = true,
            "--help" => usage(&args[0]),
            other => eprintln!("ignoring unknown argument {}", other),
        }
        i += 1;
    }

    let Some(ring_path) = ring_path else {
        eprintln!("specify ring interface with -i <path to ring file>");
        usage(&args[0]);
    };

    if let Some(cpu) = cpu {
        if let Err(e) = affinity::pin_current_thread(cpu) {
            eprintln!("failed to pin to CPU {}: {}", cpu, e);
        }
    }

    let mut consumer = match RingBuilder::new(&ring_path)
        .with_wait_for_data(false)
        .build_consumer()
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to open ring {}: {}", ring_path, e);
            std::process::exit(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        eprintln!("ctrl-c");
        s.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let stdout = io::stdout();
    let mut writer = PcapWriter::new(
        BufWriter::new(stdout.lock()),
        PcapFileHeader::nanosecond(LINK_ETHERNET),
    )?;

    let mut buf = vec![0u8; 16 * 1024];
    let mut fcs_errors = 0u64;

    while !stop.load(Ordering::SeqCst) {
        match consumer.receive(&mut buf) {
            Ok(Received::Packet(info)) => {
                if info.is_fcs_error() {
                    fcs_errors += 1;
                }
                writer.write_packet(&info, &buf[..info.length_capture as usize])?;
            }
            Ok(Received::NoData) => {
                if no_sleep {
                    timing::ndelay(100);
                } else {
                    std::thread::yield_now();
                }
            }
            Ok(Received::EndOfStream { .. }) => break,
            Err(e) => {
                eprintln!("receive failed: {}", e);
                break;
            }
        }
    }
    writer.flush()?;

    eprintln!(
        "TotalPkt: {} TotalByte:{} TotalFCSError:{}",
        writer.packets(),
        writer.bytes(),
        fcs_errors
    );
    io::stderr().flush()?;
    Ok(())
}
