// Drains a ring onto a network interface through a raw packet socket.
// Frames longer than the interface MTU are cut to fit.

#[cfg(target_os = "linux")]
mod raw {
    use std::ffi::CString;
    use std::io;
    use std::mem::{size_of, zeroed};

    const ETH_HLEN: usize = 14;

    /// AF_PACKET socket bound to one interface.
    pub struct RawSocket {
        fd: libc::c_int,
    }

    impl RawSocket {
        pub fn bind(iface: &str) -> io::Result<Self> {
            let name = CString::new(iface)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name"))?;
            let protocol = (libc::ETH_P_ALL as u16).to_be();

            let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol as libc::c_int) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let sock = Self { fd };

            let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
            if index == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no index for interface `{}`", iface),
                ));
            }

            let mut addr: libc::sockaddr_ll = unsafe { zeroed() };
            addr.sll_family = libc::AF_PACKET as u16;
            addr.sll_protocol = protocol;
            addr.sll_ifindex = index as libc::c_int;
            let rc = unsafe {
                libc::bind(
                    sock.fd,
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            log::info!("bound raw socket to {} (index {})", iface, index);
            Ok(sock)
        }

        /// Largest frame the interface accepts: MTU plus the Ethernet header.
        pub fn frame_limit(&self, iface: &str) -> io::Result<usize> {
            let mut req: libc::ifreq = unsafe { zeroed() };
            let bytes = iface.as_bytes();
            if bytes.len() >= req.ifr_name.len() {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"));
            }
            for (dst, &src) in req.ifr_name.iter_mut().zip(bytes) {
                *dst = src as libc::c_char;
            }
            if unsafe { libc::ioctl(self.fd, libc::SIOCGIFMTU as _, &mut req as *mut libc::ifreq) } < 0 {
                return Err(io::Error::last_os_error());
            }
            let mtu = unsafe { req.ifr_ifru.ifru_mtu };
            Ok(mtu as usize + ETH_HLEN)
        }

        pub fn send(&self, frame: &[u8]) -> io::Result<usize> {
            let n = unsafe {
                libc::send(self.fd, frame.as_ptr() as *const libc::c_void, frame.len(), 0)
            };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        }
    }

    impl Drop for RawSocket {
        fn drop(&mut self) {
            if unsafe { libc::close(self.fd) } != 0 {
                log::warn!("socket close failed: {}", io::Error::last_os_error());
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod app {
    use super::raw::RawSocket;
    use fmadring::Core::{affinity, timing};
    use fmadring::SPSC::SLOT_PAYLOAD_CAPACITY;
    use fmadring::{Received, RingBuilder};
    use std::env;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Stats {
        received_pkt: u64,
        received_byte: u64,
        sent_pkt: u64,
        sent_byte: u64,
        failed_pkt: u64,
        failed_byte: u64,
        truncated_pkt: u64,
        truncated_byte: u64,
    }

    impl Stats {
        fn print(&self) {
            eprintln!("\nByte counts are in capture length (not wire length) where applicable.");
            eprintln!("Received: {} packets ({}B)", self.received_pkt, self.received_byte);
            eprintln!("Sent: {} packets ({}B)", self.sent_pkt, self.sent_byte);
            eprintln!("Failed to send: {} packets ({}B)", self.failed_pkt, self.failed_byte);
            eprintln!(
                "Truncated: {} packets ({}B lost in total)",
                self.truncated_pkt, self.truncated_byte
            );
        }
    }

    fn usage(prog: &str) -> ! {
        eprintln!(
            "Usage: {} -i <ring file> -e <interface> [--cpu <n>] [--mtu <bytes>] [--no-sleep]",
            prog
        );
        std::process::exit(1);
    }

    pub fn run() {
        env_logger::init();

        let args: Vec<String> = env::args().collect();
        let mut ring_path = None;
        let mut iface = None;
        let mut cpu = None;
        let mut mtu = None;
        let mut no_sleep = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-i" => {
                    i += 1;
                    ring_path = Some(args.get(i).cloned().unwrap_or_else(|| usage(&args[0])));
                }
                "-e" => {
                    i += 1;
                    iface = Some(args.get(i).cloned().unwrap_or_else(|| usage(&args[0])));
                }
                "--cpu" => {
                    i += 1;
                    cpu = args.get(i).and_then(|s| s.parse::<usize>().ok());
                    if cpu.is_none() {
                        usage(&args[0]);
                    }
                }
                "--mtu" => {
                    i += 1;
                    mtu = args.get(i).and_then(|s| s.parse::<usize>().ok());
                    if mtu.is_none() {
                        usage(&args[0]);
                    }
                }
                "--no-sleep" => no_sleep = true,
                "--help" => usage(&args[0]),
                other => {
                    eprintln!("Unrecognized argument: {}", other);
                    usage(&args[0]);
                }
            }
            i += 1;
        }

        let Some(ring_path) = ring_path else {
            eprintln!("Specify ring buffer with `-i <path to ring file>`");
            usage(&args[0]);
        };
        let Some(iface) = iface else {
            eprintln!("Specify an interface with `-e <interface name>`");
            usage(&args[0]);
        };

        if let Some(cpu) = cpu {
            eprintln!("Will pin thread to CPU {}.", cpu);
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
                eprintln!("Failed to open FMAD ring: `{}`: {}", ring_path, e);
                std::process::exit(1);
            }
        };

        let socket = match RawSocket::bind(&iface) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Failed to open socket on `{}`: {}", iface, e);
                std::process::exit(1);
            }
        };

        let limit = match mtu {
            Some(m) => m,
            None => match socket.frame_limit(&iface) {
                Ok(m) => m,
                Err(e) => {
                    eprintln!("Failed to get MTU of interface: `{}` ({})", iface, e);
                    std::process::exit(1);
                }
            },
        };
        eprintln!("Packets will be truncated to MTU: {}B", limit);

        let stop = Arc::new(AtomicBool::new(false));
        let s = stop.clone();
        ctrlc::set_handler(move || {
            s.store(true, Ordering::SeqCst);
        })
        .expect("Error setting Ctrl-C handler");

        let mut buf = vec![0u8; SLOT_PAYLOAD_CAPACITY];
        let mut stats = Stats::default();
        eprintln!("Ring receive loop starting...");

        while !stop.load(Ordering::SeqCst) {
            match consumer.receive(&mut buf) {
                Ok(Received::Packet(info)) => {
                    let cap = info.length_capture as usize;
                    stats.received_pkt += 1;
                    stats.received_byte += cap as u64;

                    let len = if cap > limit {
                        stats.truncated_pkt += 1;
                        stats.truncated_byte += (cap - limit) as u64;
                        limit
                    } else {
                        cap
                    };

                    match socket.send(&buf[..len]) {
                        Ok(n) => {
                            stats.sent_pkt += 1;
                            stats.sent_byte += n as u64;
                        }
                        Err(e) => {
                            log::debug!("send failed: {}", e);
                            stats.failed_pkt += 1;
                            stats.failed_byte += len as u64;
                        }
                    }
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

        stats.print();
    }
}

#[cfg(target_os = "linux")]
fn main() {
    app::run();
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("ring2eth needs AF_PACKET sockets and only runs on Linux");
    std::process::exit(1);
}
