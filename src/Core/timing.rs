//! Cycle-counter timing used for busy waits on both sides of the ring.
//!
//! On x86_64 the time stamp counter is read directly and converted to
//! nanoseconds with a ratio calibrated once per process. Elsewhere a monotonic
//! nanosecond clock stands in for the counter.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

const CALIBRATION_WINDOW: Duration = Duration::from_millis(2);
const PAUSES_PER_POLL: usize = 4;

static CYCLES_PER_NS: OnceLock<f64> = OnceLock::new();

#[cfg(not(target_arch = "x86_64"))]
static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Current value of the cycle counter.
#[inline]
pub fn read_cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        CLOCK_EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

fn calibrate() -> f64 {
    if cfg!(not(target_arch = "x86_64")) {
        return 1.0;
    }

    let t0 = Instant::now();
    let c0 = read_cycles();
    while t0.elapsed() < CALIBRATION_WINDOW {
        std::hint::spin_loop();
    }
    let c1 = read_cycles();
    let ns = t0.elapsed().as_nanos() as f64;

    let ratio = c1.wrapping_sub(c0) as f64 / ns;
    if ratio.is_finite() && ratio > 0.0 {
        log::debug!("cycle counter calibrated at {:.3} cycles/ns", ratio);
        ratio
    } else {
        log::warn!("cycle counter calibration failed, assuming 1 cycle/ns");
        1.0
    }
}

/// Cycles per nanosecond. The first call calibrates (a couple of milliseconds),
/// so ring attach calls this before any hot-path use.
#[inline]
pub fn cycles_per_ns() -> f64 {
    *CYCLES_PER_NS.get_or_init(calibrate)
}

#[inline]
pub fn ns_to_cycles(ns: u64) -> u64 {
    (ns as f64 * cycles_per_ns()) as u64
}

#[inline]
pub fn cycles_to_ns(cycles: u64) -> u64 {
    (cycles as f64 / cycles_per_ns()) as u64
}

/// Spin for roughly `ns` nanoseconds without entering the kernel.
pub fn ndelay(ns: u64) {
    let target = read_cycles().saturating_add(ns_to_cycles(ns));
    while read_cycles() < target {
        for _ in 0..PAUSES_PER_POLL {
            std::hint::spin_loop();
        }
    }
}

/// Elapsed time in nanoseconds measured on the cycle counter.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: u64,
}

impl Stopwatch {
    #[inline]
    pub fn start() -> Self {
        Self {
            start: read_cycles(),
        }
    }

    #[inline]
    pub fn elapsed_ns(&self) -> u64 {
        cycles_to_ns(read_cycles().saturating_sub(self.start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_are_inverse_within_rounding() {
        let cycles = ns_to_cycles(1_000_000);
        let back = cycles_to_ns(cycles);
        assert!((back as i64 - 1_000_000).abs() < 1_000, "got {back}");
    }

    #[test]
    fn ndelay_waits_at_least_roughly_the_duration() {
        let t0 = Instant::now();
        ndelay(2_000_000);
        // calibration is approximate; allow generous slack on the low side
        assert!(t0.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn stopwatch_tracks_wall_clock() {
        let watch = Stopwatch::start();
        std::thread::sleep(Duration::from_millis(5));
        let ns = watch.elapsed_ns();
        assert!(ns >= 3_000_000, "elapsed {ns}");
        assert!(ns < 5_000_000_000, "elapsed {ns}");
    }
}
