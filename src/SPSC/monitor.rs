use std::fmt;
use std::path::Path;
use std::sync::atomic::Ordering::{Acquire, Relaxed};

use super::lifecycle::RingMapping;

/// Read-only attachment used to observe a ring without disturbing it.
pub struct RingMonitor {
    pub(crate) mapping: RingMapping,
}

impl RingMonitor {
    pub(crate) fn new(mapping: RingMapping) -> Self {
        Self { mapping }
    }

    pub fn stats(&self) -> RingStats {
        RingStats::capture(&self.mapping)
    }

    pub fn path(&self) -> &Path {
        &self.mapping.path
    }
}

impl fmt::Debug for RingMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_ring_monitor(self, f)
    }
}

/// Point-in-time snapshot of a ring's cursors and counters.
///
/// Fields owned by different sides are read independently, so the snapshot is
/// not atomic across pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingStats {
    pub path: String,
    pub depth: u64,
    pub flow_control: bool,
    pub flow_control_timeout_ns: u64,
    pub upstream_pending_bytes: u64,
    pub put: u64,
    pub get: u64,
    pub put_bytes: u64,
    pub get_bytes: u64,
    pub put_timestamp_ns: u64,
    pub get_timestamp_ns: u64,
}

impl RingStats {
    pub(crate) fn capture(mapping: &RingMapping) -> Self {
        let view = &mapping.view;
        let put_page = view.put_page();
        let get_page = view.get_page();
        Self {
            path: view.stored_path(),
            depth: view.depth(),
            flow_control: view.flow_control(),
            flow_control_timeout_ns: view.flow_control_timeout_ns(),
            upstream_pending_bytes: view.upstream_pending_bytes(),
            put: put_page.cursor.load(Acquire),
            get: get_page.cursor.load(Acquire),
            put_bytes: put_page.bytes.load(Relaxed),
            get_bytes: get_page.bytes.load(Relaxed),
            put_timestamp_ns: put_page.last_timestamp_ns.load(Relaxed),
            get_timestamp_ns: get_page.last_timestamp_ns.load(Relaxed),
        }
    }

    /// Records queued between producer and consumer.
    pub fn occupancy(&self) -> i64 {
        self.put.wrapping_sub(self.get) as i64
    }

    pub fn pending_bytes(&self) -> i64 {
        self.put_bytes.wrapping_sub(self.get_bytes) as i64
    }

    /// How far the consumer's last packet timestamp trails the producer's.
    pub fn lag_ns(&self) -> i64 {
        self.put_timestamp_ns.wrapping_sub(self.get_timestamp_ns) as i64
    }

    /// Single-line JSON rendering for scripted collection.
    pub fn to_json_line(&self) -> String {
        format!(
            "{{\"ring\":\"{}\",\"depth\":{},\"flowControl\":{},\"timeoutNS\":{},\"UpstreamByte\":{},\"Put\":{},\"Get\":{},\"dPutGet\":{},\"PutByte\":{},\"GetByte\":{},\"dByte\":{},\"PutPktTS\":{},\"GetPktTS\":{},\"dPktTS\":{}}}",
            json_escape(&self.path),
            self.depth,
            self.flow_control,
            self.flow_control_timeout_ns,
            self.upstream_pending_bytes,
            self.put,
            self.get,
            self.occupancy(),
            self.put_bytes,
            self.get_bytes,
            self.pending_bytes(),
            self.put_timestamp_ns,
            self.get_timestamp_ns,
            self.lag_ns()
        )
    }
}

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// hh:mm:ss.mmm.uuu.nnn of an epoch nanosecond timestamp (UTC, time of day only).
pub fn format_time_of_day(ts: u64) -> String {
    let nsec = ts % 1000;
    let usec = (ts / 1_000) % 1000;
    let msec = (ts / 1_000_000) % 1000;
    let sec = (ts / 1_000_000_000) % 60;
    let min = (ts / 60_000_000_000) % 60;
    let hour = (ts / 3_600_000_000_000) % 24;
    format!(
        "{:02}:{:02}:{:02}.{:03}.{:03}.{:03}",
        hour, min, sec, msec, usec, nsec
    )
}

impl fmt::Display for RingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.path;
        writeln!(
            f,
            "RING[{:<50}] : Upstream: {:>20} Bytes   ({:>10.2} GB)",
            p,
            self.upstream_pending_bytes,
            self.upstream_pending_bytes as f64 / 1e9
        )?;
        writeln!(f, "RING[{:<50}] :", p)?;
        writeln!(
            f,
            "RING[{:<50}] : Put     : {:>20} Pkts   ({:>10.2} Bn)",
            p,
            self.put,
            self.put as f64 / 1e9
        )?;
        writeln!(
            f,
            "RING[{:<50}] : Get     : {:>20} Pkts   ({:>10.2} Bn)",
            p,
            self.get,
            self.get as f64 / 1e9
        )?;
        writeln!(f, "RING[{:<50}] :           {:>20}", p, self.occupancy())?;
        writeln!(
            f,
            "RING[{:<50}] : PutByte : {:>20} Bytes  ({:>10.2} GB)",
            p,
            self.put_bytes,
            self.put_bytes as f64 / 1e9
        )?;
        writeln!(
            f,
            "RING[{:<50}] : GetByte : {:>20} Bytes  ({:>10.2} GB)",
            p,
            self.get_bytes,
            self.get_bytes as f64 / 1e9
        )?;
        writeln!(f, "RING[{:<50}] :           {:>20}", p, self.pending_bytes())?;
        writeln!(
            f,
            "RING[{:<50}] : PutTS   : {:>20} Epoch  ({})",
            p,
            self.put_timestamp_ns,
            format_time_of_day(self.put_timestamp_ns)
        )?;
        writeln!(
            f,
            "RING[{:<50}] : GetTS   : {:>20} Epoch  ({})",
            p,
            self.get_timestamp_ns,
            format_time_of_day(self.get_timestamp_ns)
        )?;
        write!(f, "RING[{:<50}] :           {:>20}", p, self.lag_ns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RingStats {
        RingStats {
            path: "/dev/shm/r0".into(),
            depth: 1024,
            flow_control: true,
            flow_control_timeout_ns: 1_000_000,
            upstream_pending_bytes: 4096,
            put: 10,
            get: 7,
            put_bytes: 1000,
            get_bytes: 700,
            put_timestamp_ns: 3_723_004_005_006,
            get_timestamp_ns: 3_723_000_000_000,
        }
    }

    #[test]
    fn derived_counters() {
        let s = sample();
        assert_eq!(s.occupancy(), 3);
        assert_eq!(s.pending_bytes(), 300);
        assert_eq!(s.lag_ns(), 4_005_006);
    }

    #[test]
    fn time_of_day_format() {
        // 1h 2m 3s 4ms 5us 6ns
        assert_eq!(format_time_of_day(3_723_004_005_006), "01:02:03.004.005.006");
    }

    #[test]
    fn json_line_is_single_object() {
        let line = sample().to_json_line();
        assert!(line.starts_with("{\"ring\":\"/dev/shm/r0\""));
        assert!(line.contains("\"UpstreamByte\":4096,"));
        assert!(line.contains("\"dPutGet\":3"));
        assert!(line.ends_with('}'));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn json_line_escapes_path() {
        let mut s = sample();
        s.path = "/tmp/a\"b\\c\u{1}\u{7f}".into();
        let line = s.to_json_line();
        assert!(line.starts_with("{\"ring\":\"/tmp/a\\\"b\\\\c\\u0001\u{7f}\","));
    }

    #[test]
    fn display_has_one_line_per_counter() {
        let text = sample().to_string();
        assert_eq!(text.lines().count(), 11);
        assert!(text.lines().next().unwrap().contains("Upstream:                 4096 Bytes"));
    }
}
