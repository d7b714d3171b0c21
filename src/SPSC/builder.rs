use std::path::{Path, PathBuf};
use std::time::Duration;

use super::layout::{descriptor_size, DEFAULT_DEPTH};
use super::{lifecycle, RingConsumer, RingMonitor, RingProducer, WaitPolicy};
use crate::error::{Result, RingError};

pub const DEFAULT_RING_PATH: &str = "/dev/shm/fmadring0";
pub const DEFAULT_FLOW_CONTROL_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration for attaching to a ring as producer, consumer or monitor.
#[derive(Debug, Clone)]
pub struct RingBuilder {
    pub(crate) path: PathBuf,
    pub(crate) depth: u64,
    pub(crate) reset: bool,
    pub(crate) flow_control: bool,
    pub(crate) flow_control_timeout_ns: u64,
    pub(crate) wait_for_data: bool,
    pub(crate) wait_policy: WaitPolicy,
    pub(crate) port_passthrough: bool,
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_RING_PATH),
            depth: DEFAULT_DEPTH,
            reset: false,
            flow_control: false,
            flow_control_timeout_ns: DEFAULT_FLOW_CONTROL_TIMEOUT.as_nanos() as u64,
            wait_for_data: true,
            wait_policy: WaitPolicy::default(),
            port_passthrough: false,
        }
    }
}

impl RingBuilder {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Number of slots. Must be a power of two; every attached process must agree.
    pub fn with_depth(mut self, depth: u64) -> Self {
        self.depth = depth;
        self
    }

    /// Producer only: reinitialise the ring even if its version is valid.
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Producer only: bound the queue to `depth - 1` records, failing a send
    /// that cannot get space within `timeout`.
    pub fn with_flow_control(mut self, enabled: bool, timeout: Duration) -> Self {
        self.flow_control = enabled;
        self.flow_control_timeout_ns = timeout.as_nanos().min(u64::MAX as u128) as u64;
        self
    }

    /// Consumer only: default for whether `receive` waits when the ring is empty.
    pub fn with_wait_for_data(mut self, wait: bool) -> Self {
        self.wait_for_data = wait;
        self
    }

    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// Producer only: publish the caller's port instead of `PUBLISHED_PORT`.
    pub fn with_port_passthrough(mut self, enabled: bool) -> Self {
        self.port_passthrough = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.depth < 2 || !self.depth.is_power_of_two() {
            return Err(RingError::Config(format!(
                "depth must be a power of two and at least 2, got {}",
                self.depth
            )));
        }
        if descriptor_size(self.depth) > u32::MAX as u64 {
            return Err(RingError::Config(format!(
                "depth {} gives a descriptor larger than 4 GiB",
                self.depth
            )));
        }
        Ok(())
    }

    pub fn build_producer(self) -> Result<RingProducer> {
        self.validate()?;
        let mapping = lifecycle::open_for_produce(&self)?;
        Ok(RingProducer::new(mapping, &self))
    }

    pub fn build_consumer(self) -> Result<RingConsumer> {
        self.validate()?;
        let mapping = lifecycle::open_for_consume(&self)?;
        Ok(RingConsumer::new(mapping, &self))
    }

    pub fn build_monitor(self) -> Result<RingMonitor> {
        self.validate()?;
        let mapping = lifecycle::open_for_monitor(&self)?;
        Ok(RingMonitor::new(mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_tools() {
        let b = RingBuilder::default();
        assert_eq!(b.depth, 1024);
        assert!(!b.reset);
        assert!(!b.flow_control);
        assert_eq!(b.flow_control_timeout_ns, 1_000_000);
        assert!(b.wait_for_data);
        assert!(!b.port_passthrough);
        assert_eq!(b.path(), Path::new(DEFAULT_RING_PATH));
    }

    #[test]
    fn rejects_bad_depths() {
        for depth in [0, 1, 3, 1000] {
            let err = RingBuilder::new("/tmp/x").with_depth(depth).validate();
            assert!(matches!(err, Err(RingError::Config(_))), "depth {depth}");
        }
        assert!(RingBuilder::new("/tmp/x").with_depth(2).validate().is_ok());
    }

    #[test]
    fn rejects_descriptor_beyond_u32() {
        let err = RingBuilder::new("/tmp/x").with_depth(1 << 20).validate();
        assert!(matches!(err, Err(RingError::Config(_))));
    }
}
