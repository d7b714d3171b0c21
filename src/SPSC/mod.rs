mod builder;
mod consumer;
mod lifecycle;
mod monitor;
mod producer;
mod wait;

pub mod layout;

pub use builder::{RingBuilder, DEFAULT_FLOW_CONTROL_TIMEOUT, DEFAULT_RING_PATH};
pub use consumer::{PacketInfo, Received, RingConsumer};
pub use layout::{flags, SLOT_PAYLOAD_CAPACITY};
pub use monitor::{format_time_of_day, RingMonitor, RingStats};
pub use producer::RingProducer;
pub use wait::WaitPolicy;
