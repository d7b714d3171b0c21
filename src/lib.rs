// Module naming follows project convention (SPSC = Single-Producer Single-Consumer)
#[allow(non_snake_case)]
pub mod SPSC;

#[allow(non_snake_case)]
pub mod Core;

#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod error;
pub mod ffi;
pub mod pcap;

pub use error::{Result, RingError};
pub use SPSC::{
    PacketInfo, Received, RingBuilder, RingConsumer, RingMonitor, RingProducer, RingStats,
    WaitPolicy,
};
