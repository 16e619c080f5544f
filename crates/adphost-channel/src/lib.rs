//! Reliable multiplexed channel transport for the Angel Debug Protocol
//! host.
//!
//! This is the core value-add layer of adphost. Every packet carries a
//! 4-byte transport header:
//! - A 1-byte logical channel number (closed set, see [`ChannelId`])
//! - Two 1-byte wrapping sequence counters (sent / last received)
//! - A 1-byte flag field (reliable, resend request, heartbeat)
//!
//! On top of the header the layer provides in-order, exactly-once
//! delivery per channel via duplicate suppression and explicit
//! retransmission requests, link liveness via heartbeats, and a
//! single-threaded cooperative processing loop that interleaves reads,
//! writes and timers without threads.

pub mod channels;
pub mod codec;
pub mod error;
pub mod pump;
pub mod transport;
pub mod wirelog;

pub use channels::{ChannelId, CHANNEL_COUNT};
pub use codec::{
    decode_packet, encode_packet, ChannelHeader, Packet, CHANNEL_HEADER_SIZE, FLAG_HEARTBEAT,
    FLAG_RELIABLE, FLAG_RESEND,
};
pub use error::{ChannelError, Result};
pub use pump::{RoundResult, MAX_IDLE_HOOKS};
pub use transport::{
    ChannelConfig, ChannelTransport, TransportStats, DEFAULT_HEARTBEAT_INTERVAL,
};
pub use wirelog::{Direction, WireLog};
