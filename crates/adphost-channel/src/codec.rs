use bytes::{BufMut, Bytes, BytesMut};

use crate::channels::ChannelId;
use crate::error::{ChannelError, Result};

/// Channel header: channel (1) + home seq (1) + oppo seq (1) + flags (1).
pub const CHANNEL_HEADER_SIZE: usize = 4;

/// The packet participates in sequence/acknowledgement bookkeeping.
pub const FLAG_RELIABLE: u8 = 1 << 0;
/// The packet requests retransmission from the position it describes.
pub const FLAG_RESEND: u8 = 1 << 1;
/// Link-liveness packet; never delivered to a channel.
pub const FLAG_HEARTBEAT: u8 = 1 << 2;

/// The transport header carried by every packet.
///
/// Wire layout, fixed byte positions:
/// ```text
/// ┌───────────┬───────────┬───────────┬───────────┬──────────────┐
/// │ Channel   │ HomeSeq   │ OppoSeq   │ Flags     │ Payload       │
/// │ (1B)      │ (1B)      │ (1B)      │ (1B)      │ (n bytes)     │
/// └───────────┴───────────┴───────────┴───────────┴──────────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelHeader {
    /// Logical channel the payload belongs to.
    pub channel: ChannelId,
    /// Sender's outgoing sequence number.
    pub home_seq: u8,
    /// Last in-order sequence the sender has received from its peer.
    pub oppo_seq: u8,
    /// Flag bits (`FLAG_RELIABLE`, `FLAG_RESEND`, `FLAG_HEARTBEAT`).
    pub flags: u8,
}

impl ChannelHeader {
    pub fn is_reliable(&self) -> bool {
        self.flags & FLAG_RELIABLE != 0
    }

    pub fn is_resend(&self) -> bool {
        self.flags & FLAG_RESEND != 0
    }

    pub fn is_heartbeat(&self) -> bool {
        self.flags & FLAG_HEARTBEAT != 0
    }
}

/// A decoded transport packet.
#[derive(Clone, Debug)]
pub struct Packet {
    pub header: ChannelHeader,
    pub payload: Bytes,
}

impl Packet {
    pub fn wire_size(&self) -> usize {
        CHANNEL_HEADER_SIZE + self.payload.len()
    }
}

/// Encode header + payload into one wire packet.
pub fn encode_packet(header: ChannelHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHANNEL_HEADER_SIZE + payload.len());
    buf.put_u8(header.channel.wire());
    buf.put_u8(header.home_seq);
    buf.put_u8(header.oppo_seq);
    buf.put_u8(header.flags);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode one wire packet.
///
/// Fails on anything shorter than the header and on a channel byte
/// outside the closed channel set.
pub fn decode_packet(raw: &Bytes) -> Result<Packet> {
    if raw.len() < CHANNEL_HEADER_SIZE {
        return Err(ChannelError::Truncated { len: raw.len() });
    }
    let channel =
        ChannelId::from_wire(raw[0]).ok_or(ChannelError::UnknownChannel { byte: raw[0] })?;
    Ok(Packet {
        header: ChannelHeader {
            channel,
            home_seq: raw[1],
            oppo_seq: raw[2],
            flags: raw[3],
        },
        payload: raw.slice(CHANNEL_HEADER_SIZE..),
    })
}
