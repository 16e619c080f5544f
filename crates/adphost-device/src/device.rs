use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// Default cap on a single packet's wire size, header included.
pub const DEFAULT_MAX_PACKET: usize = 8 * 1024;

/// Coarse packet class at the device boundary.
///
/// Debug traffic carries the multiplexed logical channels; application
/// traffic is an independent, unsequenced stream sharing the same link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DevChan {
    Debug,
    Application,
}

impl DevChan {
    pub const COUNT: usize = 2;

    pub(crate) fn index(self) -> usize {
        match self {
            DevChan::Debug => 0,
            DevChan::Application => 1,
        }
    }
}

/// An in-progress read, advanced by the driver across repeated
/// non-blocking calls until one packet is complete.
#[derive(Debug)]
pub struct ReadRequest {
    /// Class of the packet being assembled. The driver sets this when it
    /// learns it from its framing, at the latest on `Complete`.
    pub chan: DevChan,
    /// Bytes accumulated so far for the packet in flight.
    pub buf: BytesMut,
}

impl ReadRequest {
    pub fn new() -> Self {
        Self {
            chan: DevChan::Debug,
            buf: BytesMut::new(),
        }
    }
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one driver read call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The request now holds one complete packet.
    Complete,
    /// No complete packet yet; call again later with the same request.
    Pending,
    /// The driver saw a packet it could not frame; the request is reset.
    BadPacket,
}

/// An in-progress write, advanced by the driver across repeated calls
/// until the whole packet is on the wire.
#[derive(Debug)]
pub struct WriteRequest {
    pub chan: DevChan,
    pub data: Bytes,
    /// Bytes the driver has consumed so far.
    pub written: usize,
}

impl WriteRequest {
    pub fn new(chan: DevChan, data: Bytes) -> Self {
        Self {
            chan,
            data,
            written: 0,
        }
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data[self.written..]
    }

    pub fn is_finished(&self) -> bool {
        self.written >= self.data.len()
    }
}

/// Outcome of one driver write call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The packet is fully on the wire.
    Finished,
    /// The driver consumed some or none of it; retry later.
    Partial,
}

/// Link parameters negotiable with the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkParams {
    pub baud_rate: u32,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self { baud_rate: 9600 }
    }
}

/// Out-of-band control requests passed through to the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoctlRequest {
    /// Switch the link to the given parameters.
    SetParams(LinkParams),
    /// Ask for the driver's default parameters.
    DefaultParams,
    /// Ask for any user-specified parameter override.
    UserParams,
    /// Reset the link to its start-of-day state.
    ResetLink,
}

/// Driver replies to [`IoctlRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoctlReply {
    Done,
    Params(LinkParams),
    /// No value available for the request (e.g. no user override set).
    None,
}

/// A raw packet-oriented device driver.
///
/// Drivers never block for more than a brief, bounded moment: `read` and
/// `write` make what progress they can and return, preserving partial
/// state in the call record for the next attempt.
pub trait Device {
    /// Can this driver handle the named device, without opening it?
    fn matches(&self, name: &str, arg: Option<&str>) -> bool;

    fn open(&mut self, name: &str, arg: Option<&str>) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Try to advance `req` towards one complete packet. `allow_block`
    /// permits a short bounded wait for data; it is a hint, not a demand.
    fn read(&mut self, req: &mut ReadRequest, allow_block: bool) -> Result<ReadOutcome>;

    /// Try to push more of `req` onto the wire.
    fn write(&mut self, req: &mut WriteRequest) -> Result<WriteOutcome>;

    fn ioctl(&mut self, req: IoctlRequest) -> Result<IoctlReply>;
}
