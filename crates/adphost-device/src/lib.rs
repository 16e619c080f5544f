//! Device abstraction for the Angel Debug Protocol host.
//!
//! A [`Device`] is a raw packet driver over some physical link (serial,
//! parallel, Ethernet); drivers make bounded progress per call and never
//! block for long. The [`DevSwitch`] adapts one driver into per-class
//! packet FIFOs shared by the debug and application streams.
//!
//! This is the lowest layer of adphost. The channel transport builds on
//! the [`DevSwitch`] type provided here.

pub mod device;
pub mod error;
pub mod loopback;
pub mod switch;

pub use device::{
    DevChan, Device, IoctlReply, IoctlRequest, LinkParams, ReadOutcome, ReadRequest,
    WriteOutcome, WriteRequest, DEFAULT_MAX_PACKET,
};
pub use error::{DeviceError, Result};
pub use loopback::{LoopbackDevice, LoopbackFaults, LOOPBACK_NAME};
pub use switch::DevSwitch;
