//! Host-side channel transport for the Angel Debug Protocol.
//!
//! adphost turns a byte-oriented, possibly lossy debug link into a set
//! of independent, reliable, in-order logical channels between a
//! debugger host and an embedded target.
//!
//! # Crate Structure
//!
//! - [`device`] — Device driver contract and the per-class packet switch
//! - [`channel`] — Reliable multiplexed channels and the processing loop

/// Re-export device types.
pub mod device {
    pub use adphost_device::*;
}

/// Re-export channel types.
pub mod channel {
    pub use adphost_channel::*;
}
