use crate::channels::ChannelId;

/// Errors that can occur in the channel transport.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Device- or switch-layer error.
    #[error("device error: {0}")]
    Device(#[from] adphost_device::DeviceError),

    /// The wire carried a channel byte outside the closed channel set.
    #[error("unknown channel {byte:#04x}")]
    UnknownChannel { byte: u8 },

    /// The wire carried less than one transport header.
    #[error("truncated packet ({len} bytes)")]
    Truncated { len: usize },

    /// A blocking read was attempted on a channel that already has a
    /// registered callback.
    #[error("channel {0:?} already has a registered handler")]
    HandlerRegistered(ChannelId),

    /// The idle-hook table is at capacity.
    #[error("idle hook table full")]
    HooksFull,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
