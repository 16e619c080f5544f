use crate::device::DevChan;

/// Errors that can occur at the device and switch layer.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// No driver claimed the requested device name.
    #[error("no device matches {name:?}")]
    NoMatch { name: String },

    /// The packet class was already opened on this device.
    #[error("packet class {0:?} already open")]
    AlreadyOpen(DevChan),

    /// The packet class was never opened on this device.
    #[error("packet class {0:?} not open")]
    NotOpen(DevChan),

    /// A previous write has not fully drained yet.
    #[error("write still in flight")]
    WriteBusy,

    /// The driver received a packet it could not frame.
    #[error("malformed packet on the wire")]
    BadPacket,

    /// The packet exceeds what the link will carry.
    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// An I/O error occurred in the driver.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
