use std::fmt;

use adphost_channel::ChannelError;
use adphost_device::DeviceError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    let code = match &err {
        ChannelError::Device(device) => return device_error(context, device),
        ChannelError::UnknownChannel { .. } | ChannelError::Truncated { .. } => DATA_INVALID,
        ChannelError::HandlerRegistered(_) | ChannelError::HooksFull => USAGE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

fn device_error(context: &str, err: &DeviceError) -> CliError {
    let code = match err {
        DeviceError::NoMatch { .. } | DeviceError::NotOpen(_) | DeviceError::AlreadyOpen(_) => {
            USAGE
        }
        DeviceError::BadPacket | DeviceError::PacketTooLarge { .. } => DATA_INVALID,
        DeviceError::WriteBusy => FAILURE,
        DeviceError::Io(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
