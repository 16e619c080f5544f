//! The fixed set of logical channels multiplexed over one link.
//!
//! Channel numbers are wire-visible and shared with the target; the set
//! is closed. Boot channels carry start-of-day negotiation and are never
//! subject to sequence checking.

/// A logical channel number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelId {
    /// Host-originated debug agent requests.
    HostDebug = 0,
    /// Target-originated debug agent traffic.
    TargetDebug = 1,
    /// Host-originated boot negotiation.
    HostBoot = 2,
    /// Target-originated boot negotiation.
    TargetBoot = 3,
    /// Semihosting C-library traffic.
    CLib = 4,
    /// Host-originated user debug stream.
    HostUser = 5,
    /// Target-originated user debug stream.
    TargetUser = 6,
    /// Host-to-target comms channel.
    HostComms = 7,
    /// Target-to-host comms channel.
    TargetComms = 8,
    /// Target logging output.
    TargetLog = 9,
}

/// Number of logical channels.
pub const CHANNEL_COUNT: usize = 10;

impl ChannelId {
    /// All channels, in wire order.
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [
        ChannelId::HostDebug,
        ChannelId::TargetDebug,
        ChannelId::HostBoot,
        ChannelId::TargetBoot,
        ChannelId::CLib,
        ChannelId::HostUser,
        ChannelId::TargetUser,
        ChannelId::HostComms,
        ChannelId::TargetComms,
        ChannelId::TargetLog,
    ];

    /// Decode a wire byte; anything outside the closed set is a
    /// protocol violation.
    pub fn from_wire(byte: u8) -> Option<ChannelId> {
        ChannelId::ALL.get(byte as usize).copied()
    }

    pub fn wire(self) -> u8 {
        self as u8
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Boot negotiation precedes reliable-mode establishment, so these
    /// channels bypass sequence checking.
    pub fn is_boot(self) -> bool {
        matches!(self, ChannelId::HostBoot | ChannelId::TargetBoot)
    }

    /// Short protocol name, as used in wire logs.
    pub fn name(self) -> &'static str {
        match self {
            ChannelId::HostDebug => "HADP",
            ChannelId::TargetDebug => "TADP",
            ChannelId::HostBoot => "HBOOT",
            ChannelId::TargetBoot => "TBOOT",
            ChannelId::CLib => "CLIB",
            ChannelId::HostUser => "HUDBG",
            ChannelId::TargetUser => "TUDBG",
            ChannelId::HostComms => "HTDCC",
            ChannelId::TargetComms => "TTDCC",
            ChannelId::TargetLog => "TLOG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        for id in ChannelId::ALL {
            assert_eq!(ChannelId::from_wire(id.wire()), Some(id));
        }
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert_eq!(ChannelId::from_wire(CHANNEL_COUNT as u8), None);
        assert_eq!(ChannelId::from_wire(0xFF), None);
    }

    #[test]
    fn only_boot_channels_are_boot() {
        let boot: Vec<ChannelId> = ChannelId::ALL.into_iter().filter(|c| c.is_boot()).collect();
        assert_eq!(boot, [ChannelId::HostBoot, ChannelId::TargetBoot]);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = ChannelId::ALL.iter().map(|c| c.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CHANNEL_COUNT);
    }
}
