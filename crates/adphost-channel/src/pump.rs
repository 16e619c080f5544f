//! The cooperative processing loop.
//!
//! All transport progress happens inside rounds. One round, in fixed
//! order: flush one write (fresh packet, retransmission, or a parked
//! partial), attempt one debug-class read and process it fully, drain
//! one application-class packet, then consider a heartbeat and run the
//! idle hooks. There are no threads; the blocking variants repeat
//! rounds until their goal is met, passing a short blocking hint down
//! to the driver so the CPU is not pegged while waiting.

use crate::transport::ChannelTransport;

/// Fixed capacity of the idle-hook table.
pub const MAX_IDLE_HOOKS: usize = 8;

/// What one round of the loop accomplished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundResult {
    /// Packets delivered to a channel handler this round.
    pub delivered: usize,
    /// True when nothing is left to send: both send queues empty and
    /// the device write slot free.
    pub write_drained: bool,
}

/// The condition a repeated loop is driving towards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Goal {
    /// Run one round, never repeat.
    Nothing,
    /// Repeat until a packet has been delivered to some channel.
    Read,
    /// Repeat until the write queues have drained; reads are skipped.
    Write,
}

impl ChannelTransport {
    /// Perform one round of work and return what it accomplished.
    pub fn pump(&mut self) -> RoundResult {
        self.round(Goal::Nothing)
    }

    /// One round, never blocking beyond the driver's read hint.
    pub fn pump_once(&mut self) -> RoundResult {
        self.pump()
    }

    /// Repeat rounds until at least one packet has been delivered to
    /// some channel. A link that never produces one polls forever.
    pub fn pump_until_read(&mut self) -> RoundResult {
        loop {
            let result = self.round(Goal::Read);
            if result.delivered > 0 {
                return result;
            }
        }
    }

    /// Repeat rounds until the pending write, if any, has fully
    /// drained. Reads are not serviced in this mode.
    pub fn pump_until_write_drained(&mut self) -> RoundResult {
        loop {
            let result = self.round(Goal::Write);
            if result.write_drained {
                return result;
            }
        }
    }

    pub(crate) fn round(&mut self, goal: Goal) -> RoundResult {
        let write_drained = self.service_write();

        let mut delivered = 0;
        if goal != Goal::Write {
            delivered += self.service_read();
            self.service_application();
        }

        let satisfied = match goal {
            Goal::Nothing => false,
            Goal::Read => delivered > 0,
            Goal::Write => write_drained,
        };
        if !satisfied {
            self.maybe_heartbeat();
            self.run_idle_hooks();
        }

        RoundResult {
            delivered,
            write_drained,
        }
    }
}
