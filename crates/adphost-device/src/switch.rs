use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::device::{
    DevChan, Device, IoctlReply, IoctlRequest, ReadOutcome, ReadRequest, WriteOutcome,
    WriteRequest, DEFAULT_MAX_PACKET,
};
use crate::error::{DeviceError, Result};

/// Demultiplexes one raw device's packet stream into per-class FIFOs.
///
/// The switch owns the driver exclusively. It keeps a single in-flight
/// read and a single in-flight write; completed inbound packets are
/// queued per packet class until their consumer asks for them.
pub struct DevSwitch {
    device: Box<dyn Device>,
    open: [bool; DevChan::COUNT],
    pending_read: Option<ReadRequest>,
    pending_write: Option<WriteRequest>,
    queues: [VecDeque<Bytes>; DevChan::COUNT],
    max_packet: usize,
}

impl std::fmt::Debug for DevSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevSwitch")
            .field("open", &self.open)
            .field("pending_read", &self.pending_read.is_some())
            .field("pending_write", &self.pending_write.is_some())
            .field("max_packet", &self.max_packet)
            .finish_non_exhaustive()
    }
}

impl DevSwitch {
    /// Open `device` and record interest in `chan`.
    ///
    /// Further packet classes on the same device are added with
    /// [`open_chan`](Self::open_chan); the driver itself is opened once.
    pub fn open(
        mut device: Box<dyn Device>,
        name: &str,
        arg: Option<&str>,
        chan: DevChan,
    ) -> Result<Self> {
        if !device.matches(name, arg) {
            return Err(DeviceError::NoMatch {
                name: name.to_string(),
            });
        }
        device.open(name, arg)?;

        let mut open = [false; DevChan::COUNT];
        open[chan.index()] = true;

        Ok(Self {
            device,
            open,
            pending_read: None,
            pending_write: None,
            queues: [VecDeque::new(), VecDeque::new()],
            max_packet: DEFAULT_MAX_PACKET,
        })
    }

    /// Record interest in a further packet class on the open device.
    pub fn open_chan(&mut self, chan: DevChan) -> Result<()> {
        if self.open[chan.index()] {
            return Err(DeviceError::AlreadyOpen(chan));
        }
        self.open[chan.index()] = true;
        Ok(())
    }

    /// Forget a packet class, freeing its queued packets. Closes the
    /// driver when no class remains; returns true in that case.
    pub fn close_chan(&mut self, chan: DevChan) -> Result<bool> {
        if !self.open[chan.index()] {
            return Err(DeviceError::NotOpen(chan));
        }
        self.open[chan.index()] = false;
        self.queues[chan.index()].clear();

        if self.open.iter().any(|&o| o) {
            Ok(false)
        } else {
            self.device.close()?;
            Ok(true)
        }
    }

    pub fn is_open(&self, chan: DevChan) -> bool {
        self.open[chan.index()]
    }

    /// Fetch the next queued packet of class `chan`, polling the driver
    /// for new data first.
    ///
    /// The driver is polled even when a packet is already queued: the
    /// driver call is the only place packets of other classes make
    /// progress. A malformed packet surfaces as [`DeviceError::BadPacket`]
    /// and enqueues nothing.
    pub fn read(&mut self, chan: DevChan, allow_block: bool) -> Result<Option<Bytes>> {
        if !self.open[chan.index()] {
            return Err(DeviceError::NotOpen(chan));
        }

        let mut req = self.pending_read.take().unwrap_or_default();
        match self.device.read(&mut req, allow_block) {
            Ok(ReadOutcome::Complete) => {
                let packet = req.buf.split().freeze();
                if self.open[req.chan.index()] {
                    trace!(class = ?req.chan, len = packet.len(), "packet completed");
                    self.queues[req.chan.index()].push_back(packet);
                } else {
                    warn!(class = ?req.chan, "packet for unopened class, dropping");
                }
            }
            Ok(ReadOutcome::Pending) => {
                self.pending_read = Some(req);
            }
            Ok(ReadOutcome::BadPacket) => {
                return Err(DeviceError::BadPacket);
            }
            Err(err) => return Err(err),
        }

        Ok(self.queues[chan.index()].pop_front())
    }

    /// Send one packet of class `chan`.
    ///
    /// Any leftover partial write is flushed first; if it will not drain,
    /// the new packet is refused with [`DeviceError::WriteBusy`]. An
    /// accepted packet may itself be parked partially sent, to be
    /// finished by later calls.
    pub fn write(&mut self, chan: DevChan, data: Bytes) -> Result<()> {
        if !self.open[chan.index()] {
            return Err(DeviceError::NotOpen(chan));
        }
        if data.len() > self.max_packet {
            return Err(DeviceError::PacketTooLarge {
                size: data.len(),
                max: self.max_packet,
            });
        }
        if !self.flush_pending_write()? {
            return Err(DeviceError::WriteBusy);
        }

        let mut req = WriteRequest::new(chan, data);
        match self.device.write(&mut req)? {
            WriteOutcome::Finished => {}
            WriteOutcome::Partial => {
                self.pending_write = Some(req);
            }
        }
        Ok(())
    }

    /// Advance any parked partial write. Returns true once nothing is
    /// left in flight.
    pub fn flush_pending_write(&mut self) -> Result<bool> {
        let Some(mut req) = self.pending_write.take() else {
            return Ok(true);
        };
        match self.device.write(&mut req)? {
            WriteOutcome::Finished => Ok(true),
            WriteOutcome::Partial => {
                self.pending_write = Some(req);
                Ok(false)
            }
        }
    }

    /// Is the write slot free?
    pub fn write_finished(&self) -> bool {
        self.pending_write.is_none()
    }

    /// Opaque control pass-through to the driver.
    pub fn ioctl(&mut self, req: IoctlRequest) -> Result<IoctlReply> {
        self.device.ioctl(req)
    }
}
