use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;

use crate::device::{
    DevChan, Device, IoctlReply, IoctlRequest, LinkParams, ReadOutcome, ReadRequest,
    WriteOutcome, WriteRequest,
};
use crate::error::Result;

/// The device name the loopback driver claims.
pub const LOOPBACK_NAME: &str = "loopback";

enum Entry {
    Packet(DevChan, Bytes),
    Bad,
}

#[derive(Default)]
struct Shared {
    /// queues[0] carries side-0 → side-1 traffic, queues[1] the reverse.
    queues: [VecDeque<Entry>; 2],
}

#[derive(Default)]
struct FaultPlan {
    /// Deliver this many outbound packets before dropping starts.
    drop_skip: u32,
    /// Then silently discard this many.
    drop_count: u32,
    /// Independently, discard every k-th outbound packet.
    drop_every: Option<u32>,
    /// Deliver each write in two driver calls instead of one.
    chunked_writes: bool,
    outbound: u32,
}

impl FaultPlan {
    fn should_drop(&mut self) -> bool {
        self.outbound += 1;
        if self.drop_skip > 0 {
            self.drop_skip -= 1;
            return false;
        }
        if self.drop_count > 0 {
            self.drop_count -= 1;
            return true;
        }
        matches!(self.drop_every, Some(k) if k > 0 && self.outbound % k == 0)
    }
}

/// Handle controlling one side's fault injection.
///
/// Stays usable after the device itself has been handed to a switch, so
/// tests can change the loss pattern mid-run.
#[derive(Clone)]
pub struct LoopbackFaults {
    plan: Rc<RefCell<FaultPlan>>,
}

impl LoopbackFaults {
    /// Silently discard the next `n` outbound packets.
    pub fn drop_next(&self, n: u32) {
        self.plan.borrow_mut().drop_count = n;
    }

    /// Deliver `skip` outbound packets, then discard `n`.
    pub fn drop_after(&self, skip: u32, n: u32) {
        let mut plan = self.plan.borrow_mut();
        plan.drop_skip = skip;
        plan.drop_count = n;
    }

    /// Silently discard every `k`-th outbound packet; `None` turns the
    /// pattern off.
    pub fn drop_every(&self, k: Option<u32>) {
        self.plan.borrow_mut().drop_every = k;
    }

    /// Deliver each write in two driver calls instead of one.
    pub fn chunked_writes(&self, on: bool) {
        self.plan.borrow_mut().chunked_writes = on;
    }

    /// Outbound packets attempted so far (dropped ones included).
    pub fn outbound(&self) -> u32 {
        self.plan.borrow().outbound
    }
}

/// One end of an in-memory device pair.
///
/// Packets written on one side become readable on the other, in order.
/// Deterministic fault injection covers the failure modes the protocol
/// layer must absorb: dropped packets, partial writes, malformed input.
/// Single-threaded by design, like everything above it.
pub struct LoopbackDevice {
    shared: Rc<RefCell<Shared>>,
    side: usize,
    open: bool,
    faults: LoopbackFaults,
    params: LinkParams,
}

impl LoopbackDevice {
    /// Create two connected ends.
    pub fn pair() -> (LoopbackDevice, LoopbackDevice) {
        let shared = Rc::new(RefCell::new(Shared::default()));
        let make = |side| LoopbackDevice {
            shared: Rc::clone(&shared),
            side,
            open: false,
            faults: LoopbackFaults {
                plan: Rc::new(RefCell::new(FaultPlan::default())),
            },
            params: LinkParams::default(),
        };
        (make(0), make(1))
    }

    /// Fault-injection handle for this side; clones stay live after the
    /// device is moved into a switch.
    pub fn faults(&self) -> LoopbackFaults {
        self.faults.clone()
    }

    /// Make the next read on this side report a malformed packet.
    pub fn inject_bad_inbound(&mut self) {
        self.shared.borrow_mut().queues[1 - self.side].push_back(Entry::Bad);
    }
}

impl Device for LoopbackDevice {
    fn matches(&self, name: &str, _arg: Option<&str>) -> bool {
        name == LOOPBACK_NAME
    }

    fn open(&mut self, _name: &str, _arg: Option<&str>) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn read(&mut self, req: &mut ReadRequest, _allow_block: bool) -> Result<ReadOutcome> {
        let mut shared = self.shared.borrow_mut();
        match shared.queues[1 - self.side].pop_front() {
            None => Ok(ReadOutcome::Pending),
            Some(Entry::Bad) => Ok(ReadOutcome::BadPacket),
            Some(Entry::Packet(chan, data)) => {
                req.chan = chan;
                req.buf.extend_from_slice(&data);
                Ok(ReadOutcome::Complete)
            }
        }
    }

    fn write(&mut self, req: &mut WriteRequest) -> Result<WriteOutcome> {
        let mut plan = self.faults.plan.borrow_mut();
        if plan.chunked_writes && req.written == 0 && req.data.len() > 1 {
            req.written = req.data.len() / 2;
            return Ok(WriteOutcome::Partial);
        }

        req.written = req.data.len();
        if !plan.should_drop() {
            self.shared.borrow_mut().queues[self.side]
                .push_back(Entry::Packet(req.chan, req.data.clone()));
        }
        Ok(WriteOutcome::Finished)
    }

    fn ioctl(&mut self, req: IoctlRequest) -> Result<IoctlReply> {
        match req {
            IoctlRequest::SetParams(params) => {
                self.params = params;
                Ok(IoctlReply::Done)
            }
            IoctlRequest::DefaultParams => Ok(IoctlReply::Params(LinkParams::default())),
            IoctlRequest::UserParams => Ok(IoctlReply::None),
            IoctlRequest::ResetLink => {
                let mut shared = self.shared.borrow_mut();
                shared.queues[0].clear();
                shared.queues[1].clear();
                Ok(IoctlReply::Done)
            }
        }
    }
}
