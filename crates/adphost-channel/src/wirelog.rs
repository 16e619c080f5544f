use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::warn;

use crate::codec::Packet;

/// Direction of a logged packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Tx => "tx",
            Direction::Rx => "rx",
        }
    }
}

/// Line-oriented text log of every packet crossing the link.
///
/// Disabled by default; enabled and redirected by filename at runtime.
/// Failure to open or write the file never disturbs the transport: the
/// problem is reported and logging switches off.
#[derive(Default)]
pub struct WireLog {
    sink: Option<BufWriter<File>>,
}

impl WireLog {
    /// Start logging to `path`, replacing any previous sink. Returns
    /// false (with logging disabled) if the file cannot be opened.
    pub fn enable(&mut self, path: &Path) -> bool {
        match File::create(path) {
            Ok(file) => {
                self.sink = Some(BufWriter::new(file));
                true
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot open packet log, logging disabled");
                self.sink = None;
                false
            }
        }
    }

    pub fn disable(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.flush();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Record one packet. A write failure disables the log.
    pub fn record(&mut self, dir: Direction, packet: &Packet) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let line = format_line(dir, packet);
        if let Err(err) = writeln!(sink, "{line}") {
            warn!(%err, "packet log write failed, logging disabled");
            self.sink = None;
        }
    }
}

fn format_line(dir: Direction, packet: &Packet) -> String {
    let header = &packet.header;
    let mut line = format!(
        "{} {:<5} seq={:02x}/{:02x} flags={}",
        dir.tag(),
        header.channel.name(),
        header.home_seq,
        header.oppo_seq,
        flag_names(header.flags),
    );

    // Message reason word, when the payload carries one (little endian,
    // per the ADP message layout).
    if packet.payload.len() >= 4 {
        let reason = u32::from_le_bytes(packet.payload[..4].try_into().unwrap());
        let _ = write!(line, " reason={reason:#010x}");
    }

    let _ = write!(line, " len={} |", packet.payload.len());
    for byte in packet.payload.iter() {
        let _ = write!(line, " {byte:02x}");
    }
    line
}

fn flag_names(flags: u8) -> String {
    use crate::codec::{FLAG_HEARTBEAT, FLAG_RELIABLE, FLAG_RESEND};

    let mut names = String::new();
    for (bit, name) in [
        (FLAG_RELIABLE, 'r'),
        (FLAG_RESEND, 's'),
        (FLAG_HEARTBEAT, 'h'),
    ] {
        if flags & bit != 0 {
            names.push(name);
        }
    }
    if names.is_empty() {
        names.push('-');
    }
    names
}
