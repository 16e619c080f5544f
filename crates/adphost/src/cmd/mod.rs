use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod soak;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Push traffic through a lossy loopback link and report how the
    /// reliability layer coped.
    Soak(SoakArgs),
    /// Decode a hex-encoded transport packet.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Soak(args) => soak::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SoakArgs {
    /// Messages to push through the link.
    #[arg(long, default_value_t = 50)]
    pub count: usize,
    /// Drop every k-th host-side packet (0 = lossless).
    #[arg(long, default_value_t = 5)]
    pub drop_every: u32,
    /// Payload size per message in bytes.
    #[arg(long, default_value_t = 32)]
    pub payload: usize,
    /// Heartbeat interval in milliseconds (0 disables heartbeats).
    #[arg(long, default_value_t = 0)]
    pub heartbeat_ms: u64,
    /// Write a packet log of host-side traffic to this file.
    #[arg(long, value_name = "FILE")]
    pub wire_log: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex-encoded packet bytes (whitespace allowed).
    pub hex: String,
}

#[derive(Args, Debug, Default)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
