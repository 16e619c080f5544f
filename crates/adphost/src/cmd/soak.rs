use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use adphost_channel::{ChannelConfig, ChannelId, ChannelTransport};
use adphost_device::{LoopbackDevice, DEFAULT_MAX_PACKET};
use bytes::Bytes;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tracing::info;

use crate::cmd::SoakArgs;
use crate::exit::{channel_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_json, stats_rows, OutputFormat, StatsOutput};

#[derive(Serialize)]
struct SoakReport {
    messages: usize,
    delivered: usize,
    in_order: bool,
    rounds: u32,
    drop_every: u32,
    host: StatsOutput,
    target: StatsOutput,
}

/// Drives a host and a target transport over a lossy in-memory link,
/// cooperatively in this thread, and reports how the reliability layer
/// coped. Exercises the full stack end to end: framing, sequencing,
/// resend recovery, heartbeats, the processing loop.
pub fn run(args: SoakArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }
    let payload_len = args.payload.max(4);
    if payload_len + 4 > DEFAULT_MAX_PACKET {
        return Err(CliError::new(
            USAGE,
            format!("--payload exceeds the link's packet cap ({DEFAULT_MAX_PACKET} bytes)"),
        ));
    }

    let (host_dev, target_dev) = LoopbackDevice::pair();
    let host_faults = host_dev.faults();

    let config = ChannelConfig {
        heartbeat: args.heartbeat_ms > 0,
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms.max(1)),
        ..ChannelConfig::default()
    };
    let mut host = ChannelTransport::open(Box::new(host_dev), "loopback", None, config.clone())
        .map_err(|err| channel_error("open host transport", err))?;
    let mut target = ChannelTransport::open(Box::new(target_dev), "loopback", None, config)
        .map_err(|err| channel_error("open target transport", err))?;

    if let Some(path) = &args.wire_log {
        // Failure already reported; the soak keeps running unlogged.
        host.enable_wire_log(path);
    }
    if args.heartbeat_ms > 0 {
        host.set_heartbeat_active(true);
        target.set_heartbeat_active(true);
    }
    if args.drop_every > 0 {
        host_faults.drop_every(Some(args.drop_every));
    }

    let seen: Rc<RefCell<Vec<u32>>> = Default::default();
    let sink = Rc::clone(&seen);
    target.register_callback(ChannelId::HostDebug, move |_, payload| {
        if payload.len() >= 4 {
            if let Ok(word) = payload[..4].try_into() {
                sink.borrow_mut().push(u32::from_le_bytes(word));
            }
        }
    });

    for i in 0..args.count {
        let mut data = vec![0x5A; payload_len];
        data[..4].copy_from_slice(&(i as u32).to_le_bytes());
        host.write_async(ChannelId::HostDebug, Bytes::from(data))
            .map_err(|err| channel_error("queue message", err))?;
    }
    info!(
        count = args.count,
        drop_every = args.drop_every,
        "soak started"
    );

    // A drop at the very tail leaves nothing to trip gap detection, so
    // once the main burst has had time to settle, the loss pattern is
    // switched off and probe traffic flushes the stragglers out.
    let tail_flush = args.count as u32 * 4 + 200;
    let max_rounds = args.count as u32 * 50 + 2000;
    let mut rounds = 0u32;
    while seen.borrow().len() < args.count {
        host.pump_once();
        target.pump_once();
        rounds += 1;
        if rounds == tail_flush {
            host_faults.drop_every(None);
        }
        if rounds > tail_flush && rounds % 10 == 0 {
            host.write_async(ChannelId::HostUser, Bytes::from_static(b"probe"))
                .map_err(|err| channel_error("queue probe", err))?;
        }
        if rounds >= max_rounds {
            return Err(CliError::new(
                FAILURE,
                format!(
                    "soak did not converge after {rounds} rounds ({}/{} delivered)",
                    seen.borrow().len(),
                    args.count
                ),
            ));
        }
    }

    let delivered = seen.borrow().len();
    let in_order = seen
        .borrow()
        .iter()
        .enumerate()
        .all(|(i, &word)| word == i as u32);

    let report = SoakReport {
        messages: args.count,
        delivered,
        in_order,
        rounds,
        drop_every: args.drop_every,
        host: host.stats().into(),
        target: target.stats().into(),
    };
    render(&report, format);

    if in_order {
        Ok(SUCCESS)
    } else {
        Err(CliError::new(FAILURE, "messages arrived out of order"))
    }
}

fn render(report: &SoakReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "HOST", "TARGET"]);
            for ((name, host_value), (_, target_value)) in stats_rows(&report.host)
                .into_iter()
                .zip(stats_rows(&report.target))
            {
                table.add_row(vec![
                    name.to_string(),
                    host_value.to_string(),
                    target_value.to_string(),
                ]);
            }
            println!("{table}");
            println!(
                "{}/{} messages delivered {} over {} rounds",
                report.delivered,
                report.messages,
                if report.in_order {
                    "in order"
                } else {
                    "OUT OF ORDER"
                },
                report.rounds,
            );
        }
        OutputFormat::Pretty => {
            println!(
                "messages={} delivered={} in_order={} rounds={} drop_every={}",
                report.messages, report.delivered, report.in_order, report.rounds, report.drop_every,
            );
            println!(
                "host: sent={} retransmitted={} heartbeats={}",
                report.host.sent, report.host.retransmitted, report.host.heartbeats_sent,
            );
            println!(
                "target: delivered={} gaps={} duplicates={} resend_requests={}",
                report.target.delivered,
                report.target.gaps_detected,
                report.target.duplicates_dropped,
                report.target.resend_requests_sent,
            );
        }
    }
}
