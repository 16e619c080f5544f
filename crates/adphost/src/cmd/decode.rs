use adphost_channel::{decode_packet, Packet, FLAG_HEARTBEAT, FLAG_RELIABLE, FLAG_RESEND};
use bytes::Bytes;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use crate::cmd::DecodeArgs;
use crate::exit::{channel_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct DecodeOutput {
    channel: u8,
    channel_name: &'static str,
    home_seq: u8,
    oppo_seq: u8,
    flags: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    payload_len: usize,
    payload_hex: String,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let cleaned: String = args.hex.chars().filter(|c| !c.is_whitespace()).collect();
    let raw = hex::decode(&cleaned)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex input: {err}")))?;
    let packet =
        decode_packet(&Bytes::from(raw)).map_err(|err| channel_error("decode packet", err))?;

    let out = describe(&packet);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec![
                    "channel".to_string(),
                    format!("{} ({})", out.channel, out.channel_name),
                ])
                .add_row(vec!["home seq".to_string(), out.home_seq.to_string()])
                .add_row(vec!["oppo seq".to_string(), out.oppo_seq.to_string()])
                .add_row(vec!["flags".to_string(), out.flags.join(", ")])
                .add_row(vec![
                    "reason".to_string(),
                    out.reason.clone().unwrap_or_else(|| "-".to_string()),
                ])
                .add_row(vec!["payload".to_string(), format!("{} bytes", out.payload_len)])
                .add_row(vec!["payload hex".to_string(), out.payload_hex.clone()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} ({}) seq={}/{} flags=[{}] reason={} len={} payload={}",
                out.channel,
                out.channel_name,
                out.home_seq,
                out.oppo_seq,
                out.flags.join(","),
                out.reason.as_deref().unwrap_or("-"),
                out.payload_len,
                out.payload_hex,
            );
        }
    }

    Ok(SUCCESS)
}

fn describe(packet: &Packet) -> DecodeOutput {
    let header = &packet.header;

    let mut flags = Vec::new();
    for (bit, name) in [
        (FLAG_RELIABLE, "reliable"),
        (FLAG_RESEND, "resend"),
        (FLAG_HEARTBEAT, "heartbeat"),
    ] {
        if header.flags & bit != 0 {
            flags.push(name);
        }
    }
    if flags.is_empty() {
        flags.push("none");
    }

    let reason = (packet.payload.len() >= 4).then(|| {
        let word = u32::from_le_bytes(
            packet.payload[..4]
                .try_into()
                .unwrap_or([0, 0, 0, 0]),
        );
        format!("{word:#010x}")
    });

    DecodeOutput {
        channel: header.channel.wire(),
        channel_name: header.channel.name(),
        home_seq: header.home_seq,
        oppo_seq: header.oppo_seq,
        flags,
        reason,
        payload_len: packet.payload.len(),
        payload_hex: hex::encode(&packet.payload),
    }
}
