use std::io::IsTerminal;

use adphost_channel::TransportStats;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Serializable mirror of the transport's counters.
#[derive(Serialize)]
pub struct StatsOutput {
    pub sent: u64,
    pub received: u64,
    pub delivered: u64,
    pub retransmitted: u64,
    pub resend_requests_sent: u64,
    pub resend_requests_honoured: u64,
    pub duplicates_dropped: u64,
    pub gaps_detected: u64,
    pub heartbeats_sent: u64,
}

impl From<TransportStats> for StatsOutput {
    fn from(stats: TransportStats) -> Self {
        Self {
            sent: stats.sent,
            received: stats.received,
            delivered: stats.delivered,
            retransmitted: stats.retransmitted,
            resend_requests_sent: stats.resend_requests_sent,
            resend_requests_honoured: stats.resend_requests_honoured,
            duplicates_dropped: stats.duplicates_dropped,
            gaps_detected: stats.gaps_detected,
            heartbeats_sent: stats.heartbeats_sent,
        }
    }
}

/// Counter rows for table output, in display order.
pub fn stats_rows(stats: &StatsOutput) -> [(&'static str, u64); 9] {
    [
        ("sent", stats.sent),
        ("received", stats.received),
        ("delivered", stats.delivered),
        ("retransmitted", stats.retransmitted),
        ("resend requests sent", stats.resend_requests_sent),
        ("resend requests honoured", stats.resend_requests_honoured),
        ("duplicates dropped", stats.duplicates_dropped),
        ("gaps detected", stats.gaps_detected),
        ("heartbeats sent", stats.heartbeats_sent),
    ]
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}
