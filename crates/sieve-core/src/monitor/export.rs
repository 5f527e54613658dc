//! Metrics export.

use std::io::Write;

use serde::{Deserialize, Serialize};
use sieve_common::Result;

use super::collector::SystemSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

/// Parse `30s`, `15m`, `2h`, `1d`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<chrono::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (num_str, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
        _ => (s, 's'),
    };
    let num: i64 = num_str.parse().ok()?;
    if num < 0 {
        return None;
    }
    match unit {
        's' => Some(chrono::Duration::seconds(num)),
        'm' => Some(chrono::Duration::minutes(num)),
        'h' => Some(chrono::Duration::hours(num)),
        'd' => Some(chrono::Duration::days(num)),
        _ => None,
    }
}

const CSV_HEADER: &str = concat!(
    "timestamp,cpu_percent,memory_percent,network_percent,",
    "messages_processed,error_count,message_rate,error_rate,",
    "avg_latency_ms,db_latency_ms,",
    "queued_entries,queue_capacity,queue_fill_percent,failed_sinks,stress",
);

fn csv_row(s: &SystemSnapshot) -> String {
    format!(
        "{},{:.3},{:.3},{:.3},{},{},{:.3},{:.3},{:.3},{:.3},{},{},{:.3},{},{:.3}",
        s.timestamp,
        s.cpu_percent,
        s.memory_percent,
        s.network_percent,
        s.messages_processed,
        s.error_count,
        s.message_rate,
        s.error_rate,
        s.avg_latency_ms,
        s.db_latency_ms,
        s.queued_entries,
        s.queue_capacity,
        s.queue_fill_percent,
        s.failed_sinks,
        s.stress
    )
}

pub fn write_snapshots<W: Write>(
    samples: &[SystemSnapshot],
    format: ExportFormat,
    out: &mut W,
) -> Result<()> {
    match format {
        ExportFormat::Csv => {
            writeln!(out, "{}", CSV_HEADER)?;
            for s in samples {
                writeln!(out, "{}", csv_row(s))?;
            }
        }
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, samples)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::history::tests::snapshot_at;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30s"), Some(chrono::Duration::seconds(30)));
        assert_eq!(parse_duration("15m"), Some(chrono::Duration::minutes(15)));
        assert_eq!(parse_duration("2h"), Some(chrono::Duration::hours(2)));
        assert_eq!(parse_duration("1d"), Some(chrono::Duration::days(1)));
        assert_eq!(parse_duration("90"), Some(chrono::Duration::seconds(90)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5w"), None);
        assert_eq!(parse_duration("-5m"), None);
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn csv_has_header_and_rows() {
        let mut out = Vec::new();
        let snapshots = [snapshot_at(0, 12.5), snapshot_at(5_000, 13.0)];
        write_snapshots(&snapshots, ExportFormat::Csv, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,cpu_percent"));
        assert!(lines[1].contains(",12.500,"));
        assert_eq!(lines[1].split(',').count(), CSV_HEADER.split(',').count());
    }

    #[test]
    fn json_round_trips() {
        let mut out = Vec::new();
        write_snapshots(&[snapshot_at(0, 1.0)], ExportFormat::Json, &mut out).unwrap();
        let back: Vec<SystemSnapshot> = serde_json::from_slice(&out).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].cpu_percent, 1.0);
    }
}
