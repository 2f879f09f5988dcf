//! Result rendering: key/value tables on stderr, per-segment CSV on stdout.

use std::fmt::Write as _;
use std::time::Duration;

use segsched_lib::{RunReport, SegmentRecord};

use crate::cli::Cli;

pub const CSV_HEADER: &str = "timestamp,session,segment,seg_dur,transcode_time";

/// Two-column table with `*` joints and `|` column separators, left aligned
#[derive(Debug, Default)]
pub struct Table {
    rows: Vec<(String, String)>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.rows.push((key.into(), value.into()));
        self
    }

    pub fn render(&self) -> String {
        let key_width = self.rows.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
        let value_width = self.rows.iter().map(|(_, v)| v.chars().count()).max().unwrap_or(0);
        let border = format!(
            "*{}*{}*\n",
            "-".repeat(key_width + 2),
            "-".repeat(value_width + 2)
        );

        let mut out = border.clone();
        for (key, value) in &self.rows {
            let _ = writeln!(
                out,
                "| {:<kw$} | {:<vw$} |",
                key,
                value,
                kw = key_width,
                vw = value_width
            );
        }
        out.push_str(&border);
        out
    }
}

/// Float with at most `digits` significant digits, trailing zeros trimmed
pub fn significant(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{}", value);
    }
    let exp = value.abs().log10().floor() as i32;
    let digits = digits.max(1) as i32;
    if exp < -4 || exp >= digits {
        let formatted = format!("{:.*e}", (digits - 1) as usize, value);
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", trim_zeros(mantissa), sign, exponent.abs());
    }
    let decimals = (digits - 1 - exp).max(0) as usize;
    trim_zeros(&format!("{:.*}", decimals, value)).to_string()
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Seconds with the shortest exact representation, e.g. `20s`, `0.5s`
fn seconds(duration: Duration) -> String {
    format!("{}s", duration.as_secs_f64())
}

/// Settings the run was started with
pub fn config_table(cli: &Cli, mode: &str) -> Table {
    Table::new()
        .row("Source File", cli.input.display().to_string())
        .row("Transcoding Options", cli.transcoding_options.clone())
        .row("Concurrent Sessions", cli.concurrent_sessions.to_string())
        .row("Live Mode", cli.live.to_string())
        .row("Pipeline", mode)
}

/// End-of-run totals
pub fn summary_table(sessions: usize, report: &RunReport) -> Table {
    let s = &report.summary;
    let mut table = Table::new()
        .row("Concurrent Sessions", sessions.to_string())
        .row("Total Segs Transcoded", s.segments.to_string())
        .row("Real-Time Segs Transcoded", s.real_time_segments.to_string())
        .row("* Real-Time Segs Ratio *", significant(s.real_time_ratio, 4))
        .row("Total Source Duration", seconds(s.source_duration))
        .row("Total Transcoding Duration", seconds(s.transcode_duration))
        .row("* Real-Time Duration Ratio *", significant(s.duration_ratio, 4));

    if let Some(sched) = &report.scheduler {
        table = table
            .row("Backpressure Waits", s.backpressure_waits.to_string())
            .row("Queue Full Retries", s.queue_full_retries.to_string())
            .row("Encode Workers", sched.workers.len().to_string());
    }
    if let Some(avg) = s.avg_encode_time {
        table = table.row("Avg Encode Time", seconds(avg));
    }
    if !report.contained.is_empty() {
        table = table.row("Contained Sessions", report.contained.len().to_string());
    }
    table
}

/// One CSV line for a transcoded segment
pub fn csv_line(record: &SegmentRecord) -> String {
    let ts = record.timestamp;
    // Up to four fractional digits, trailing zeros dropped
    let tenths_of_ms = ts.timestamp_subsec_nanos() / 100_000;
    let frac = trim_zeros(&format!("0.{:04}", tenths_of_ms)).trim_start_matches('0').to_string();
    format!(
        "{}{},{},{},{},{}",
        ts.format("%Y-%m-%d %H:%M:%S"),
        frac,
        record.session,
        record.segment,
        significant(record.duration.as_secs_f64(), 4),
        significant(record.transcode_time.as_secs_f64(), 4)
    )
}
