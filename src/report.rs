use std::{fmt::Write as _, io};

use anyhow::Context as _;

use crate::stats::Report;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn render(report: &Report, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => {
            let mut json =
                serde_json::to_string_pretty(report).context("serialize report as JSON")?;
            json.push('\n');
            Ok(json)
        }
    }
}

pub fn write(report: &Report, format: OutputFormat, out: &mut impl io::Write) -> anyhow::Result<()> {
    out.write_all(render(report, format)?.as_bytes())
        .context("write report")?;
    out.flush().context("flush report")
}

fn render_text(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Processed {} sessions out of {} total sessions",
        report.processed_sessions, report.total_sessions
    );
    if report.missing_sessions > 0 {
        let _ = writeln!(out, "Skipped {} missing sessions", report.missing_sessions);
    }
    let _ = writeln!(out, "Average size was {:.6} bytes", report.average_size);
    out.push_str("Saw the following keys:\n");
    for key in &report.keys {
        let _ = writeln!(
            out,
            "    {} ({} times, average {:.6} bytes)",
            key.key, key.count, key.average_size
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{OutputFormat, render, write};
    use crate::stats::{KeyReport, Report};

    fn sample_report(missing: u64) -> Report {
        Report {
            processed_sessions: 2,
            total_sessions: 10,
            missing_sessions: missing,
            average_size: 12345.5,
            keys: vec![
                KeyReport {
                    key: "_auth_user_id".to_owned(),
                    count: 2,
                    average_size: 24.0,
                },
                KeyReport {
                    key: "cart".to_owned(),
                    count: 1,
                    average_size: 12000.25,
                },
            ],
        }
    }

    #[test]
    fn text_report_matches_expected_layout() {
        let text = render(&sample_report(0), OutputFormat::Text).unwrap();
        assert_eq!(
            text,
            "Processed 2 sessions out of 10 total sessions\n\
             Average size was 12345.500000 bytes\n\
             Saw the following keys:\n    \
             _auth_user_id (2 times, average 24.000000 bytes)\n    \
             cart (1 times, average 12000.250000 bytes)\n"
        );
    }

    #[test]
    fn text_report_mentions_missing_sessions_only_when_present() {
        let text = render(&sample_report(3), OutputFormat::Text).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[1], "Skipped 3 missing sessions");
    }

    #[test]
    fn json_report_exposes_all_fields() {
        let mut out = Vec::new();
        write(&sample_report(1), OutputFormat::Json, &mut out).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["processed_sessions"], 2);
        assert_eq!(value["total_sessions"], 10);
        assert_eq!(value["missing_sessions"], 1);
        assert_eq!(value["average_size"], 12345.5);
        assert_eq!(value["keys"][1]["key"], "cart");
        assert_eq!(value["keys"][1]["count"], 1);
    }
}
