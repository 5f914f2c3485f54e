//! Output formatters for session results
//!
//! Provides table, JSON, CSV, and one-line summary formats.

use serde::Serialize;

use crate::models::{ItemRecord, Outcome, SessionCounts, SessionResults};
use crate::results::StoredSession;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Brief,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "brief" | "summary" => Some(OutputFormat::Brief),
            _ => None,
        }
    }
}

/// JSON shape of a session summary
#[derive(Serialize)]
struct SessionReport<'a> {
    session_id: &'a str,
    counts: SessionCounts,
    records: &'a [ItemRecord],
}

/// Session summary formatter
pub struct SummaryFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl SummaryFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        let encoded = if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        encoded.unwrap_or_default()
    }

    /// Format a finished session
    pub fn format_session(&self, results: &SessionResults) -> String {
        match self.format {
            OutputFormat::Table => self.format_session_table(results),
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(&SessionReport {
                session_id: &results.session_id,
                counts: results.counts(),
                records: &results.records,
            }),
            OutputFormat::Csv => self.format_session_csv(results),
            OutputFormat::Brief => self.format_session_brief(results),
        }
    }

    fn status(&self, record: &ItemRecord) -> String {
        let Some(result) = &record.result else {
            return "- NOT RUN".to_string();
        };
        let plain = format!("{} {}", result.outcome.symbol(), result.outcome);
        if !self.colorize {
            return plain;
        }
        let color = match result.outcome {
            Outcome::Success => "32",
            Outcome::Skip => "33",
            _ => "31",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    fn format_record(&self, record: &ItemRecord) -> String {
        let duration = record.result.as_ref().map(|r| r.duration_ms).unwrap_or(0);
        let mut line = format!(
            "{:<10} {} [{:>6}ms]",
            self.status(record),
            record.id.address(),
            duration
        );
        if let Some(message) = record.result.as_ref().and_then(|r| r.message()) {
            line.push_str(&format!("\n             {}", message.lines().next().unwrap_or("")));
        }
        line
    }

    fn format_session_table(&self, results: &SessionResults) -> String {
        let counts = results.counts();
        let mut output = String::new();

        output.push_str("\n══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!("  Session {}\n", results.session_id));
        output.push_str("──────────────────────────────────────────────────────────────\n");

        for record in &results.records {
            output.push_str(&format!("  {}\n", self.format_record(record)));
        }

        output.push_str("──────────────────────────────────────────────────────────────\n");
        output.push_str(&format!(
            "  Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {} | Not run: {}\n",
            counts.total, counts.passed, counts.failed, counts.errors, counts.skipped, counts.not_run
        ));
        output.push_str(&format!(
            "  Duration: {}ms | To rerun: {}\n",
            counts.duration_ms,
            results.rerun_count()
        ));
        output.push_str("══════════════════════════════════════════════════════════════\n");

        output
    }

    fn format_session_csv(&self, results: &SessionResults) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let _ = writer.write_record(["path", "function", "variation", "outcome", "duration_ms", "message"]);

        for record in &results.records {
            let (outcome, duration, message) = match &record.result {
                Some(r) => (
                    r.outcome.to_string(),
                    r.duration_ms.to_string(),
                    r.message().unwrap_or_default(),
                ),
                None => ("NOT RUN".to_string(), String::new(), String::new()),
            };
            let _ = writer.write_record([
                record.id.path.as_str(),
                record.id.function.as_str(),
                record.id.variation.as_str(),
                outcome.as_str(),
                duration.as_str(),
                message.as_str(),
            ]);
        }

        writer
            .into_inner()
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    }

    fn format_session_brief(&self, results: &SessionResults) -> String {
        let counts = results.counts();
        format!(
            "Session {}: {}/{} passed, {} failed, {} errors, {} skipped, {} not run in {}ms",
            results.session_id,
            counts.passed,
            counts.total,
            counts.failed,
            counts.errors,
            counts.skipped,
            counts.not_run,
            counts.duration_ms
        )
    }

    /// Format the recorded sessions list
    pub fn format_sessions(&self, sessions: &[StoredSession]) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(&sessions),
            _ => {
                let mut output = String::new();
                output.push_str(&format!(
                    "{:<26} {:<20} {:>6}  {}\n",
                    "SESSION", "CREATED", "RERUN", "FOLDER"
                ));
                for session in sessions {
                    output.push_str(&format!(
                        "{:<26} {:<20} {:>6}  {}\n",
                        session.session_id,
                        session.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        session.rerun_count,
                        session.source_folder
                    ));
                }
                output
            }
        }
    }
}

impl Default for SummaryFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemId, ItemResult};
    use serde_json::json;

    fn session() -> SessionResults {
        let ids = vec![
            ItemId::new("a.sh", "ok", ""),
            ItemId::new("a.sh", "broken", "x=1"),
            ItemId::new("b.sh", "later", ""),
        ];
        let mut results = SessionResults::new("s-1", ids);
        results.record(0, ItemResult::success(12));
        results.record(1, ItemResult::failure(5, json!({"message": "expected 1, got 2"})));
        results
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("summary"), Some(OutputFormat::Brief));
        assert_eq!(OutputFormat::from_str("xml"), None);
    }

    #[test]
    fn test_table_lists_every_item() {
        let output = SummaryFormatter::default().no_color().format_session(&session());
        assert!(output.contains("✓ PASS"));
        assert!(output.contains("a.sh:broken[x=1]"));
        assert!(output.contains("expected 1, got 2"));
        assert!(output.contains("- NOT RUN"));
        assert!(output.contains("To rerun: 2"));
    }

    #[test]
    fn test_json_counts() {
        let output = SummaryFormatter::new(OutputFormat::Json).format_session(&session());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["counts"]["passed"], 1);
        assert_eq!(value["counts"]["not_run"], 1);
        assert_eq!(value["records"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_csv_quotes_messages() {
        let mut results = session();
        results.record(2, ItemResult::error(1, json!({"message": "bad, \"really\""})));

        let output = SummaryFormatter::new(OutputFormat::Csv).format_session(&results);
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("path,function,variation,outcome,duration_ms,message")
        );
        assert!(output.contains("\"bad, \"\"really\"\"\""));
    }

    #[test]
    fn test_brief() {
        let output = SummaryFormatter::new(OutputFormat::Brief).format_session(&session());
        assert_eq!(
            output,
            "Session s-1: 1/3 passed, 1 failed, 0 errors, 0 skipped, 1 not run in 17ms"
        );
    }
}
