//! Output formatting for convergent
//!
//! Human output prints one line per record and a recap; JSON output prints
//! the state returns as one document.

use colored::Colorize;
use convergent::outcome::{OutcomeRecord, OutcomeStatus, OutcomeSummary};
use serde_json::{json, Value};

/// Colored label for a status.
fn status_label(status: OutcomeStatus, use_color: bool) -> String {
    let text = format!("{:<8}", status.to_string());
    if !use_color {
        return text;
    }
    match status {
        OutcomeStatus::Unchanged => text.green().to_string(),
        OutcomeStatus::Changed => text.yellow().to_string(),
        OutcomeStatus::Pending => text.cyan().to_string(),
        OutcomeStatus::Failed => text.red().bold().to_string(),
    }
}

/// Output formatter for different output modes
pub struct OutputFormatter {
    use_color: bool,
    json_mode: bool,
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        Self {
            use_color,
            json_mode,
            verbosity,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.json_mode {
            return;
        }
        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}", line.bright_blue());
        } else {
            println!("{}\n  {}  \n{}", line, title, line);
        }
    }

    /// One line per record, with before/after fields at `-v`.
    pub fn record_line(&self, record: &OutcomeRecord) -> String {
        let mut line = format!(
            "{} {} : {}",
            status_label(record.status(), self.use_color),
            record.name,
            record.message
        );
        if self.verbosity >= 1 {
            for (field, after) in &record.after {
                let before = record
                    .before
                    .get(field)
                    .map(Value::to_string)
                    .unwrap_or_else(|| "-".to_string());
                line.push_str(&format!("\n    {}: {} -> {}", field, before, after));
            }
        }
        line
    }

    pub fn record(&self, record: &OutcomeRecord) {
        if !self.json_mode {
            println!("{}", self.record_line(record));
        }
    }

    /// Totals line for a run.
    pub fn recap_line(&self, summary: &OutcomeSummary) -> String {
        let fmt_stat = |label: &str, value: usize, color: colored::Color| -> String {
            let text = format!("{}={}", label, value);
            if !self.use_color {
                text
            } else if value > 0 {
                text.color(color).to_string()
            } else {
                text.dimmed().to_string()
            }
        };
        format!(
            "{} {} {} {}",
            fmt_stat("ok", summary.ok, colored::Color::Green),
            fmt_stat("changed", summary.changed, colored::Color::Yellow),
            fmt_stat("pending", summary.pending, colored::Color::Cyan),
            fmt_stat("failed", summary.failed, colored::Color::Red),
        )
    }

    /// JSON document for a run.
    pub fn json_document(records: &[OutcomeRecord], summary: &OutcomeSummary) -> Value {
        json!({
            "states": records.iter().map(OutcomeRecord::to_state_return).collect::<Vec<_>>(),
            "summary": summary,
        })
    }

    /// Print all records of a run followed by the recap.
    pub fn report(&self, records: &[OutcomeRecord]) -> anyhow::Result<()> {
        let summary = OutcomeSummary::from_records(records);
        if self.json_mode {
            println!("{}", serde_json::to_string_pretty(&Self::json_document(records, &summary))?);
            return Ok(());
        }
        for record in records {
            self.record(record);
        }
        println!("\n{}", self.recap_line(&summary));
        Ok(())
    }

    pub fn error(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.json_mode {
            println!("{}", message);
        }
    }

    /// Two-column listing
    pub fn table(&self, rows: &[(String, String)]) {
        let width = rows.iter().map(|(a, _)| a.len()).max().unwrap_or(0);
        for (name, description) in rows {
            if self.use_color {
                println!("{:<width$}  {}", name.bold(), description, width = width);
            } else {
                println!("{:<width$}  {}", name, description, width = width);
            }
        }
    }
}
