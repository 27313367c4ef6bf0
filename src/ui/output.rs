use crate::error::{ExtractError, UserFriendlyError};
use crate::extractor::{ExtractionProgress, ExtractionReport};
use crate::ui::progress::format_duration;
use console::{style, Emoji, Term};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputMode {
    Human,
    Json,
    Plain,
}

// Emojis with text fallbacks
static CHECKMARK: Emoji = Emoji("✅ ", "✓ ");
static CROSS: Emoji = Emoji("❌ ", "✗ ");
static INFO: Emoji = Emoji("ℹ️  ", "i ");
static WARNING: Emoji = Emoji("⚠️  ", "! ");
static ROCKET: Emoji = Emoji("🚀 ", "> ");
static SPARKLES: Emoji = Emoji("✨ ", "* ");

/// One planned table read, as shown by `--dry-run`.
#[derive(Debug, Clone)]
pub struct PlannedTable {
    pub table: String,
    pub selection: String,
    pub query: String,
}

pub struct OutputFormatter {
    mode: OutputMode,
    use_colors: bool,
    verbose_level: u8,
    quiet: bool,
}

impl OutputFormatter {
    pub fn new(mode: OutputMode, verbose: u8, quiet: bool) -> Self {
        let use_colors = match mode {
            OutputMode::Human => Term::stdout().features().colors_supported() && !quiet,
            _ => false,
        };

        Self {
            mode,
            use_colors,
            verbose_level: if quiet { 0 } else { verbose },
            quiet,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    // Core messaging methods
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Human => self.print_human_message(MessageType::Success, message),
            OutputMode::Json => self.print_json_message("success", message),
            OutputMode::Plain => println!("SUCCESS: {}", message),
        }
    }

    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Human => self.print_human_message(MessageType::Error, message),
            OutputMode::Json => self.print_json_message("error", message),
            OutputMode::Plain => eprintln!("ERROR: {}", message),
        }
    }

    pub fn warning(&self, message: &str) {
        if self.should_show_message(0) {
            match self.mode {
                OutputMode::Human => self.print_human_message(MessageType::Warning, message),
                OutputMode::Json => self.print_json_message("warning", message),
                OutputMode::Plain => println!("WARNING: {}", message),
            }
        }
    }

    pub fn info(&self, message: &str) {
        if self.should_show_message(1) {
            match self.mode {
                OutputMode::Human => self.print_human_message(MessageType::Info, message),
                OutputMode::Json => self.print_json_message("info", message),
                OutputMode::Plain => println!("INFO: {}", message),
            }
        }
    }

    pub fn start_operation(&self, operation: &str) {
        if self.should_show_message(0) {
            match self.mode {
                OutputMode::Human => {
                    if self.use_colors {
                        println!("{}{}", ROCKET, style(operation).bold());
                    } else {
                        println!("> {}", operation);
                    }
                }
                OutputMode::Json => self.print_json_message("operation_start", operation),
                OutputMode::Plain => println!("STARTING: {}", operation),
            }
        }
    }

    // User-friendly error handling
    pub fn print_user_friendly_error(&self, error: &ExtractError) {
        let user_message = error.user_message();
        self.error(&user_message);

        if let Some(suggestion) = error.suggestion() {
            match self.mode {
                OutputMode::Human => {
                    if self.use_colors {
                        eprintln!(
                            "{}{}",
                            INFO,
                            style(&format!("Suggestion: {}", suggestion)).cyan()
                        );
                    } else {
                        eprintln!("Suggestion: {}", suggestion);
                    }
                }
                OutputMode::Json => {
                    self.print_json_object(&serde_json::json!({
                        "type": "suggestion",
                        "message": suggestion
                    }));
                }
                OutputMode::Plain => {
                    eprintln!("SUGGESTION: {}", suggestion);
                }
            }
        }
    }

    // Summary and reporting
    pub fn print_extraction_summary(&self, progress: &ExtractionProgress) {
        if self.quiet {
            return;
        }

        match self.mode {
            OutputMode::Human => self.print_human_summary(progress),
            OutputMode::Json => {}
            OutputMode::Plain => self.print_plain_summary(progress),
        }
    }

    pub fn print_extraction_report(&self, report: &ExtractionReport) {
        match self.mode {
            OutputMode::Human => {
                if !self.quiet {
                    self.print_human_report(report)
                }
            }
            OutputMode::Json => {
                let json_output =
                    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string());
                println!("{}", json_output);
            }
            OutputMode::Plain => self.print_plain_report(report),
        }
    }

    pub fn print_plan(&self, partition: &str, tables: &[PlannedTable]) {
        match self.mode {
            OutputMode::Json => {
                let planned: Vec<_> = tables
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "table": t.table,
                            "selection": t.selection,
                            "query": t.query
                        })
                    })
                    .collect();
                self.print_json_object(&serde_json::json!({
                    "type": "plan",
                    "partition": partition,
                    "tables": planned
                }));
            }
            OutputMode::Human | OutputMode::Plain => {
                println!("  Partition: {}", partition);
                if tables.is_empty() {
                    println!("  Tables: none configured");
                }
                for planned in tables {
                    println!("  {} ({})", planned.table, planned.selection);
                    println!("    {}", planned.query);
                }
            }
        }
    }

    // Specialized output methods
    pub fn print_header(&self, title: &str) {
        if self.quiet {
            return;
        }

        match self.mode {
            OutputMode::Human => {
                println!();
                if self.use_colors {
                    println!("{} {}", SPARKLES, style(title).bold().cyan());
                } else {
                    println!("=== {} ===", title);
                }
                println!();
            }
            OutputMode::Json => {
                self.print_json_object(&serde_json::json!({
                    "type": "header",
                    "title": title
                }));
            }
            OutputMode::Plain => {
                println!("=== {} ===", title);
            }
        }
    }

    pub fn print_separator(&self) {
        if self.quiet {
            return;
        }

        match self.mode {
            OutputMode::Human => {
                if self.use_colors {
                    println!("{}", style("─".repeat(60)).dim());
                } else {
                    println!("{}", "-".repeat(60));
                }
            }
            OutputMode::Plain => {
                println!("{}", "-".repeat(60));
            }
            OutputMode::Json => {}
        }
    }

    fn should_show_message(&self, min_verbose_level: u8) -> bool {
        !self.quiet && self.verbose_level >= min_verbose_level
    }

    fn print_human_message(&self, msg_type: MessageType, message: &str) {
        if self.use_colors {
            let (emoji, styled) = match msg_type {
                MessageType::Success => (CHECKMARK, style(message).green().bold()),
                MessageType::Error => (CROSS, style(message).red().bold()),
                MessageType::Warning => (WARNING, style(message).yellow().bold()),
                MessageType::Info => (INFO, style(message).cyan()),
            };

            match msg_type {
                MessageType::Error => eprintln!("{}{}", emoji, styled),
                _ => println!("{}{}", emoji, styled),
            }
        } else {
            let prefix = match msg_type {
                MessageType::Success => "✓",
                MessageType::Error => "✗",
                MessageType::Warning => "!",
                MessageType::Info => "i",
            };

            match msg_type {
                MessageType::Error => eprintln!("{} {}", prefix, message),
                _ => println!("{} {}", prefix, message),
            }
        }
    }

    fn print_json_message(&self, level: &str, message: &str) {
        self.print_json_object(&serde_json::json!({
            "type": "message",
            "level": level,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn print_json_object(&self, obj: &serde_json::Value) {
        println!(
            "{}",
            serde_json::to_string(obj).unwrap_or_else(|_| "{}".to_string())
        );
    }

    fn print_human_summary(&self, progress: &ExtractionProgress) {
        println!();
        self.print_separator();

        if self.use_colors {
            println!(
                "{} {}",
                style("Raw extraction completed!").green().bold(),
                CHECKMARK
            );
        } else {
            println!("✓ Raw extraction completed!");
        }

        println!();
        self.print_stat("Tables extracted:", progress.tables_processed.to_string());
        self.print_stat("Rows written:    ", progress.rows_written.to_string());
        self.print_stat("Bytes written:   ", format_bytes(progress.bytes_written));
        self.print_stat("Time taken:      ", format_duration(progress.elapsed()));

        self.print_separator();
    }

    fn print_stat(&self, label: &str, value: String) {
        if self.use_colors {
            println!("  {} {}", label, style(value).cyan().bold());
        } else {
            println!("  {} {}", label, value);
        }
    }

    fn print_plain_summary(&self, progress: &ExtractionProgress) {
        println!("COMPLETED: Raw extraction");
        println!("Tables extracted: {}", progress.tables_processed);
        println!("Rows written: {}", progress.rows_written);
        println!("Bytes written: {}", progress.bytes_written);
        println!("Duration: {:?}", progress.elapsed());
    }

    fn print_human_report(&self, report: &ExtractionReport) {
        self.print_header("Extraction Report");

        println!("Environment: {}", report.environment);
        println!("Run date:    {} ({})", report.run_date, report.mode);
        println!("Source:      {}", report.source);
        println!("Partition:   {}", report.partition);
        println!();

        if report.tables.is_empty() {
            println!("No tables configured; only the manifest was written.");
        } else {
            println!("Tables:");
            for table in &report.tables {
                println!(
                    "  {}: {} rows, {} ({})",
                    table.table,
                    table.output.rows,
                    format_bytes(table.output.bytes),
                    table.selection
                );
            }
        }
    }

    fn print_plain_report(&self, report: &ExtractionReport) {
        println!("REPORT: Extraction completed");
        println!("Environment: {}", report.environment);
        println!("Run date: {}", report.run_date);
        println!("Mode: {}", report.mode);
        println!("Partition: {}", report.partition);
        for table in &report.tables {
            println!(
                "Table: {} rows={} bytes={}",
                table.table, table.output.rows, table.output.bytes
            );
        }
        println!("Rows: {}", report.total_rows);
        println!("Size: {} bytes", report.total_bytes);
        println!("Duration: {}ms", report.duration_ms);
    }
}

#[derive(Debug, Clone, Copy)]
enum MessageType {
    Success,
    Error,
    Warning,
    Info,
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatter_creation() {
        let formatter = OutputFormatter::new(OutputMode::Human, 1, false);
        assert_eq!(formatter.mode(), OutputMode::Human);
        assert_eq!(formatter.verbose_level, 1);
        assert!(!formatter.quiet);
    }

    #[test]
    fn test_quiet_mode() {
        let formatter = OutputFormatter::new(OutputMode::Human, 2, true);
        assert_eq!(formatter.verbose_level, 0);
        assert!(formatter.quiet);
        assert!(!formatter.use_colors);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
        assert_eq!(format_bytes(1073741824), "1.0 GB");
    }

    #[test]
    fn test_should_show_message() {
        let formatter = OutputFormatter::new(OutputMode::Human, 1, false);
        assert!(formatter.should_show_message(0));
        assert!(formatter.should_show_message(1));
        assert!(!formatter.should_show_message(2));

        let quiet_formatter = OutputFormatter::new(OutputMode::Human, 2, true);
        assert!(!quiet_formatter.should_show_message(0));
        assert!(!quiet_formatter.should_show_message(1));
    }
}
