//! Terminal and JSON output for rendered reports.
//!
//! Human-readable output is colour coded:
//! - hit rates in green, miss rates in red
//! - the miss breakdown lists only categories with a non-zero count
//! - commands are ordered by run count, busiest first
//!
//! JSON output prints the overall report together with the scan summary.

use colored::Colorize;

use crate::models::ClassificationResult;
use crate::report::{Report, ReportSet};

/// Commands shown in the terminal summary when no limit is given.
pub const DEFAULT_COMMAND_LIMIT: usize = 10;

pub struct DisplayManager;

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayManager {
    pub fn new() -> Self {
        Self
    }

    pub fn display_report_set(&self, reports: &ReportSet, limit: Option<usize>, json_output: bool) {
        if json_output {
            let output = serde_json::json!({
                "summary": reports.summary,
                "overall": reports.overall,
            });
            match serde_json::to_string_pretty(&output) {
                Ok(json_str) => println!("{}", json_str),
                Err(e) => eprintln!("Error serializing report to JSON: {}", e),
            }
            return;
        }

        println!("\n{}", "=".repeat(80).bright_cyan());
        println!("{}", "Cache Failure Report".bright_white().bold());
        println!("{}", "=".repeat(80).bright_cyan());

        let summary = &reports.summary;
        let window = match &summary.time_range {
            Some(range) => format!("{} → {}", range.requested_start, range.requested_end),
            None => "all records".to_string(),
        };
        println!(
            "\n{} {} • {} records • {} skipped • {} pages • {:.1}s\n",
            "📊".bright_yellow(),
            window.bright_white().bold(),
            summary.records_processed.to_string().bright_white().bold(),
            summary.skipped_records.to_string().bright_white(),
            summary.pages_fetched.to_string().bright_white(),
            summary.duration_seconds
        );

        self.display_report(&reports.overall, "Overall");

        let mut commands: Vec<&Report> = reports.by_command.iter().collect();
        commands.sort_by(|a, b| {
            b.total_step_runs
                .cmp(&a.total_step_runs)
                .then_with(|| a.command.cmp(&b.command))
        });

        let display_limit = limit.unwrap_or(DEFAULT_COMMAND_LIMIT);
        if !commands.is_empty() {
            println!(
                "{} Top commands (showing {} of {}):",
                "📋".bright_blue(),
                display_limit.min(commands.len()).to_string().bright_white().bold(),
                commands.len().to_string().bright_white().bold()
            );
            for report in commands.iter().take(display_limit) {
                println!(
                    "   {}: {} runs, {} hit, {} miss",
                    report.command.as_deref().unwrap_or_default().bright_cyan(),
                    report.total_step_runs.to_string().bright_white(),
                    report.cache_hit.percentage.bright_green(),
                    report.cache_miss.percentage.bright_red()
                );
            }
            println!();
        }
    }

    fn display_report(&self, report: &Report, title: &str) {
        println!("{} {}", "🔎".bright_blue(), title.bright_white().bold());
        println!(
            "   Total step runs: {}",
            report.total_step_runs.to_string().bright_white().bold()
        );

        let latency = report
            .cache_hit
            .average_latency
            .map_or_else(|| "n/a".to_string(), |l| format!("{:.3}s", l));
        println!(
            "   Cache hits: {} ({}, avg latency {})",
            report.cache_hit.count.to_string().bright_white(),
            report.cache_hit.percentage.bright_green().bold(),
            latency.bright_white()
        );
        println!(
            "   Cache misses: {} ({})",
            report.cache_miss.count.to_string().bright_white(),
            report.cache_miss.percentage.bright_red().bold()
        );
        println!(
            "   Hit without component: {} ({})",
            report.cache_hit_without_component.count.to_string().bright_white(),
            report.cache_hit_without_component.percentage.bright_yellow()
        );

        for (category, entry) in report.cache_miss.breakdown.iter().filter(|(_, e)| e.count > 0) {
            println!(
                "      {}: {} ({})",
                category.name().bright_cyan(),
                entry.count.to_string().bright_white(),
                entry.percentage.bright_yellow()
            );
            if !entry.reason.is_empty() {
                println!("         {}", entry.reason.dimmed());
            }
        }

        if let (Some(start), Some(end)) = (&report.date_range.start, &report.date_range.end) {
            println!("   Dates: {} → {}", start.bright_white(), end.bright_white());
        }
        println!();
    }

    pub fn display_classification(&self, result: &ClassificationResult) {
        match serde_json::to_string_pretty(result) {
            Ok(json_str) => println!("{}", json_str),
            Err(e) => eprintln!("Error serializing classification to JSON: {}", e),
        }
    }
}
