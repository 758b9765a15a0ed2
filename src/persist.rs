//! Report artifact writer.
//!
//! Layout of one run inside the output directory:
//!
//! ```text
//! command_stats_<command>_<timestamp>.json
//! command_package_stats_<package>_<command>_<timestamp>.json
//! overall_report_<timestamp>.json
//! overall_report_<timestamp>_unclassified_diagnostics.json   (diagnostics mode only)
//! bulk_analysis_summary.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::report::ReportSet;

const MAX_NAME_CHARS: usize = 200;
const KEEP_HEAD_CHARS: usize = 100;
const KEEP_TAIL_CHARS: usize = 50;

/// Make free text safe for a file name: word characters, spaces and dashes
/// survive, runs of spaces and dashes become one `_`, and very long names are
/// shortened around an ellipsis.
pub fn sanitize_filename(text: &str) -> String {
    let mut safe = String::with_capacity(text.len());
    let mut in_separator = false;

    for c in text.chars() {
        if c.is_whitespace() || c == '-' {
            if !in_separator {
                safe.push('_');
                in_separator = true;
            }
        } else if c.is_alphanumeric() || c == '_' {
            safe.push(c);
            in_separator = false;
        }
    }

    let safe = safe.trim_matches('_');
    let chars: Vec<char> = safe.chars().collect();
    if chars.len() > MAX_NAME_CHARS {
        let head: String = chars[..KEEP_HEAD_CHARS].iter().collect();
        let tail: String = chars[chars.len() - KEEP_TAIL_CHARS..].iter().collect();
        return format!("{head}...{tail}");
    }
    if safe.is_empty() {
        return "unnamed".to_string();
    }
    safe.to_string()
}

/// Write every report of a run. Returns the paths written, summary last.
pub fn write_report_set(reports: &ReportSet, dir: &Path, pretty: bool) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let timestamp = reports.summary.completed_at.format("%Y%m%d_%H%M%S").to_string();
    let mut written = Vec::with_capacity(reports.by_command.len() + reports.by_command_package.len() + 3);

    for report in &reports.by_command {
        let command = sanitize_filename(report.command.as_deref().unwrap_or_default());
        let path = dir.join(format!("command_stats_{command}_{timestamp}.json"));
        write_json(&path, report, pretty)?;
        written.push(path);
    }

    for report in &reports.by_command_package {
        let command = sanitize_filename(report.command.as_deref().unwrap_or_default());
        let package = sanitize_filename(report.app_package.as_deref().unwrap_or_default());
        let path = dir.join(format!("command_package_stats_{package}_{command}_{timestamp}.json"));
        write_json(&path, report, pretty)?;
        written.push(path);
    }

    let overall = dir.join(format!("overall_report_{timestamp}.json"));
    write_json(&overall, &reports.overall, pretty)?;
    written.push(overall);

    if !reports.unclassified_diagnostics.is_empty() {
        let diagnostics = dir.join(format!("overall_report_{timestamp}_unclassified_diagnostics.json"));
        write_json(&diagnostics, &reports.unclassified_diagnostics, pretty)?;
        info!(
            path = %diagnostics.display(),
            records = reports.unclassified_diagnostics.len(),
            "Unclassified diagnostics written"
        );
        written.push(diagnostics);
    }

    let summary = dir.join("bulk_analysis_summary.json");
    write_json(&summary, &reports.summary, pretty)?;
    written.push(summary);

    info!(directory = %dir.display(), files = written.len(), "Report artifacts written");
    Ok(written)
}

fn write_json<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let content = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    fs::write(path, content)?;
    debug!(path = %path.display(), "Wrote report file");
    Ok(())
}
