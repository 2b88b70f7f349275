use anyhow::{Context, Result};
use std::path::Path;

/// Header row of the failure report.
pub const REPORT_HEADER: &str = "filename,error_message";

/// One item that could not be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub file_name: String,
    pub error_message: String,
}

impl UploadFailure {
    pub fn new(file_name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            error_message: error_message.into(),
        }
    }
}

/// Render failures as CSV: header row, then one row per failure in order.
pub fn render_csv(failures: &[UploadFailure]) -> String {
    let mut out = String::with_capacity(REPORT_HEADER.len() + 1 + failures.len() * 48);
    out.push_str(REPORT_HEADER);
    out.push('\n');
    for failure in failures {
        out.push_str(&csv_field(&failure.file_name));
        out.push(',');
        out.push_str(&csv_field(&failure.error_message));
        out.push('\n');
    }
    out
}

/// Write the failure report to `path`, creating parent directories as needed.
pub fn write_failure_report(failures: &[UploadFailure], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, render_csv(failures))
        .with_context(|| format!("Failed to write failure report {}", path.display()))?;
    Ok(())
}

/// Quote a field only when it holds a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
