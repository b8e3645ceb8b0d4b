use csv::Writer;
use thiserror::Error;

use crate::issues::domain::Issue;

pub const EXPORT_COLUMNS: [&str; 7] = [
    "id",
    "title",
    "description",
    "address",
    "status",
    "created_at",
    "reported_by",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to flush CSV writer: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV output is not valid UTF-8")]
    Encoding,
}

/// Render issues as CSV with a header row.
pub fn issues_to_csv<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Result<String, ExportError> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_COLUMNS)?;

    for issue in issues {
        let created_at = issue.created_at.to_rfc3339();
        writer.write_record([
            issue.id.as_str(),
            issue.title.as_str(),
            issue.description.as_str(),
            issue.address.as_str(),
            issue.status.as_str(),
            created_at.as_str(),
            issue.reporter_name.as_deref().unwrap_or(""),
        ])?;
    }

    writer.flush()?;
    let bytes = writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|_| ExportError::Encoding)
}
