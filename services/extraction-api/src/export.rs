use crate::metrics_aggregator::{bytes_to_mb, NO_SIZE};
use crate::query::TIMESTAMP_FORMAT;
use crate::store::Extraction;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Header row of the CSV export
pub const CSV_HEADER: [&str; 5] = ["ID", "Filename", "Date", "Size (MB)", "Status"];

/// Render extractions as CRLF-terminated CSV, one row per record in the given order
pub fn render_csv(extractions: &[Extraction]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .context("Failed to write CSV header")?;

    for extraction in extractions {
        let size = extraction
            .file_size
            .map(|bytes| bytes_to_mb(bytes as f64))
            .unwrap_or_else(|| NO_SIZE.to_string());

        writer
            .write_record([
                extraction.id.to_string(),
                extraction.filename.clone(),
                extraction.extraction_date.format(TIMESTAMP_FORMAT).to_string(),
                size,
                extraction.status.clone(),
            ])
            .context("Failed to write CSV row")?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// Download name for an export taken at `at`
pub fn export_filename(at: DateTime<Utc>) -> String {
    format!("extractions_{}.csv", at.format("%Y%m%d_%H%M%S"))
}
