//! Dashboard metrics computed live from the `extractions` table.

use crate::store::{ExtractionStats, ExtractionStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bytes per megabyte for display
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Placeholder shown when a size is unknown
pub const NO_SIZE: &str = "—";

/// Metrics returned by `GET /api/metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_extractions: i64,
    pub this_week: i64,
    pub avg_size: String,
    pub success_rate: String,
}

impl From<ExtractionStats> for DashboardMetrics {
    fn from(stats: ExtractionStats) -> Self {
        Self {
            total_extractions: stats.total,
            this_week: stats.this_week,
            avg_size: format_avg_size(stats.avg_file_size),
            success_rate: format_success_rate(stats.success_count, stats.total),
        }
    }
}

/// Compute the dashboard metrics
pub async fn compute(store: &ExtractionStore) -> Result<DashboardMetrics> {
    Ok(store.stats().await?.into())
}

/// Mirror the current totals into the `metrics` table.
///
/// Runs after a primary write has already committed; a failure here is
/// logged and otherwise ignored.
pub async fn update_metrics(store: &ExtractionStore) {
    if let Err(e) = store.record_metrics_snapshot().await {
        warn!(error = %e, "Failed to record metrics snapshot");
    }
}

/// Size in bytes as megabytes with one decimal place
pub fn bytes_to_mb(bytes: f64) -> String {
    format!("{:.1}", bytes / BYTES_PER_MB)
}

pub fn format_avg_size(avg_bytes: Option<f64>) -> String {
    match avg_bytes {
        Some(avg) => format!("{} MB", bytes_to_mb(avg)),
        None => NO_SIZE.to_string(),
    }
}

/// Zero records count as a perfect success rate
pub fn format_success_rate(success: i64, total: i64) -> String {
    if total == 0 {
        return "100%".to_string();
    }
    format!("{:.1}%", success as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg_size_formatting() {
        assert_eq!(format_avg_size(None), "—");
        assert_eq!(format_avg_size(Some(1_048_576.0)), "1.0 MB");
        assert_eq!(format_avg_size(Some(1_572_864.0)), "1.5 MB");
        assert_eq!(format_avg_size(Some(512_000.0)), "0.5 MB");
    }

    #[test]
    fn test_success_rate_formatting() {
        assert_eq!(format_success_rate(0, 0), "100%");
        assert_eq!(format_success_rate(1, 2), "50.0%");
        assert_eq!(format_success_rate(2, 3), "66.7%");
        assert_eq!(format_success_rate(3, 3), "100.0%");
        assert_eq!(format_success_rate(0, 4), "0.0%");
    }

    #[test]
    fn test_metrics_from_stats() {
        let metrics = DashboardMetrics::from(ExtractionStats {
            total: 2,
            this_week: 1,
            avg_file_size: Some(2_097_152.0),
            success_count: 1,
        });

        assert_eq!(metrics.total_extractions, 2);
        assert_eq!(metrics.this_week, 1);
        assert_eq!(metrics.avg_size, "2.0 MB");
        assert_eq!(metrics.success_rate, "50.0%");
    }

    #[test]
    fn test_metrics_from_empty_stats() {
        let metrics = DashboardMetrics::from(ExtractionStats::default());
        assert_eq!(metrics.total_extractions, 0);
        assert_eq!(metrics.avg_size, "—");
        assert_eq!(metrics.success_rate, "100%");
    }
}
