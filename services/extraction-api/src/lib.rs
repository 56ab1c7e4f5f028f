//! Extraction Dashboard API
//!
//! REST service recording metadata about PDF extraction jobs (filename, size,
//! MIME type, status, extracted JSON payload) and exposing listing, filtering,
//! metrics aggregation and CSV export over that data.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP request
//!       │
//!       ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ API          │────▶│ Query        │────▶│ Extraction   │──▶ SQLite file
//! │ Handlers     │     │ Builder      │     │ Store        │    (extractions,
//! └──────────────┘     └──────────────┘     └──────────────┘     metrics)
//!       │                                          ▲
//!       ├──────────▶ Metrics Aggregator ───────────┤
//!       └──────────▶ CSV Exporter                  │
//!                         (rows from the store) ───┘
//! ```
//!
//! Every store operation opens its own SQLite connection and closes it
//! before returning; there is no pool and no shared mutable state.

pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod metrics_aggregator;
pub mod query;
pub mod store;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::ApiError;
pub use metrics_aggregator::DashboardMetrics;
pub use query::{DateFilter, ExtractionQuery, FilterClause};
pub use store::{Extraction, ExtractionStats, ExtractionStore, NewExtraction};
