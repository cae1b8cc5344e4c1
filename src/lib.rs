//! Traffic statistics over per-camera vehicle detections.
//!
//! Detections are stored in date partitions (one SurrealDB table per day, or a
//! single flat table). The aggregation engine scans the partitions a request
//! needs, merges rows that share a grouping key, and returns totals plus
//! sorted details. On top of it sit the REST API, scheduled email reports, and
//! a synthetic ingestion task.

pub mod api;
pub mod cameras;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod mailer;
pub mod models;
pub mod partition;
pub mod report;
pub mod timefilter;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{StatsError, StatsResult};
