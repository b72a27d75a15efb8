//! Batch aggregation over telemetry records.
//!
//! Every view is a pure function of its input batch.

pub mod aggregator;
pub mod issues;
pub mod runner;
pub mod security;
pub mod stats;
pub mod summary;

pub use self::aggregator::{DevicePerformance, HourlyTraffic, TrafficAggregator};
pub use self::issues::{detect_issues, PerformanceIssues, ProblematicDevice};
pub use self::runner::{aggregate, AggregateReport, ReportMetadata, TimeRange};
pub use self::security::{security_summary, SecurityEventSummary};
pub use self::summary::{summarize, DashboardSummary, DeviceHealth, HealthStatus};
