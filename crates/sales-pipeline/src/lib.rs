//! Opportunity lifecycle engine behind the sales pipeline dashboard.
//!
//! The [`pipeline`] module holds the domain core; [`config`], [`telemetry`] and
//! [`error`] carry the application plumbing shared with the API service.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod telemetry;
