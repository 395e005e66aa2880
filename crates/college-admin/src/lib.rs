//! Student lifecycle and invoice approval workflows for a college administration backend.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
