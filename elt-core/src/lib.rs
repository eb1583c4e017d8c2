//! Commodity ELT core: extract daily closes, replace the raw table, and drive
//! dbt plus its state manifest for CI/CD.
//!
//! - `data`: providers (Yahoo Finance), the commodity catalog, extraction
//! - `warehouse`: raw table replace over PostgreSQL
//! - `state`: object stores and manifest pull/push
//! - `transform`: dbt invocations
//! - `workflow`: integration and delivery step sequences
//! - `config`, `logging`, `process`: ambient plumbing

pub mod config;
pub mod data;
pub mod logging;
pub mod process;
pub mod state;
pub mod transform;
pub mod warehouse;
pub mod workflow;

pub use config::{ConfigError, PipelineConfig};
pub use workflow::{Workflow, WorkflowReport, WorkflowRunner};
