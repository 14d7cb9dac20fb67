//! Shared types, error model, and configuration for exposecast.
//!
//! This crate is the foundation depended on by all other exposecast crates.
//! It provides:
//! - [`ExposecastError`]: the unified error type
//! - Domain types ([`TaskId`], [`Progress`], [`TaskResult`], [`KeyFacts`], CRM records)
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrmConfig, LlmConfig, PipelineConfig, ServerConfig, TasksConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_secret,
};
pub use error::{ExposecastError, Result};
pub use types::{
    Address, CompanyRecord, ContactRecord, ERROR_PREFIX, FactValue, KeyFacts, ListDescriptor,
    MISSING, Progress, RecordBase, TaskId, TaskResult,
};
