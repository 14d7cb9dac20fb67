//! Pipeline orchestration and model-output handling for exposecast.
//!
//! This crate ties the document, model and CRM collaborators together:
//! - [`facts`]: key-fact extraction that degrades to defaults
//! - [`curation`]: the self-correcting ranked entity list
//! - [`pipeline`]: the staged run of one task, its failure boundary and deadline
//! - [`runner`]: admission control and bounded concurrency

pub mod curation;
pub mod facts;
pub mod pipeline;
pub mod runner;

#[cfg(test)]
mod testing;

pub use curation::{CURATION_FAILED, curate_top_entities, split_bracketed};
pub use facts::extract_facts;
pub use pipeline::{Pipeline, STATUS_COMPLETE};
pub use runner::TaskRunner;
