//! LLM text service access and model-output coercion.
//!
//! This crate provides:
//! - [`TextModel`]: the `{system, user} -> text` contract the pipeline consumes
//! - [`OpenAiClient`]: an OpenAI-compatible chat completions client that
//!   degrades to an empty string instead of failing
//! - [`parser`]: best-effort coercion of free-form model text into JSON
//! - [`prompts`]: the prompt pairs for fact extraction, list selection,
//!   curation and email generation

pub mod client;
pub mod parser;
pub mod prompts;

pub use client::{OpenAiClient, TextModel};
pub use parser::{parse_structured, strip_code_fences};
pub use prompts::Prompt;
