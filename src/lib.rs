//! sqlscribe: natural language to SQL for SQLite.
//!
//! The engine assembles grounding context (schema plus curated knowledge),
//! asks an LLM for a candidate statement, validates it against a strict
//! read-only safety policy, executes it under resource bounds, and retries
//! with corrective context when an attempt fails.

pub mod config;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod knowledge;
pub mod oracle;
pub mod prompt;
pub mod resolver;
pub mod schema;
pub mod validator;
