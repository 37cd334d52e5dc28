//! Context document domain model.
//!
//! # Responsibility
//! - Define the typed document persisted per project.
//! - Validate raw documents and merge caller patches into typed sections.
//!
//! # Invariants
//! - One document per project ID; the project ID lives in `metadata`.
//! - Schema-less sections stay schema-less: unknown keys are preserved.

pub mod context;
mod lenient;
pub mod merge;
pub mod validate;
