//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate file layout and JSON encoding from service orchestration.
//!
//! # Invariants
//! - Repository writes must pass `validate_document` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `Validation`) in
//!   addition to I/O transport errors.

pub mod context_repo;
