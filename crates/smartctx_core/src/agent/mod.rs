//! Agent-facing helpers over the context service.

pub mod session;
