//! Context sharing policy between agents.

pub mod policy;
