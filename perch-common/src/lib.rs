//! Shared utilities for the Perch workspace.
//!
//! Currently this is only the [`observability`] module: a centralised
//! `tracing` initialiser used by the binary and by integration tests. It is
//! intentionally lightweight so every crate can depend on it without heavy
//! transitive costs.

pub mod observability;
