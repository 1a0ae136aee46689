//! Shared domain types for the relay worker.
//!
//! Everything the engine, status and upload crates agree on lives here:
//! run identifiers, job status payloads, artifact descriptors, upload
//! targets, the core error enum and the clock abstraction.

pub mod clock;
pub mod error;
pub mod job;
pub mod types;
pub mod upload;
