//! Shared types for the causal profiling client.
//!
//! This crate provides the vocabulary every other crate speaks:
//! - Process identity and descriptors
//! - Profiling targets (progress point, scope)
//! - Experiment records streamed out of a profiled process
//! - Target status codes
//! - The error taxonomy surfaced to callers

pub mod error;
pub mod experiment;
pub mod id;
pub mod status;
pub mod target;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use experiment::Experiment;
pub use id::{ProcessDescriptor, ProcessId};
pub use status::StatusCode;
pub use target::{ProgressPoint, Scope, Transport};
