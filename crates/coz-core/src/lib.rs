//! Causal profiling client library.
//!
//! Control plane for attaching to a profiled process (on this host through
//! its agent endpoint, or on another host through a control service),
//! configuring what to measure, and pulling experiment batches into a
//! resumable profile:
//! - Process enumeration
//! - Attach gateway and target proxies (local / remote)
//! - Session registry and per-session state machine
//! - Polling driver with guaranteed drain on every exit path
//! - Agent endpoint embedded in profiled processes
//! - Control service for remote hosts
//!
//! The binary entry point is in `main.rs`.

pub mod agent;
pub mod attach;
pub mod collect;
pub mod config;
pub mod driver;
pub mod exit_codes;
pub mod logging;
pub mod proxy;
pub mod rpc;
pub mod service;
pub mod session;

pub use attach::AttachGateway;
pub use driver::{CancelToken, DriveReport, PollingDriver, ProfilingGuard, StopReason};
pub use session::{Session, SessionHandle, SessionRegistry, SessionState};
