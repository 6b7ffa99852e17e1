//! Structured logging for cozctl.
//!
//! Two output modes, both on stderr so stdout stays free for command
//! payloads:
//! - Human-readable console output for interactive use
//! - JSONL for scripted runs and the control service
//!
//! # Usage
//!
//! ```ignore
//! use coz_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//!
//! let ctx = LogContext::new(generate_run_id(), get_host_id()).with_pid(4242);
//! log_event!(ctx, INFO, event_names::ATTACH_STARTED, Stage::Attach, "attaching");
//! ```

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events are shown at the configured level.
const LOG_TARGETS: &[&str] = &[
    "coz_core",
    "cozctl",
    "coz_profile",
    "run",
    "config",
    "attach",
    "configure",
    "profile",
    "poll",
    "drain",
    "serve",
    "internal_error",
];

fn default_filter(level: LogLevel) -> EnvFilter {
    let directives: Vec<String> = LOG_TARGETS
        .iter()
        .map(|t| format!("{}={}", t, level))
        .collect();
    EnvFilter::new(directives.join(","))
}

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. `RUST_LOG`
/// replaces the default filter when set.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config.level));

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init();
            } else {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init();
            }
        }
        LogFormat::Jsonl => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(JsonlLayer::stderr())
                .try_init();
        }
    }
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    format!("run-{}", &uuid.simple().to_string()[..12])
}

/// Host ID for log correlation.
///
/// Uses machine-id on Linux, otherwise a random suffix.
pub fn get_host_id() -> String {
    host_id_from(std::fs::read_to_string("/etc/machine-id").ok().as_deref())
}

fn host_id_from(machine_id: Option<&str>) -> String {
    let prefix = |id: &str| id.chars().take(8).collect::<String>();
    match machine_id.map(str::trim) {
        Some(id) if id.chars().count() >= 8 => format!("host-{}", prefix(id)),
        _ => format!("host-{}", prefix(&uuid::Uuid::new_v4().simple().to_string())),
    }
}

/// Human-meaningful name of this host, used as a profile's source identity.
pub fn get_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    "localhost".to_string()
}

/// Structured event logging with run context.
///
/// Usage:
/// ```ignore
/// log_event!(ctx, INFO, "attach.started", Stage::Attach, "Attaching", host = "db1");
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, $level:ident, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::event!(
            target: $event,
            tracing::Level::$level,
            run_id = $ctx.run_id.as_str(),
            host_id = $ctx.host_id.as_str(),
            pid = $ctx.pid,
            stage = $stage.as_str(),
            message = $msg,
            $($key = $val,)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_short() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run-"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn host_id_has_prefix() {
        let id = get_host_id();
        assert!(id.starts_with("host-"));
        assert!(id.len() >= 13);
    }

    #[test]
    fn host_id_tolerates_short_and_multibyte_machine_ids() {
        assert_eq!(host_id_from(Some("0123456789abcdef\n")), "host-01234567");
        assert_eq!(host_id_from(Some("ééééééééé")), "host-éééééééé");
        let short = host_id_from(Some("abc"));
        assert!(short.starts_with("host-"));
        assert_eq!(short.chars().count(), 13);
        assert_eq!(host_id_from(None).chars().count(), 13);
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!get_hostname().is_empty());
    }

    #[test]
    fn default_filter_covers_event_targets() {
        let rendered = default_filter(LogLevel::Debug).to_string();
        assert!(rendered.contains("poll=debug"));
        assert!(rendered.contains("coz_core=debug"));
    }
}
