//! Process listing via the ps command.

use super::{CollectError, ProcessEnumerator};
use coz_common::{ProcessDescriptor, ProcessId};
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, span, Level};

/// Lists processes with `ps -eo pid=,args=`, killing ps if it overruns.
#[derive(Debug, Clone)]
pub struct PsEnumerator {
    timeout: Duration,
}

impl PsEnumerator {
    pub fn new(timeout: Duration) -> Self {
        PsEnumerator { timeout }
    }
}

impl Default for PsEnumerator {
    fn default() -> Self {
        PsEnumerator::new(Duration::from_secs(10))
    }
}

impl ProcessEnumerator for PsEnumerator {
    fn list(&self) -> Result<Vec<ProcessDescriptor>, CollectError> {
        let _span = span!(Level::DEBUG, "ps_list").entered();
        let start = Instant::now();

        let mut child = Command::new("ps")
            .args(["-eo", "pid=,args="])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CollectError::CommandFailed(e.to_string()))?;

        let child_pid = child.id();
        let timeout = self.timeout;
        let finished = Arc::new(AtomicBool::new(false));
        let timed_out = Arc::new(AtomicBool::new(false));

        {
            let finished = finished.clone();
            let timed_out = timed_out.clone();
            thread::spawn(move || {
                thread::sleep(timeout);
                if !finished.load(Ordering::Relaxed) {
                    timed_out.store(true, Ordering::Relaxed);
                    debug!("ps timed out, killing {}", child_pid);
                    unsafe {
                        libc::kill(child_pid as i32, libc::SIGKILL);
                    }
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollectError::CommandFailed("Failed to capture stdout".to_string()))?;

        let mut processes = Vec::new();
        for line in BufReader::new(stdout).lines() {
            let line = line?;
            if let Some(d) = parse_ps_line(&line) {
                processes.push(d);
            }
        }

        // Mark finished before reaping so the watchdog cannot hit a reused pid.
        finished.store(true, Ordering::Relaxed);
        let _ = child.wait();

        if timed_out.load(Ordering::Relaxed) {
            return Err(CollectError::Timeout(timeout));
        }

        debug!(
            process_count = processes.len(),
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "ps listing completed"
        );
        Ok(processes)
    }
}

/// Parse one `pid args...` line. Header and blank lines yield `None`.
fn parse_ps_line(line: &str) -> Option<ProcessDescriptor> {
    let trimmed = line.trim_start();
    let (pid, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((pid, rest)) => (pid, rest.trim()),
        None => (trimmed.trim_end(), ""),
    };
    let pid: u32 = pid.parse().ok()?;
    let name = if rest.is_empty() { "<unknown>" } else { rest };
    Some(ProcessDescriptor::new(ProcessId(pid), name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pid_and_args() {
        let d = parse_ps_line("  4242 java -cp app.jar com.example.Main").unwrap();
        assert_eq!(d.process_id, ProcessId(4242));
        assert_eq!(d.display_name, "java -cp app.jar com.example.Main");
    }

    #[test]
    fn pid_without_args() {
        let d = parse_ps_line("17").unwrap();
        assert_eq!(d.process_id, ProcessId(17));
        assert_eq!(d.display_name, "<unknown>");
    }

    #[test]
    fn header_and_blank_ignored() {
        assert!(parse_ps_line("  PID COMMAND").is_none());
        assert!(parse_ps_line("").is_none());
        assert!(parse_ps_line("   ").is_none());
    }

    #[test]
    fn lists_the_current_process() {
        let me = ProcessId(std::process::id());
        match PsEnumerator::default().list() {
            // Empty when the host's ps rejects the format flags.
            Ok(list) if list.is_empty() => {}
            Ok(list) => assert!(
                list.iter().any(|d| d.process_id == me),
                "ps listing should include pid {}",
                me
            ),
            // ps not installed on this host
            Err(CollectError::CommandFailed(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
