//! Cooperative cancellation, observed at poll boundaries.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while waiting for the next poll.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Set by SIGINT/SIGTERM once handlers are installed.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signum: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the process-wide cancellation flag.
pub fn install_signal_handlers() -> io::Result<()> {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        let previous = unsafe { libc::signal(signum, handler) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Whether a termination signal has arrived.
pub fn signal_received() -> bool {
    SIGNALLED.load(Ordering::SeqCst)
}

/// Cloneable stop request shared between the polling loop and whoever may
/// want it to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    watch_signals: bool,
}

impl CancelToken {
    /// Cancelled only through [`cancel`](Self::cancel).
    pub fn new() -> Self {
        Self::default()
    }

    /// Also cancelled by SIGINT/SIGTERM (see [`install_signal_handlers`]).
    pub fn with_signals() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            watch_signals: true,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || (self.watch_signals && signal_received())
    }

    /// Sleep for `duration` in short slices. Returns true as soon as
    /// cancellation is observed.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }
}
