//! Process-wide shutdown signalling (spec §4.11, §5 "Cancellation").
//!
//! SIGTERM and SIGINT both flip one `Arc<AtomicBool>` via `signal-hook`'s
//! flag API, registered once before any worker thread starts. Every sleep
//! point named in spec §5 is taken through [`sleep_interruptible`] so that
//! shutdown latency is bounded by `SLICE` regardless of which sleep a
//! worker happens to be in. SIGHUP is deliberately left unhandled: `Config`
//! is frozen after parse and there is nothing to reload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on how long a single slice of an interruptible sleep may
/// run before re-checking the shutdown flag.
const SLICE: Duration = Duration::from_millis(100);

#[derive(Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Registers SIGTERM and SIGINT against this flag. Must be called
    /// before any worker thread starts sleeping.
    pub fn install_handlers(&self) -> std::io::Result<()> {
        signal_hook::flag::register(signal_hook::consts::SIGTERM, self.0.clone())?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, self.0.clone())?;
        Ok(())
    }

    /// Sleeps for `duration`, waking early (returning `false`) the moment
    /// shutdown is requested. Returns `true` if the full duration elapsed
    /// without interruption.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.is_set() {
                return false;
            }
            let slice = remaining.min(SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        !self.is_set()
    }
}
