//! The Method Probe: one-shot startup detection of which elevation
//! mechanism the host supports (spec §4.8).

use tracing::{info, warn};

use crate::boost::sched::{SchedAttr, SchedBackend};
use crate::config::Method;
use crate::error::EnvironmentError;
use crate::model::Tid;

/// A vanishingly small runtime used for the no-op probe attempt; large
/// enough that `sched_setattr` never rejects it as zero, small enough to be
/// negligible if the probe thread is briefly scheduled under it.
const PROBE_RUNTIME_NS: u64 = 1_000;
const PROBE_PERIOD_NS: u64 = 1_000_000_000;

/// Attempts a no-op deadline attribute set on the current thread, then
/// restores it. `force_fixed_priority` bypasses the probe entirely.
pub fn select_method(
    backend: &dyn SchedBackend,
    force_fixed_priority: bool,
) -> Result<Method, EnvironmentError> {
    if force_fixed_priority {
        info!("fixed-priority elevation method forced by configuration");
        return Ok(Method::FixedPriority);
    }

    let tid: Tid = current_tid();

    let saved = backend
        .get_attr(tid)
        .map_err(EnvironmentError::PermissionDenied)?;

    let probe_attr = SchedAttr::deadline(PROBE_RUNTIME_NS, PROBE_PERIOD_NS);
    match backend.set_attr(tid, &probe_attr) {
        Ok(()) => {
            // Best-effort restore; failure here does not change the
            // verdict, since the probe itself already proved deadline
            // scheduling is available.
            if let Err(e) = backend.set_attr(tid, &saved) {
                warn!(error = %e, "failed to restore pre-probe scheduling attributes");
            }
            info!("deadline scheduling method selected");
            Ok(Method::Deadline)
        }
        Err(e) => {
            info!(error = %e, "deadline scheduling unavailable; falling back to fixed-priority");
            Ok(Method::FixedPriority)
        }
    }
}

fn current_tid() -> Tid {
    unsafe { libc::syscall(libc::SYS_gettid) as Tid }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct AlwaysSucceeds;
    impl SchedBackend for AlwaysSucceeds {
        fn get_attr(&self, _tid: Tid) -> std::io::Result<SchedAttr> {
            Ok(SchedAttr::new())
        }
        fn set_attr(&self, _tid: Tid, _attr: &SchedAttr) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct AlwaysFailsSet(Mutex<()>);
    impl SchedBackend for AlwaysFailsSet {
        fn get_attr(&self, _tid: Tid) -> std::io::Result<SchedAttr> {
            Ok(SchedAttr::new())
        }
        fn set_attr(&self, _tid: Tid, _attr: &SchedAttr) -> std::io::Result<()> {
            let _ = self.0.lock();
            Err(std::io::Error::from_raw_os_error(libc::EPERM))
        }
    }

    #[test]
    fn force_flag_bypasses_probe() {
        let backend = AlwaysFailsSet(Mutex::new(()));
        let method = select_method(&backend, true).unwrap();
        assert_eq!(method, Method::FixedPriority);
    }

    #[test]
    fn successful_set_attr_selects_deadline() {
        let backend = AlwaysSucceeds;
        let method = select_method(&backend, false).unwrap();
        assert_eq!(method, Method::Deadline);
    }

    #[test]
    fn failed_set_attr_selects_fixed_priority() {
        let backend = AlwaysFailsSet(Mutex::new(()));
        let method = select_method(&backend, false).unwrap();
        assert_eq!(method, Method::FixedPriority);
    }
}
