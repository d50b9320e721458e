//! The RT-Throttle Gate: a one-shot startup check that the host permits
//! unbounded RT runtime (spec §4.7).

use std::path::Path;

use tracing::info;

use crate::error::EnvironmentError;

const RT_RUNTIME_KNOB: &str = "/proc/sys/kernel/sched_rt_runtime_us";
const UNBOUNDED: i64 = -1;

/// A lock-file sentinel at this path indicates an external supervisor
/// manages RT throttling for its unit and stalld should not touch the knob.
const SUPERVISOR_SENTINEL: &str = "/run/stalld-supervisor-managed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    AlreadyUnbounded,
    SupervisorManaged,
    MustWrite,
}

fn decide(current_us: i64, sentinel_present: bool) -> Decision {
    if current_us == UNBOUNDED {
        Decision::AlreadyUnbounded
    } else if sentinel_present {
        Decision::SupervisorManaged
    } else {
        Decision::MustWrite
    }
}

/// Ensures the host allows unbounded RT runtime, writing the knob if
/// necessary and permitted. Returns `Ok(())` if the check passed or was
/// skipped because a supervisor sentinel is present.
pub fn ensure_unbounded(sentinel_path: Option<&Path>) -> Result<(), EnvironmentError> {
    let current = crate::procfs::rt_runtime_us().unwrap_or(UNBOUNDED);
    let sentinel = sentinel_path.unwrap_or_else(|| Path::new(SUPERVISOR_SENTINEL));

    match decide(current, sentinel.exists()) {
        Decision::AlreadyUnbounded => Ok(()),
        Decision::SupervisorManaged => {
            info!(
                knob = RT_RUNTIME_KNOB,
                current_us = current,
                "RT runtime is throttled but a supervisor sentinel is present; skipping"
            );
            Ok(())
        }
        Decision::MustWrite => {
            crate::procfs::write_rt_runtime_us(UNBOUNDED).map_err(|source| {
                EnvironmentError::RtThrottleWriteFailed {
                    knob: RT_RUNTIME_KNOB,
                    source,
                }
            })?;
            info!(knob = RT_RUNTIME_KNOB, "wrote unbounded RT runtime");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_unbounded_short_circuits_regardless_of_sentinel() {
        assert_eq!(decide(-1, false), Decision::AlreadyUnbounded);
        assert_eq!(decide(-1, true), Decision::AlreadyUnbounded);
    }

    #[test]
    fn throttled_with_sentinel_is_supervisor_managed() {
        assert_eq!(decide(950_000, true), Decision::SupervisorManaged);
    }

    #[test]
    fn throttled_without_sentinel_must_write() {
        assert_eq!(decide(950_000, false), Decision::MustWrite);
    }

    #[test]
    fn sentinel_file_presence_is_detected_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("sentinel");
        assert!(!sentinel.exists());
        std::fs::write(&sentinel, b"").unwrap();
        assert!(sentinel.exists());
        assert_eq!(decide(950_000, sentinel.exists()), Decision::SupervisorManaged);
    }
}
