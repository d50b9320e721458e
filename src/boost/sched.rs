//! Raw `sched_setattr(2)` / `sched_getattr(2)` wrappers.
//!
//! Glibc has never shipped wrappers for these syscalls, so — the same way
//! the syscall surface this crate's FFI layer is modeled on reaches for
//! `libc::syscall` directly for `perf_event_open` — we issue them by number
//! and translate `-1` into `Error::last_os_error()`.
//!
//! Using `sched_setattr`/`sched_getattr` uniformly (rather than the older
//! `sched_setscheduler`/`sched_getparam` pair) lets the Boost Engine save
//! and restore *any* original policy, including `SCHED_DEADLINE` itself,
//! through one struct shape; see `DESIGN.md` for this Open Question
//! resolution.

use std::io::{Error, Result};
use std::mem::size_of;

use crate::model::Tid;

pub const SCHED_OTHER: u32 = 0;
pub const SCHED_FIFO: u32 = 1;
#[allow(dead_code)]
pub const SCHED_RR: u32 = 2;
#[allow(dead_code)]
pub const SCHED_BATCH: u32 = 3;
#[allow(dead_code)]
pub const SCHED_IDLE: u32 = 5;
pub const SCHED_DEADLINE: u32 = 6;

/// `man 2 sched_setattr`, base (`SCHED_ATTR_SIZE_VER0`) layout. Later
/// kernels append utilization-clamp fields after this; we never set
/// `SCHED_FLAG_UTIL_CLAMP` and always report `size` as this struct's size,
/// so the kernel treats the request as the base version regardless of host
/// kernel vintage.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedAttr {
    pub size: u32,
    pub sched_policy: u32,
    pub sched_flags: u64,
    pub sched_nice: i32,
    pub sched_priority: u32,
    pub sched_runtime: u64,
    pub sched_deadline: u64,
    pub sched_period: u64,
}

impl SchedAttr {
    pub fn new() -> Self {
        Self {
            size: size_of::<Self>() as u32,
            ..Default::default()
        }
    }

    pub fn fifo(priority: i32) -> Self {
        Self {
            sched_policy: SCHED_FIFO,
            sched_priority: priority as u32,
            ..Self::new()
        }
    }

    pub fn deadline(runtime_ns: u64, period_ns: u64) -> Self {
        Self {
            sched_policy: SCHED_DEADLINE,
            sched_runtime: runtime_ns,
            sched_deadline: period_ns,
            sched_period: period_ns,
            ..Self::new()
        }
    }
}

/// Backend abstraction over the raw syscalls, so the Boost Engine's
/// bookkeeping can be exercised in tests with a fake that never touches the
/// real scheduler.
pub trait SchedBackend: Send + Sync {
    fn get_attr(&self, tid: Tid) -> Result<SchedAttr>;
    fn set_attr(&self, tid: Tid, attr: &SchedAttr) -> Result<()>;
}

#[derive(Default)]
pub struct LinuxSchedBackend;

impl SchedBackend for LinuxSchedBackend {
    fn get_attr(&self, tid: Tid) -> Result<SchedAttr> {
        let mut attr = SchedAttr::new();
        let ret = unsafe {
            libc::syscall(
                libc::SYS_sched_getattr,
                tid,
                &mut attr as *mut SchedAttr,
                attr.size,
                0u32,
            )
        };
        if ret == -1 {
            Err(Error::last_os_error())
        } else {
            Ok(attr)
        }
    }

    fn set_attr(&self, tid: Tid, attr: &SchedAttr) -> Result<()> {
        let ret = unsafe {
            libc::syscall(libc::SYS_sched_setattr, tid, attr as *const SchedAttr, 0u32)
        };
        if ret == -1 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
