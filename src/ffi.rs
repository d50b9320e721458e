//! Raw syscall wrappers the `libc` crate doesn't provide a safe surface
//! for. Every wrapper here does exactly one syscall and maps `-1` to
//! `Error::last_os_error()`, the same shape the rest of this crate's
//! syscall-facing code (`boost::sched`) uses.

use std::fs::File;
use std::io::{Error, Result};
use std::os::fd::FromRawFd;

/// `struct perf_event_attr`, truncated to the fields this crate sets. The
/// kernel accepts a shorter struct than its own definition as long as
/// `size` matches what was actually supplied; trailing fields are treated
/// as zero. This mirrors how `boost::sched::SchedAttr` hand-rolls just the
/// fields it needs rather than depending on generated bindings.
#[repr(C)]
pub struct PerfEventAttr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
}

pub const PERF_TYPE_TRACEPOINT: u32 = 2;
pub const PERF_SAMPLE_RAW: u64 = 1 << 10;
pub const PERF_FLAG_DISABLED: u64 = 1 << 0;
pub const PERF_RECORD_SAMPLE: u32 = 9;

impl PerfEventAttr {
    pub fn tracepoint(config: u64, wakeup_events: u32) -> Self {
        Self {
            type_: PERF_TYPE_TRACEPOINT,
            size: std::mem::size_of::<Self>() as u32,
            config,
            sample_period: 1,
            sample_type: PERF_SAMPLE_RAW,
            read_format: 0,
            flags: 0,
            wakeup_events,
            bp_type: 0,
            config1: 0,
            config2: 0,
        }
    }
}

pub fn perf_event_open(attr: &PerfEventAttr, pid: i32, cpu: i32, group_fd: i32, flags: u64) -> Result<File> {
    let num = libc::SYS_perf_event_open;
    let fd = unsafe { libc::syscall(num, attr, pid, cpu, group_fd, flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd as _) })
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn mmap<T>(len: usize, prot: i32, flags: i32, file: &File, offset: i64) -> Result<*mut T> {
    use std::os::fd::AsRawFd;
    let ptr = libc::mmap(std::ptr::null_mut(), len, prot, flags, file.as_raw_fd(), offset);
    if ptr != libc::MAP_FAILED {
        Ok(ptr as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn munmap<T>(ptr: *mut T, len: usize) -> Result<()> {
    let result = libc::munmap(ptr as _, len);
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}
