//! Thin, synchronous readers over the `/proc` and `/sys` interfaces this
//! crate depends on (spec §6). Every function here does exactly one read
//! and one parse; callers decide what an I/O error means for their caller
//! (per-cycle skip vs. startup-fatal vs. "no match").

use std::fs;
use std::io;
use std::path::Path;

use crate::model::Tgid;

/// `/proc/<tid>/stat`: the third whitespace-delimited field is a single
/// character process state. `'R'` means runnable. Used only by the
/// stateless textual source to probe threads that carry no state column of
/// their own.
pub fn thread_is_runnable(tid: i32) -> io::Result<bool> {
    let path = format!("/proc/{tid}/stat");
    let contents = fs::read_to_string(&path)?;
    // The second field is `(comm)` and may itself contain spaces or
    // parentheses, so locate it by the last ')' rather than splitting naively.
    let after_comm = contents
        .rfind(')')
        .map(|idx| &contents[idx + 1..])
        .unwrap_or(&contents);
    let state = after_comm
        .split_whitespace()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing state field"))?;
    Ok(state == "R")
}

/// `/proc/<tgid>/status`: the value of the `Name:` line, used for
/// ignore-tgid-name denylist matching. A failed resolution is reported to
/// the caller as an I/O error; the Starvation Detector treats that as "no
/// match" per spec §4.4.
pub fn tgid_name(tgid: Tgid) -> io::Result<String> {
    let path = format!("/proc/{tgid}/status");
    let contents = fs::read_to_string(&path)?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("Name:") {
            return Ok(rest.trim().to_string());
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "missing Name: line"))
}

/// `/proc/<tid>/status`: the value of the `Tgid:` line. Used by the
/// textual source, which has no tgid column of its own in the
/// `sched_debug` dump.
pub fn thread_tgid(tid: i32) -> io::Result<Tgid> {
    let path = format!("/proc/{tid}/status");
    let contents = fs::read_to_string(&path)?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("Tgid:") {
            return rest
                .trim()
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-numeric Tgid"));
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "missing Tgid: line"))
}

/// `/proc/stat`: the `cpu<N>` line's 4th field (zero-indexed after the CPU
/// token) is the cumulative idle-ticks counter.
pub fn cpu_idle_ticks(cpu_id: u32) -> io::Result<u64> {
    let contents = fs::read_to_string("/proc/stat")?;
    let prefix = format!("cpu{cpu_id}");
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let Some(tag) = fields.next() else { continue };
        if tag != prefix {
            continue;
        }
        let idle = fields
            .nth(3)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing idle field"))?;
        return idle
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-numeric idle field"));
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no {prefix} line in /proc/stat"),
    ))
}

/// `/sys/devices/system/cpu/online`: comma-separated ranges, used to default
/// the monitored CPU set when `--cpus` is not given.
pub fn online_cpus() -> io::Result<Vec<u32>> {
    let contents = fs::read_to_string("/sys/devices/system/cpu/online")?;
    crate::config::parse_cpu_list(contents.trim())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// `/proc/sys/kernel/sched_rt_runtime_us`: `-1` means unbounded.
pub fn rt_runtime_us() -> io::Result<i64> {
    let contents = fs::read_to_string("/proc/sys/kernel/sched_rt_runtime_us")?;
    contents
        .trim()
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-numeric sched_rt_runtime_us"))
}

pub fn write_rt_runtime_us(value: i64) -> io::Result<()> {
    fs::write("/proc/sys/kernel/sched_rt_runtime_us", value.to_string())
}

/// `/sys/kernel/debug/sched/fair_server` presence indicates the kernel's
/// automatic fair-server mechanism is compiled in and may be active.
pub fn fair_server_present() -> bool {
    Path::new("/sys/kernel/debug/sched/fair_server").exists()
}
