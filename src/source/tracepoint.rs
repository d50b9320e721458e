//! The tracepoint Runqueue Source (spec §4.1, §6): one `sched_switch`
//! tracepoint per monitored CPU, read from its mmap'd ring buffer. Where the
//! textual source re-reads a whole-system snapshot every cycle, this
//! backend accumulates `sched_switch` events as they happen and derives
//! each CPU's currently-waiting set from the running total of threads it
//! has seen switched onto that CPU but not yet seen leave it starved.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::SourceError;
use crate::ffi::{self, PerfEventAttr, PERF_RECORD_SAMPLE};
use crate::model::{Comm, TaskSnapshot, Tid};
use crate::source::{CpuSnapshot, RunqueueSource};

const TRACEFS_EVENT_DIR: &str = "/sys/kernel/tracing/events/sched/sched_switch";
const DEBUGFS_EVENT_DIR: &str = "/sys/kernel/debug/tracing/events/sched/sched_switch";
const RING_PAGES: usize = 8; // data pages only; +1 metadata page is added on top

/// Byte offsets of the fields this crate reads out of a `sched_switch`
/// tracepoint's raw payload, discovered once from its `format` file rather
/// than hardcoded, since the common-field prefix length varies across
/// kernel configurations (e.g. `CONFIG_TRACE_EVENT_INJECT`).
///
/// Both halves of the event matter here, not just `next_*`: `prev_pid` is
/// the thread leaving the CPU (entering the waiting set if it is still
/// runnable, i.e. merely preempted rather than blocked) and `next_pid` is
/// the thread taking the CPU (leaving the waiting set, since a running
/// thread is by definition not waiting).
#[derive(Clone, Copy, Debug)]
struct SchedSwitchFields {
    prev_comm: usize,
    prev_pid: usize,
    prev_prio: usize,
    prev_state: usize,
    prev_state_size: usize,
    next_pid: usize,
}

fn find_event_dir() -> Option<&'static Path> {
    for candidate in [TRACEFS_EVENT_DIR, DEBUGFS_EVENT_DIR] {
        let path = Path::new(candidate);
        if path.join("format").exists() {
            // Leak is fine: at most two short static-lifetime strings for
            // the life of the process.
            return Some(Box::leak(path.to_path_buf().into_boxed_path()));
        }
    }
    None
}

fn read_tracepoint_id(event_dir: &Path) -> Result<u64, SourceError> {
    let contents = std::fs::read_to_string(event_dir.join("id"))?;
    contents
        .trim()
        .parse()
        .map_err(|_| SourceError::Malformed("non-numeric tracepoint id".to_string()))
}

/// Parses lines shaped like `field:char prev_comm[16]; offset:8; size:16; signed:0;`.
fn parse_format_fields(event_dir: &Path) -> Result<SchedSwitchFields, SourceError> {
    let contents = std::fs::read_to_string(event_dir.join("format"))?;
    let mut prev_comm = None;
    let mut prev_pid = None;
    let mut prev_prio = None;
    let mut prev_state = None;
    let mut prev_state_size = None;
    let mut next_pid = None;

    for line in contents.lines() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix("field:") else {
            continue;
        };
        let Some((decl, meta)) = rest.split_once(';') else {
            continue;
        };
        let offset = meta
            .split(';')
            .find_map(|part| part.trim().strip_prefix("offset:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        let Some(offset) = offset else { continue };
        let size = meta
            .split(';')
            .find_map(|part| part.trim().strip_prefix("size:"))
            .and_then(|v| v.trim().parse::<usize>().ok());

        if decl.contains("prev_comm") {
            prev_comm = Some(offset);
        } else if decl.contains("prev_pid") {
            prev_pid = Some(offset);
        } else if decl.contains("prev_prio") {
            prev_prio = Some(offset);
        } else if decl.contains("prev_state") {
            prev_state = Some(offset);
            prev_state_size = size;
        } else if decl.contains("next_pid") {
            next_pid = Some(offset);
        }
    }

    Ok(SchedSwitchFields {
        prev_comm: prev_comm
            .ok_or_else(|| SourceError::Malformed("sched_switch format missing prev_comm".to_string()))?,
        prev_pid: prev_pid
            .ok_or_else(|| SourceError::Malformed("sched_switch format missing prev_pid".to_string()))?,
        prev_prio: prev_prio
            .ok_or_else(|| SourceError::Malformed("sched_switch format missing prev_prio".to_string()))?,
        prev_state: prev_state
            .ok_or_else(|| SourceError::Malformed("sched_switch format missing prev_state".to_string()))?,
        prev_state_size: prev_state_size
            .ok_or_else(|| SourceError::Malformed("sched_switch format missing prev_state size".to_string()))?,
        next_pid: next_pid
            .ok_or_else(|| SourceError::Malformed("sched_switch format missing next_pid".to_string()))?,
    })
}

struct Ring {
    file: File,
    meta: NonNull<u8>,
    data: NonNull<u8>,
    mmap_len: usize,
    data_len: usize,
}

impl Ring {
    fn open(tracepoint_id: u64, cpu: i32) -> std::io::Result<Self> {
        let attr = PerfEventAttr::tracepoint(tracepoint_id, 1);
        let file = ffi::perf_event_open(&attr, -1, cpu, -1, 0)?;

        let page_size = 4096usize;
        let data_len = RING_PAGES * page_size;
        let mmap_len = page_size + data_len;

        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_SHARED;
        let ptr: *mut u8 = unsafe { ffi::mmap(mmap_len, prot, flags, &file, 0) }?;
        let meta = NonNull::new(ptr).expect("mmap returned null on success");
        let data = unsafe { NonNull::new_unchecked(ptr.add(page_size)) };

        Ok(Self {
            file,
            meta,
            data,
            mmap_len,
            data_len,
        })
    }

    fn data_head(&self) -> &AtomicU64 {
        // Offset of `data_head` within `perf_event_mmap_page`: the fixed
        // 96-byte prefix through `time_mask` plus the 116-word reserved
        // block, per the kernel's published layout.
        const DATA_HEAD_OFFSET: usize = 96 + 116 * 8;
        unsafe { &*(self.meta.as_ptr().add(DATA_HEAD_OFFSET) as *const AtomicU64) }
    }

    fn data_tail(&self) -> &AtomicU64 {
        const DATA_TAIL_OFFSET: usize = 96 + 116 * 8 + 8;
        unsafe { &*(self.meta.as_ptr().add(DATA_TAIL_OFFSET) as *const AtomicU64) }
    }

    /// Drains every complete record currently in the buffer, invoking
    /// `on_raw` with each `PERF_RECORD_SAMPLE`'s raw tracepoint payload.
    fn drain(&self, mut on_raw: impl FnMut(&[u8])) {
        let head = self.data_head().load(Ordering::Acquire);
        let mut tail = self.data_tail().load(Ordering::Relaxed);

        while tail < head {
            let base = (tail as usize) % self.data_len;
            let header = self.read_at(base, 8);
            let record_type = u32::from_ne_bytes(header[0..4].try_into().unwrap());
            let size = u16::from_ne_bytes(header[6..8].try_into().unwrap()) as usize;
            if size < 8 {
                break; // corrupt record; stop rather than loop forever
            }

            if record_type == PERF_RECORD_SAMPLE {
                let body = self.read_at(base + 8, size - 8);
                if body.len() >= 4 {
                    let raw_size = u32::from_ne_bytes(body[0..4].try_into().unwrap()) as usize;
                    if body.len() >= 4 + raw_size {
                        on_raw(&body[4..4 + raw_size]);
                    }
                }
            }

            tail += size as u64;
        }

        self.data_tail().store(tail, Ordering::Release);
    }

    fn read_at(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        for (i, byte) in out.iter_mut().enumerate() {
            let pos = (offset + i) % self.data_len;
            *byte = unsafe { *self.data.as_ptr().add(pos) };
        }
        out
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        let _ = unsafe { ffi::munmap(self.meta.as_ptr(), self.mmap_len) };
    }
}

/// Tracks, per CPU, the threads a `sched_switch` event has put back onto
/// the runqueue without yet switching them onto the CPU again: the running
/// approximation of "currently waiting on this runqueue" this backend can
/// derive from a pure event stream, since unlike the textual source it
/// never gets a full instantaneous snapshot. A thread enters this set when
/// it is preempted while still runnable (`prev_pid` with `TASK_RUNNING`
/// state) and leaves it the moment it is next switched onto a CPU
/// (`next_pid`) or observed blocking (`prev_pid` with a non-running
/// state) — so the thread presently executing on a CPU is never a member.
pub struct TracepointSource {
    fields: Option<SchedSwitchFields>,
    tracepoint_id: u64,
    rings: HashMap<u32, Ring>,
    onrq: HashMap<u32, HashMap<crate::model::Tid, TaskSnapshot>>,
}

impl TracepointSource {
    pub fn new() -> Self {
        Self {
            fields: None,
            tracepoint_id: 0,
            rings: HashMap::new(),
            onrq: HashMap::new(),
        }
    }

    /// Opens and caches the ring for `cpu` if it isn't already. Returns only
    /// `()` rather than the new `&Ring`, so callers re-borrow `self.rings`
    /// directly afterwards instead of holding a reference derived from this
    /// `&mut self` call alongside an unrelated borrow of `self.onrq`.
    fn ensure_ring(&mut self, cpu: u32) -> Result<(), SourceError> {
        if !self.rings.contains_key(&cpu) {
            let ring = Ring::open(self.tracepoint_id, cpu as i32)
                .map_err(|e| SourceError::Malformed(format!("perf_event_open/mmap for cpu {cpu}: {e}")))?;
            self.rings.insert(cpu, ring);
        }
        Ok(())
    }
}

impl Default for TracepointSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RunqueueSource for TracepointSource {
    fn init(&mut self) -> Result<(), SourceError> {
        let event_dir = find_event_dir().ok_or_else(|| {
            SourceError::Malformed("no sched_switch tracepoint under tracefs/debugfs".to_string())
        })?;
        self.tracepoint_id = read_tracepoint_id(event_dir)?;
        self.fields = Some(parse_format_fields(event_dir)?);
        debug!(tracepoint_id = self.tracepoint_id, "sched_switch tracepoint resolved");
        Ok(())
    }

    fn snapshot(
        &mut self,
        cpus: &[u32],
        now: u64,
    ) -> Result<HashMap<u32, CpuSnapshot>, SourceError> {
        let fields = self.fields.ok_or_else(|| SourceError::Malformed("init() not called".to_string()))?;
        let mut out = HashMap::new();

        for &cpu in cpus {
            let ring = match self.ensure_ring(cpu) {
                Ok(_) => self.rings.get(&cpu).unwrap(),
                Err(e) => {
                    tracing::warn!(cpu, error = %e, "dropping cpu from this cycle");
                    continue;
                }
            };

            let entry = self.onrq.entry(cpu).or_default();
            ring.drain(|raw| {
                let Some(event) = parse_sched_switch(raw, &fields) else {
                    return;
                };
                if event.prev_runnable {
                    entry.insert(
                        event.prev_tid,
                        TaskSnapshot {
                            tid: event.prev_tid,
                            tgid: crate::procfs::thread_tgid(event.prev_tid).unwrap_or(0),
                            comm: event.prev_comm,
                            prio: event.prev_prio,
                            ctxsw: now,
                            since: now,
                        },
                    );
                } else {
                    entry.remove(&event.prev_tid);
                }
                // `next_tid` is now running, not waiting, regardless of
                // whether it was tracked as waiting a moment ago.
                entry.remove(&event.next_tid);
            });

            out.insert(
                cpu,
                CpuSnapshot {
                    nr_running: entry.len() as u32,
                    nr_rt_running: 0,
                    waiting: entry.values().cloned().collect(),
                },
            );
        }

        Ok(out)
    }

    fn destroy(&mut self) {
        self.rings.clear();
    }
}

/// One decoded `sched_switch` event: the thread leaving the CPU (`prev_*`,
/// with whether it remains runnable) and the tid of the thread taking it
/// (`next_pid`).
struct SchedSwitchEvent {
    prev_tid: Tid,
    prev_comm: Comm,
    prev_prio: i64,
    /// `true` if `prev_state` was `TASK_RUNNING` (all zero): the thread was
    /// merely preempted and belongs back on the waiting set. `false` means
    /// it blocked (sleeping, stopped, ...) and has left the runqueue
    /// entirely.
    prev_runnable: bool,
    next_tid: Tid,
}

fn parse_sched_switch(raw: &[u8], fields: &SchedSwitchFields) -> Option<SchedSwitchEvent> {
    let needed = [
        fields.prev_pid + 4,
        fields.prev_comm + 16,
        fields.prev_prio + 4,
        fields.prev_state + fields.prev_state_size,
        fields.next_pid + 4,
    ]
    .into_iter()
    .max()
    .unwrap();
    if raw.len() < needed {
        return None;
    }

    let prev_tid = i32::from_ne_bytes(raw[fields.prev_pid..fields.prev_pid + 4].try_into().ok()?);
    let prev_comm = Comm::from_bytes(&raw[fields.prev_comm..fields.prev_comm + 16]);
    let prev_prio = i32::from_ne_bytes(raw[fields.prev_prio..fields.prev_prio + 4].try_into().ok()?) as i64;
    let state_bytes = raw.get(fields.prev_state..fields.prev_state + fields.prev_state_size)?;
    let prev_runnable = state_bytes.iter().all(|&b| b == 0);
    let next_tid = i32::from_ne_bytes(raw[fields.next_pid..fields.next_pid + 4].try_into().ok()?);

    Some(SchedSwitchEvent {
        prev_tid,
        prev_comm,
        prev_prio,
        prev_runnable,
        next_tid,
    })
}
