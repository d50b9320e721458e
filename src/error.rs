//! Crate-wide error types.
//!
//! Low-level FFI wrappers return `std::io::Result` the same way the rest of
//! the syscall surface does; richer error kinds exist only at the module
//! boundaries that need to distinguish fatal-at-startup from
//! contained-within-a-cycle failures.

use std::io;

use thiserror::Error;

/// Fatal at startup: unparseable flags, mutually exclusive strategies,
/// `runtime > period`, fixed-priority forced together with the power
/// strategy, and similar misconfigurations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("runtime ({runtime}ns) must not exceed period ({period}ns)")]
    RuntimeExceedsPeriod { runtime: u64, period: u64 },

    #[error("runtime must be non-zero")]
    ZeroRuntime,

    #[error("the power strategy requires the deadline method; fixed-priority was forced")]
    PowerRequiresDeadline,

    #[error("invalid CPU set specification: {0}")]
    InvalidCpuSet(String),

    #[error("invalid regular expression in {field}: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("unknown source backend: {0}")]
    UnknownSource(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("failed to read online CPU list: {0}")]
    CpuListUnreadable(#[source] io::Error),
}

/// Fatal at startup, but discovered only once the environment is probed
/// rather than while parsing flags: RT throttling engaged without a
/// supervisor, the Method Probe failing while deadline was forced, or both
/// runqueue sources failing `init()`.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("RT runtime throttling is enabled ({0}us bound) and no supervisor sentinel is present")]
    RtThrottleEngaged(i64),

    #[error("failed to write unbounded RT runtime to {knob}: {source}")]
    RtThrottleWriteFailed {
        knob: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("deadline scheduling is unavailable and fixed-priority was not permitted")]
    DeadlineUnavailable,

    #[error("no runqueue source could be initialized: debugfs/procfs ({text_err}), tracepoint ({tp_err})")]
    NoSourceAvailable {
        text_err: String,
        tp_err: String,
    },

    #[error("process lacks capability to set scheduling attributes: {0}")]
    PermissionDenied(#[source] io::Error),

    #[error("failed to acquire pidfile lock at {path}: {source}")]
    PidfileUnavailable {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-cycle, per-CPU: the affected CPU is dropped from the current cycle
/// only. Never fatal, even under repeated failure.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error reading snapshot source: {0}")]
    Io(#[from] io::Error),

    #[error("malformed snapshot data: {0}")]
    Malformed(String),
}

/// Top-level error returned by fallible entry points that need to report a
/// single kind upward (`main`, CLI parsing). Leaf errors convert into this
/// via `#[from]`.
#[derive(Debug, Error)]
pub enum StalldError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
