//! Starvation avoidance daemon: periodically scans monitored CPUs'
//! runqueues, identifies runnable threads that have gone too long without a
//! context switch, and briefly elevates their scheduling priority so the
//! kernel is forced to run them.
//!
//! The daemon is organized as a pipeline of small, independently-testable
//! stages (spec-shaped modules, not a single monolithic loop):
//! [`source`] snapshots a CPU's runqueue, [`merge`] reconciles it against
//! the previous cycle to track how long each thread has been waiting,
//! [`detect`] applies the starvation threshold and denylists, and
//! [`boost`] applies and restores the chosen elevation. [`scheduler`] wires
//! these together under one of three orchestration strategies.

pub mod boost;
pub mod config;
pub mod detect;
pub mod error;
pub mod ffi;
pub mod idle_gate;
pub mod merge;
pub mod model;
pub mod pidfile;
pub mod probe;
pub mod procfs;
pub mod rt_throttle;
pub mod scheduler;
pub mod signals;
pub mod source;

pub use error::StalldError;
