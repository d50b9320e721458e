//! The Starvation Detector: applies the threshold, denylists, and progress
//! predicate to a merged per-CPU waiting list and emits target tids (spec
//! §4.4).

use tracing::warn;

use crate::config::Config;
use crate::model::TaskSnapshot;
use crate::procfs;

/// Evaluates one CPU's merged waiting list against `config` and returns the
/// subset that should be boosted this cycle.
///
/// `now` is the same wall-clock basis `since` uses. Logs a one-time warning
/// (at the call site's first invocation after startup, via `warn_fair_server`)
/// when the kernel's automatic fair-server mechanism is present, per spec
/// §4.4 — detection still proceeds.
pub fn detect<'a>(waiting: &'a [TaskSnapshot], config: &Config, now: u64) -> Vec<&'a TaskSnapshot> {
    waiting
        .iter()
        .filter(|t| now.saturating_sub(t.since) >= config.threshold_secs)
        .filter(|t| !config.ignore_comm.is_match(&t.comm.as_str()))
        .filter(|t| !is_ignored_tgid(t.tgid, config))
        .collect()
}

fn is_ignored_tgid(tgid: i32, config: &Config) -> bool {
    match procfs::tgid_name(tgid) {
        Ok(name) => config.ignore_tgid_name.is_match(&name),
        // A failed resolution is treated as "no match" (spec §4.4).
        Err(_) => false,
    }
}

/// Logs the fair-server startup warning exactly once. Called by the
/// Scheduler during startup, not per-cycle.
pub fn warn_if_fair_server_present() {
    if procfs::fair_server_present() {
        warn!(
            "kernel automatic fair-server mechanism detected at \
             /sys/kernel/debug/sched/fair_server; stalld may observe zero \
             starvation while it is enabled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegexSetConfig, SourceKind, Strategy};
    use crate::model::Comm;

    fn task(tid: i32, since: u64) -> TaskSnapshot {
        TaskSnapshot {
            tid,
            tgid: tid,
            comm: Comm::from("helper"),
            prio: 0,
            ctxsw: 0,
            since,
        }
    }

    fn config() -> Config {
        Config {
            cpus: vec![0],
            threshold_secs: 5,
            granularity_secs: 1,
            boost_duration_secs: 3,
            deadline_runtime_ns: 20_000,
            deadline_period_ns: 1_000_000_000,
            fixed_priority: 98,
            strategy: Strategy::Power,
            force_fixed_priority: false,
            log_only: false,
            idle_gate_enabled: true,
            ignore_comm: RegexSetConfig::empty(),
            ignore_tgid_name: RegexSetConfig::empty(),
            source: SourceKind::Auto,
            pidfile: "/var/run/stalld.pid".into(),
            foreground: false,
        }
    }

    #[test]
    fn below_threshold_is_not_detected() {
        let waiting = vec![task(1, 196)];
        let hits = detect(&waiting, &config(), 200);
        assert!(hits.is_empty());
    }

    #[test]
    fn at_or_above_threshold_is_detected() {
        let waiting = vec![task(1, 195)];
        let hits = detect(&waiting, &config(), 200);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tid, 1);
    }

    #[test]
    fn empty_waiting_list_yields_no_detections() {
        let hits = detect(&[], &config(), 200);
        assert!(hits.is_empty());
    }

    #[test]
    fn ignore_comm_pattern_excludes_matching_threads() {
        let mut cfg = config();
        cfg.ignore_comm = RegexSetConfig::compile(vec!["^helper$".into()], "ignore-comm").unwrap();
        let waiting = vec![task(1, 195)];
        let hits = detect(&waiting, &cfg, 200);
        assert!(hits.is_empty());
    }
}
