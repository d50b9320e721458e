//! The Task Merger: reconciles a fresh per-CPU snapshot against the
//! previously retained waiting list, preserving `since` under identity and
//! progress invariance (spec §4.3).

use crate::model::TaskSnapshot;

/// Merges `fresh` against `prior` for one CPU. Entries in `prior` without a
/// match in `fresh` are discarded; this is also how a thread that migrated
/// away or exited stops being tracked (no ghost detections, spec §8).
pub fn merge(prior: &[TaskSnapshot], fresh: Vec<TaskSnapshot>, now: u64) -> Vec<TaskSnapshot> {
    fresh
        .into_iter()
        .map(|mut f| {
            let since = prior
                .iter()
                .find(|p| p.tid == f.tid && p.ctxsw == f.ctxsw)
                .map(|p| p.since)
                .unwrap_or(now);
            f.since = since;
            f
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Comm;

    fn task(tid: i32, ctxsw: u64, since: u64) -> TaskSnapshot {
        TaskSnapshot {
            tid,
            tgid: tid,
            comm: Comm::from("helper"),
            prio: 0,
            ctxsw,
            since,
        }
    }

    #[test]
    fn identity_and_progress_preserves_since() {
        let prior = vec![task(1, 10, 100)];
        let fresh = vec![task(1, 10, 0)];
        let merged = merge(&prior, fresh, 200);
        assert_eq!(merged[0].since, 100);
    }

    #[test]
    fn progress_resets_since_to_now() {
        let prior = vec![task(1, 10, 100)];
        let fresh = vec![task(1, 11, 0)];
        let merged = merge(&prior, fresh, 200);
        assert_eq!(merged[0].since, 200);
    }

    #[test]
    fn new_observation_resets_since_to_now() {
        let prior = vec![];
        let fresh = vec![task(1, 10, 0)];
        let merged = merge(&prior, fresh, 200);
        assert_eq!(merged[0].since, 200);
    }

    #[test]
    fn vanished_task_is_discarded_not_carried_forward() {
        let prior = vec![task(1, 10, 100), task(2, 5, 50)];
        let fresh = vec![task(1, 10, 0)];
        let merged = merge(&prior, fresh, 200);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].tid, 1);
    }

    #[test]
    fn empty_fresh_produces_empty_merged() {
        let prior = vec![task(1, 10, 100)];
        let merged = merge(&prior, vec![], 200);
        assert!(merged.is_empty());
    }

    #[test]
    fn re_merging_against_itself_is_idempotent() {
        let prior = vec![task(1, 10, 100), task(2, 5, 50)];
        let fresh = prior.clone();
        let merged = merge(&prior, fresh, 200);
        assert_eq!(merged[0].since, 100);
        assert_eq!(merged[1].since, 50);
    }
}
