//! Completion Aggregator
//!
//! Folds per-target pass completions into one "settled" event per pass.
//! Each pass keeps an explicit set of the targets that reported for it, so
//! the order in which targets finish does not matter.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::config::TargetName;
use crate::target::PassComplete;

/// Every configured target has reported for this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettledPass {
    pub pass: u64,
    /// At least one target reported errors
    pub failed: bool,
}

#[derive(Debug)]
struct PassProgress {
    reported: HashSet<TargetName>,
    failed: bool,
}

/// Tracks which targets have reported for each open pass
#[derive(Debug)]
pub struct CompletionAggregator {
    targets: Vec<TargetName>,
    open: BTreeMap<u64, PassProgress>,
    /// Highest pass already settled; reports for it or older are stale
    last_settled: Option<u64>,
}

impl CompletionAggregator {
    pub fn new(targets: Vec<TargetName>) -> Self {
        Self {
            targets,
            open: BTreeMap::new(),
            last_settled: None,
        }
    }

    pub fn targets(&self) -> &[TargetName] {
        &self.targets
    }

    /// Record one completion; returns the pass once all targets reported.
    ///
    /// Settling a pass also discards any older pass still open, since a
    /// newer build supersedes it.
    pub fn record(&mut self, event: &PassComplete) -> Option<SettledPass> {
        if !self.targets.contains(&event.target) {
            warn!("Ignoring completion from unconfigured target {}", event.target);
            return None;
        }
        if self.last_settled.is_some_and(|settled| event.pass <= settled) {
            debug!(pass = event.pass, "Ignoring late completion from {}", event.target);
            return None;
        }

        let capacity = self.targets.len();
        let progress = self.open.entry(event.pass).or_insert_with(|| PassProgress {
            reported: HashSet::with_capacity(capacity),
            failed: false,
        });

        if !progress.reported.insert(event.target) {
            warn!(pass = event.pass, "{} reported twice", event.target);
            return None;
        }
        progress.failed |= !event.is_success();

        if progress.reported.len() < capacity {
            return None;
        }

        let settled = SettledPass {
            pass: event.pass,
            failed: progress.failed,
        };

        let stale: Vec<u64> = self.open.range(..=event.pass).map(|(pass, _)| *pass).collect();
        for pass in stale {
            self.open.remove(&pass);
        }
        self.last_settled = Some(event.pass);

        debug!(pass = settled.pass, failed = settled.failed, "All targets settled");
        Some(settled)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::target::BuildStatus;

    fn complete(target: TargetName, pass: u64, errors: &[&str]) -> PassComplete {
        PassComplete {
            target,
            pass,
            cycle: pass + 1,
            status: if pass == 0 {
                BuildStatus::Built
            } else {
                BuildStatus::Rebuilt
            },
            errors: errors.iter().map(|e| e.to_string()).collect(),
            duration: Duration::from_millis(5),
        }
    }

    fn aggregator() -> CompletionAggregator {
        CompletionAggregator::new(vec![TargetName::Server, TargetName::Client])
    }

    #[test]
    fn test_settles_only_after_every_target() {
        let mut agg = aggregator();

        assert_eq!(agg.record(&complete(TargetName::Server, 0, &[])), None);
        assert_eq!(
            agg.record(&complete(TargetName::Client, 0, &[])),
            Some(SettledPass { pass: 0, failed: false })
        );
    }

    #[test]
    fn test_completion_order_does_not_matter() {
        let mut agg = aggregator();

        assert_eq!(agg.record(&complete(TargetName::Client, 1, &[])), None);
        assert_eq!(
            agg.record(&complete(TargetName::Server, 1, &[])),
            Some(SettledPass { pass: 1, failed: false })
        );
    }

    #[test]
    fn test_settles_exactly_once_per_pass() {
        let mut agg = aggregator();
        let mut settled = Vec::new();

        let events = [
            complete(TargetName::Server, 0, &[]),
            complete(TargetName::Server, 0, &[]),
            complete(TargetName::Client, 0, &[]),
            complete(TargetName::Client, 0, &[]),
            complete(TargetName::Client, 1, &[]),
            complete(TargetName::Server, 1, &[]),
            complete(TargetName::Server, 1, &[]),
        ];
        for event in &events {
            settled.extend(agg.record(event));
        }

        assert_eq!(settled.iter().map(|s| s.pass).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_failed_target_marks_pass_failed() {
        let mut agg = aggregator();

        agg.record(&complete(TargetName::Server, 2, &["src/server/index.ts:1:1: boom"]));
        let settled = agg.record(&complete(TargetName::Client, 2, &[])).unwrap();

        assert!(settled.failed);
    }

    #[test]
    fn test_newer_pass_supersedes_older_one() {
        let mut agg = aggregator();

        // Client skipped pass 1 and went straight to pass 2
        agg.record(&complete(TargetName::Server, 1, &[]));
        agg.record(&complete(TargetName::Server, 2, &[]));
        assert_eq!(agg.record(&complete(TargetName::Client, 2, &[])).map(|s| s.pass), Some(2));

        // A straggler for the discarded pass never settles it
        assert_eq!(agg.record(&complete(TargetName::Client, 1, &[])), None);
    }

    #[test]
    fn test_unconfigured_target_is_ignored() {
        let mut agg = CompletionAggregator::new(vec![TargetName::Server]);

        assert_eq!(agg.record(&complete(TargetName::Client, 0, &[])), None);
        assert!(agg.record(&complete(TargetName::Server, 0, &[])).is_some());
    }
}
