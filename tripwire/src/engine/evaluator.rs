// tripwire/src/engine/evaluator.rs
//
// Threshold rules. Pure: no clock, no ledger access, no side effects.
// Callers prune first and pass the survivors in.
//
//   destructive action  fires at count >= threshold   (inclusive)
//   message rate        fires at count >  threshold   (exclusive)
//
// "5 bans" trips on the fifth ban; "5 messages" trips on the sixth.

use crate::config::ThresholdConfig;
use crate::events::{ActionKind, ActionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub fired: bool,
    pub count: usize,
}

/// Count records of `kind` and test them against the rule.
///
/// Only matching records count, and at least one of them must be present;
/// records of other kinds never satisfy either condition. This keeps a zero
/// threshold from firing on an actor with no matching activity.
pub fn destructive_action<'a, I>(records: I, kind: ActionKind, rule: &ThresholdConfig) -> Verdict
where
    I: IntoIterator<Item = &'a ActionRecord>,
{
    let count = records.into_iter().filter(|r| r.kind == kind).count();
    let any_of_kind = count > 0;
    Verdict {
        fired: rule.enabled && count >= rule.count_threshold && any_of_kind,
        count,
    }
}

/// `count` is the pruned message count for one author.
pub fn message_rate(count: usize, rule: &ThresholdConfig) -> Verdict {
    Verdict { fired: rule.enabled && count > rule.count_threshold, count }
}
