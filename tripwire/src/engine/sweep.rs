// tripwire/src/engine/sweep.rs
//
// Periodic re-evaluation of the destructive-action ledger.
//
// One pass:
//   1. walk every (community, actor) entry: expire, evaluate each enabled kind,
//      reset the whole sequence on a fire
//   2. expire stale message records
//   3. evict entries left empty
//   4. dispatch the collected mitigations concurrently, each in its own task
//
// Steps 1–3 are synchronous and hold one entry lock at a time. Nothing is
// awaited until the ledgers are released. A failing, panicking or hung
// dispatch only costs its own entry; the run loop spawns each pass, so the
// next tick fires on time regardless. On cancel the loop waits for spawned
// passes before returning.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{GuardConfig, ThresholdConfig};
use crate::engine::dispatcher::Dispatcher;
use crate::engine::evaluator;
use crate::engine::stats::EngineStats;
use crate::error::DispatchError;
use crate::events::{ActionKind, ActionRecord, MessageRecord, MitigationEvent};
use crate::state::ledger::{expire, ActorLedger};

const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_SLACK:              Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Destructive-ledger entries visited.
    pub evaluated:    usize,
    pub fired:        usize,
    pub dispatched:   usize,
    pub failed:       usize,
    /// Fires on the unknown-actor bucket (alerted, not banned).
    pub unattributed: usize,
    /// Empty entries removed from both ledgers.
    pub evicted:      usize,
}

pub struct SweepScheduler {
    actions:          Arc<ActorLedger<ActionRecord>>,
    messages:         Arc<ActorLedger<MessageRecord>>,
    dispatcher:       Arc<Dispatcher>,
    config:           Arc<GuardConfig>,
    stats:            Arc<EngineStats>,
    dispatch_timeout: Duration,
}

impl SweepScheduler {
    pub fn new(
        actions:    Arc<ActorLedger<ActionRecord>>,
        messages:   Arc<ActorLedger<MessageRecord>>,
        dispatcher: Arc<Dispatcher>,
        config:     Arc<GuardConfig>,
        stats:      Arc<EngineStats>,
    ) -> Self {
        Self {
            actions,
            messages,
            dispatcher,
            config,
            stats,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Upper bound on one dispatch; a slower one is abandoned and counted as failed.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Run passes every `sweep_interval` until `cancel` fires, then wait for
    /// passes still dispatching. Their ledger entries are already cleared, so
    /// dropping them here would lose the mitigation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.sweep_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick completes immediately

        info!(interval_secs = period.as_secs(), "Sweep scheduler started");
        let mut passes = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let pass = Arc::clone(&self);
                    passes.spawn(async move { pass.sweep_once(Utc::now()).await });
                }
                Some(joined) = passes.join_next(), if !passes.is_empty() => {
                    if let Err(e) = joined {
                        error!("Sweep pass aborted: {}", e);
                    }
                }
            }
        }

        let in_flight = passes.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for sweep passes to finish dispatching");
            let grace = self.dispatch_timeout + DRAIN_SLACK;
            let drained = tokio::time::timeout(grace, async {
                while let Some(joined) = passes.join_next().await {
                    if let Err(e) = joined {
                        error!("Sweep pass aborted: {}", e);
                    }
                }
            }).await;
            if drained.is_err() {
                warn!(abandoned = passes.len(), "Sweep passes still running at shutdown; abandoning");
                passes.abort_all();
            }
        }
        info!("Sweep scheduler stopped");
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let (evaluated, events) = self.collect(now);
        self.expire_messages(now);
        let evicted = self.actions.evict_empty() + self.messages.evict_empty();

        let mut report = SweepReport { evaluated, fired: events.len(), evicted, ..Default::default() };

        let mut tasks = JoinSet::new();
        for event in events {
            warn!(
                community = event.community, actor = %event.actor, count = event.count,
                "ANTINUKE threshold crossed: {}", event.reason
            );
            let dispatcher = Arc::clone(&self.dispatcher);
            let limit      = self.dispatch_timeout;
            tasks.spawn(async move {
                let outcome = tokio::time::timeout(limit, dispatcher.dispatch(&event)).await;
                (event, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Ok(())))) => report.dispatched += 1,
                Ok((event, Ok(Err(DispatchError::UnknownActor { .. })))) => {
                    report.unattributed += 1;
                    debug!(community = event.community, "Unattributed burst alerted without ban");
                }
                Ok((event, Ok(Err(e)))) => {
                    report.failed += 1;
                    error!(community = event.community, actor = %event.actor, "Dispatch failed: {}", e);
                }
                Ok((event, Err(_elapsed))) => {
                    report.failed += 1;
                    error!(
                        community = event.community, actor = %event.actor,
                        timeout_secs = self.dispatch_timeout.as_secs_f64(),
                        "Dispatch timed out"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Dispatch task aborted: {}", e);
                }
            }
        }

        EngineStats::add(&self.stats.mitigations_dispatched, report.dispatched as u64);
        EngineStats::add(&self.stats.dispatch_failures, report.failed as u64);
        EngineStats::bump(&self.stats.sweeps_completed);
        debug!(
            evaluated = report.evaluated, fired = report.fired, dispatched = report.dispatched,
            failed = report.failed, evicted = report.evicted,
            "Sweep complete"
        );
        report
    }

    /// Walk the destructive ledger; returns (entries visited, mitigations to send).
    fn collect(&self, now: DateTime<Utc>) -> (usize, Vec<MitigationEvent>) {
        let window = self.config.action_window();
        let rules: Vec<(ActionKind, ThresholdConfig)> = ActionKind::ALL.iter()
            .map(|&kind| (kind, self.config.action_threshold(kind)))
            .filter(|(_, rule)| rule.enabled)
            .collect();

        let mut visited = 0;
        let mut events  = Vec::new();
        self.actions.for_each_entry(|(community, actor), records| {
            visited += 1;
            if expire(records, now, window) == 0 {
                return;
            }
            for (kind, rule) in &rules {
                let verdict = evaluator::destructive_action(records.iter(), *kind, rule);
                if verdict.fired {
                    events.push(MitigationEvent::mass_action(community, actor, *kind, verdict.count, now));
                    // Cool-down: everything pending for this actor goes, not just `kind`.
                    records.clear();
                    break;
                }
            }
        });
        (visited, events)
    }

    fn expire_messages(&self, now: DateTime<Utc>) {
        let window = self.config.message_threshold().window;
        self.messages.for_each_entry(|_, records| {
            expire(records, now, window);
        });
    }
}
