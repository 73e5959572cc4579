// tripwire/src/engine/mod.rs
//
// Engine — owns both ledgers and the sweep task.
//
//   ingest(Message) ─► banned-word filter ─► message ledger ─► evaluate (inline) ─► FollowUp ─► Dispatcher
//   on_role_* / on_member_* ─► action ledger ─┐
//                                             └─ SweepScheduler (every sweep_interval) ─► Dispatcher
//
// Message floods are decided the moment the offending message arrives.
// Destructive actions are only recorded here; the sweep decides.
// Ledger work is synchronous and happens in `ingest`; anything that talks to
// the executor is handed back as a FollowUp.

pub mod dispatcher;
pub mod evaluator;
pub mod stats;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GuardConfig;
use crate::error::EngineError;
use crate::events::{
    ActionKind, ActionRecord, ActorId, ChannelId, CommunityId, MessageId, MessageRecord,
    MitigationEvent, PlatformEvent, UserId,
};
use crate::executor::{ActionExecutor, OutboundMessage};
use crate::filter::BannedWordFilter;
use crate::state::ledger::{expire, ActorLedger};

use dispatcher::Dispatcher;
use stats::{EngineStats, StatsSnapshot};
use sweep::{SweepReport, SweepScheduler};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Automod off, or the bot's own message.
    Ignored,
    /// Matched a banned word; deleted and not counted.
    Filtered { word: String },
    /// Counted; `count` messages from this author are inside the window.
    Tracked { count: usize },
    /// Crossed the rate threshold; the author was timed out.
    Mitigated { count: usize },
}

/// Executor work produced by admitting an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Delete a message that carried a banned word and warn its author.
    RemoveBanned { channel: ChannelId, message_id: Option<MessageId>, author: UserId },
    /// Time out a flooding author.
    Mitigate(MitigationEvent),
}

pub struct Engine {
    config:     Arc<GuardConfig>,
    actions:    Arc<ActorLedger<ActionRecord>>,
    messages:   Arc<ActorLedger<MessageRecord>>,
    filter:     BannedWordFilter,
    dispatcher: Arc<Dispatcher>,
    scheduler:  Arc<SweepScheduler>,
    stats:      Arc<EngineStats>,
    sweep_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Engine {
    pub fn new(config: GuardConfig, executor: Arc<dyn ActionExecutor>) -> Result<Self, EngineError> {
        let config     = Arc::new(config);
        let filter     = BannedWordFilter::new(&config.automod.banned_words)?;
        if config.automod.enabled && filter.is_empty() {
            debug!("Automod on with no banned words; rate limiting only");
        }
        let actions    = Arc::new(ActorLedger::new());
        let messages   = Arc::new(ActorLedger::new());
        let stats      = Arc::new(EngineStats::default());
        let dispatcher = Arc::new(Dispatcher::new(executor, Arc::clone(&config)));
        let scheduler  = Arc::new(SweepScheduler::new(
            Arc::clone(&actions),
            Arc::clone(&messages),
            Arc::clone(&dispatcher),
            Arc::clone(&config),
            Arc::clone(&stats),
        ));

        Ok(Self {
            config,
            actions,
            messages,
            filter,
            dispatcher,
            scheduler,
            stats,
            sweep_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &GuardConfig { &self.config }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Spawn the periodic sweep. Idempotent; must be called inside a runtime.
    pub fn start(&self) {
        let mut slot = self.sweep_task.lock();
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.scheduler).run(cancel.clone()));
        *slot = Some((cancel, handle));
    }

    /// Cancel the sweep and wait for it to exit. Passes still dispatching
    /// get up to the dispatch timeout to finish.
    pub async fn stop(&self) {
        let task = self.sweep_task.lock().take();
        let Some((cancel, handle)) = task else { return };
        cancel.cancel();
        if let Err(e) = handle.await {
            error!("Sweep task ended abnormally: {}", e);
        }
    }

    // ── Message pipeline ─────────────────────────────────────────────────────

    /// Filter, count and judge one message. Every ledger change happens here,
    /// synchronously; the executor calls it implies come back as a FollowUp.
    pub fn admit_message(
        &self,
        community:  CommunityId,
        channel:    ChannelId,
        message_id: Option<MessageId>,
        author:     UserId,
        content:    &str,
        at:         DateTime<Utc>,
    ) -> (MessageOutcome, Option<FollowUp>) {
        EngineStats::bump(&self.stats.events_observed);

        if !self.config.automod.enabled || self.config.self_id == Some(author) {
            return (MessageOutcome::Ignored, None);
        }

        if let Some(word) = self.filter.find(content) {
            EngineStats::bump(&self.stats.messages_filtered);
            info!(community, actor = author, channel, word, "AUTOMOD banned word");
            let removal = FollowUp::RemoveBanned { channel, message_id, author };
            return (MessageOutcome::Filtered { word: word.to_string() }, Some(removal));
        }

        let rule = self.config.message_threshold();
        let verdict = self.messages.update(community, ActorId::Member(author), |records| {
            records.push_back(MessageRecord::new(at));
            let count   = expire(records, at, rule.window);
            let verdict = evaluator::message_rate(count, &rule);
            if verdict.fired {
                records.clear();
            }
            verdict
        });

        if !verdict.fired {
            return (MessageOutcome::Tracked { count: verdict.count }, None);
        }

        warn!(community, actor = author, channel, count = verdict.count, "AUTOMOD rate threshold crossed");
        let event = MitigationEvent::message_flood(community, author, channel, verdict.count, at);
        (MessageOutcome::Mitigated { count: verdict.count }, Some(FollowUp::Mitigate(event)))
    }

    /// `admit_message`, then carry out whatever it asked for.
    pub async fn on_message(
        &self,
        community:  CommunityId,
        channel:    ChannelId,
        message_id: Option<MessageId>,
        author:     UserId,
        content:    &str,
        at:         DateTime<Utc>,
    ) -> MessageOutcome {
        let (outcome, work) = self.admit_message(community, channel, message_id, author, content, at);
        if let Some(work) = work {
            self.follow_up(work).await;
        }
        outcome
    }

    async fn remove_banned(&self, channel: ChannelId, message_id: Option<MessageId>, author: UserId) {
        if let Some(id) = message_id {
            if let Err(e) = self.dispatcher.executor().delete_message(channel, id).await {
                warn!(channel, message = id, "Delete failed: {}", e);
            }
        }
        let notice = OutboundMessage::Text(format!(
            "{}, your message contained a banned word.", ActorId::Member(author).mention()
        ));
        if let Err(e) = self.dispatcher.executor().send_message(channel, &notice).await {
            warn!(channel, "Banned-word notice not delivered: {}", e);
        }
    }

    // ── Destructive-action pipeline ──────────────────────────────────────────

    pub fn on_role_created(&self, community: CommunityId, actor: Option<UserId>, at: DateTime<Utc>) {
        self.record_action(community, actor, ActionKind::RoleCreate, at);
    }

    pub fn on_role_deleted(&self, community: CommunityId, actor: Option<UserId>, at: DateTime<Utc>) {
        self.record_action(community, actor, ActionKind::RoleDelete, at);
    }

    pub fn on_member_banned(&self, community: CommunityId, actor: Option<UserId>, at: DateTime<Utc>) {
        self.record_action(community, actor, ActionKind::Ban, at);
    }

    pub fn on_member_kicked(&self, community: CommunityId, actor: Option<UserId>, at: DateTime<Utc>) {
        self.record_action(community, actor, ActionKind::Kick, at);
    }

    fn record_action(&self, community: CommunityId, actor: Option<UserId>, kind: ActionKind, at: DateTime<Utc>) {
        EngineStats::bump(&self.stats.events_observed);
        if !self.config.antinuke.enabled {
            return;
        }
        let actor = ActorId::from(actor);
        if actor == ActorId::Unknown && !self.config.antinuke.track_unattributed {
            debug!(community, %kind, "Unattributed action dropped");
            return;
        }
        let pending = self.actions.append(community, actor, ActionRecord::new(kind, at));
        debug!(community, %actor, %kind, pending, "Action recorded");
    }

    // ── Shared ───────────────────────────────────────────────────────────────

    /// Apply one feed event to the ledgers. Call in arrival order: appends for
    /// an actor land in the order `ingest` sees them.
    pub fn ingest(&self, event: PlatformEvent) -> Option<FollowUp> {
        match event {
            PlatformEvent::Message { community, channel, message_id, author, content, timestamp } => {
                self.admit_message(community, channel, message_id, author, &content, timestamp).1
            }
            PlatformEvent::RoleCreated  { community, actor, timestamp } => { self.on_role_created(community, actor, timestamp); None }
            PlatformEvent::RoleDeleted  { community, actor, timestamp } => { self.on_role_deleted(community, actor, timestamp); None }
            PlatformEvent::MemberBanned { community, actor, timestamp } => { self.on_member_banned(community, actor, timestamp); None }
            PlatformEvent::MemberKicked { community, actor, timestamp } => { self.on_member_kicked(community, actor, timestamp); None }
        }
    }

    /// Executor side of an admitted event. Safe to run concurrently and out
    /// of order; the ledgers are already settled.
    pub async fn follow_up(&self, work: FollowUp) {
        match work {
            FollowUp::RemoveBanned { channel, message_id, author } => {
                self.remove_banned(channel, message_id, author).await;
            }
            FollowUp::Mitigate(event) => self.dispatch(&event).await,
        }
    }

    /// `ingest` and `follow_up` back to back.
    pub async fn handle(&self, event: PlatformEvent) {
        if let Some(work) = self.ingest(event) {
            self.follow_up(work).await;
        }
    }

    /// One sweep pass at `now`, outside the timer.
    pub async fn sweep_now(&self, now: DateTime<Utc>) -> SweepReport {
        self.scheduler.sweep_once(now).await
    }

    pub fn pending_actions(&self, community: CommunityId, actor: ActorId) -> Vec<ActionRecord> {
        self.actions.records(community, actor)
    }

    pub fn pending_messages(&self, community: CommunityId, author: UserId) -> usize {
        self.messages.records(community, ActorId::Member(author)).len()
    }

    /// Count a feed line that could not be turned into an event.
    pub fn note_rejected_line(&self) {
        EngineStats::bump(&self.stats.feed_rejected);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.actions.len(), self.messages.len())
    }

    async fn dispatch(&self, event: &MitigationEvent) {
        match self.dispatcher.dispatch(event).await {
            Ok(()) => EngineStats::bump(&self.stats.mitigations_dispatched),
            Err(e) => {
                EngineStats::bump(&self.stats.dispatch_failures);
                error!(community = event.community, actor = %event.actor, "Dispatch failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{Call, RecordingExecutor};
    use chrono::TimeZone;

    const G: CommunityId = 1;
    const CH: ChannelId = 42;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn engine(tune: impl FnOnce(&mut GuardConfig)) -> (Engine, Arc<RecordingExecutor>) {
        let mut config = GuardConfig::default();
        config.automod.enabled  = true;
        config.antinuke.enabled = true;
        tune(&mut config);
        let exec = Arc::new(RecordingExecutor::default());
        (Engine::new(config, exec.clone()).unwrap(), exec)
    }

    async fn say(e: &Engine, author: UserId, content: &str, at: DateTime<Utc>) -> MessageOutcome {
        e.on_message(G, CH, Some(9000), author, content, at).await
    }

    #[tokio::test]
    async fn sixth_message_in_window_times_out_and_clears() {
        let (e, exec) = engine(|_| {});
        for s in 0..5 {
            assert_eq!(say(&e, 3, "hi", t(s)).await, MessageOutcome::Tracked { count: s as usize + 1 });
        }
        assert_eq!(say(&e, 3, "hi", t(5)).await, MessageOutcome::Mitigated { count: 6 });

        assert_eq!(exec.timeouts(), vec![(G, 3)]);
        assert_eq!(e.pending_messages(G, 3), 0);
        assert_eq!(e.stats().mitigations_dispatched, 1);
    }

    #[tokio::test]
    async fn messages_spread_past_the_window_never_fire() {
        let (e, exec) = engine(|_| {});
        for s in 0..20 {
            say(&e, 3, "hi", t(s * 3)).await;
        }
        assert!(exec.timeouts().is_empty());
        assert!(e.pending_messages(G, 3) <= 4);
    }

    #[tokio::test]
    async fn banned_word_deletes_warns_and_is_not_counted() {
        let (e, exec) = engine(|c| c.automod.banned_words = vec!["scam".into()]);

        let out = say(&e, 3, "totally not a SCAM", t(0)).await;
        assert_eq!(out, MessageOutcome::Filtered { word: "scam".into() });
        assert_eq!(exec.deletions(), vec![(CH, 9000)]);
        assert!(exec.calls().contains(&Call::Send {
            channel: CH,
            message: OutboundMessage::Text("<@3>, your message contained a banned word.".into()),
        }));
        assert_eq!(e.pending_messages(G, 3), 0);
        assert_eq!(e.stats().messages_filtered, 1);
    }

    #[tokio::test]
    async fn own_messages_and_disabled_automod_are_ignored() {
        let (e, _) = engine(|c| c.self_id = Some(99));
        assert_eq!(say(&e, 99, "hi", t(0)).await, MessageOutcome::Ignored);

        let (e, _) = engine(|c| c.automod.enabled = false);
        assert_eq!(say(&e, 3, "hi", t(0)).await, MessageOutcome::Ignored);
        assert_eq!(e.pending_messages(G, 3), 0);
    }

    #[tokio::test]
    async fn actions_are_recorded_and_judged_by_the_sweep() {
        let (e, exec) = engine(|_| {});
        for s in [0, 10, 20, 30, 40] {
            e.on_member_banned(G, Some(7), t(s));
        }
        assert!(exec.bans().is_empty());
        assert_eq!(e.pending_actions(G, ActorId::Member(7)).len(), 5);

        let report = e.sweep_now(t(41)).await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(exec.bans(), vec![(G, 7)]);
        assert!(e.pending_actions(G, ActorId::Member(7)).is_empty());
    }

    #[tokio::test]
    async fn unattributed_actions_respect_tracking_flag() {
        let (e, _) = engine(|_| {});
        e.on_member_banned(G, None, t(0));
        assert_eq!(e.pending_actions(G, ActorId::Unknown).len(), 1);

        let (e, _) = engine(|c| c.antinuke.track_unattributed = false);
        e.on_member_banned(G, None, t(0));
        assert!(e.pending_actions(G, ActorId::Unknown).is_empty());
    }

    #[tokio::test]
    async fn disabled_antinuke_records_nothing() {
        let (e, _) = engine(|c| c.antinuke.enabled = false);
        e.on_role_deleted(G, Some(7), t(0));
        e.on_member_kicked(G, Some(7), t(1));
        assert!(e.pending_actions(G, ActorId::Member(7)).is_empty());
        assert_eq!(e.stats().events_observed, 2);
    }

    #[tokio::test]
    async fn handle_routes_feed_events() {
        let (e, _) = engine(|_| {});
        e.handle(PlatformEvent::RoleCreated { community: G, actor: Some(7), timestamp: t(0) }).await;
        e.handle(PlatformEvent::MemberKicked { community: G, actor: Some(7), timestamp: t(1) }).await;
        e.handle(PlatformEvent::Message {
            community: G, channel: CH, message_id: None, author: 3, content: "hi".into(), timestamp: t(2),
        }).await;

        let kinds: Vec<_> = e.pending_actions(G, ActorId::Member(7)).into_iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ActionKind::RoleCreate, ActionKind::Kick]);
        assert_eq!(e.pending_messages(G, 3), 1);
    }

    #[tokio::test]
    async fn ingest_settles_the_ledger_before_any_executor_call() {
        let (e, exec) = engine(|_| {});
        for s in 0..5 {
            let work = e.ingest(PlatformEvent::Message {
                community: G, channel: CH, message_id: None, author: 3, content: "hi".into(), timestamp: t(s),
            });
            assert_eq!(work, None);
        }
        let work = e.ingest(PlatformEvent::Message {
            community: G, channel: CH, message_id: None, author: 3, content: "hi".into(), timestamp: t(5),
        });

        let Some(FollowUp::Mitigate(event)) = work else { panic!("expected a mitigation, got {:?}", work) };
        assert_eq!(event.count, 6);
        assert_eq!(e.pending_messages(G, 3), 0);
        assert!(exec.calls().is_empty());

        e.follow_up(FollowUp::Mitigate(event)).await;
        assert_eq!(exec.timeouts(), vec![(G, 3)]);
    }

    #[test]
    fn ingest_keeps_arrival_order_per_actor() {
        let (e, _) = engine(|_| {});
        e.ingest(PlatformEvent::RoleDeleted  { community: G, actor: Some(7), timestamp: t(5) });
        e.ingest(PlatformEvent::MemberBanned { community: G, actor: Some(7), timestamp: t(1) });
        e.ingest(PlatformEvent::MemberKicked { community: G, actor: Some(7), timestamp: t(3) });

        let kinds: Vec<_> = e.pending_actions(G, ActorId::Member(7)).into_iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ActionKind::RoleDelete, ActionKind::Ban, ActionKind::Kick]);
    }

    #[test]
    fn banned_word_is_deferred_to_follow_up() {
        let (e, exec) = engine(|c| c.automod.banned_words = vec!["scam".into()]);
        let (outcome, work) = e.admit_message(G, CH, Some(1), 3, "scam", t(0));

        assert_eq!(outcome, MessageOutcome::Filtered { word: "scam".into() });
        assert_eq!(work, Some(FollowUp::RemoveBanned { channel: CH, message_id: Some(1), author: 3 }));
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn start_and_stop_manage_the_sweep_task() {
        let (e, _) = engine(|c| c.sweep_interval = 1);
        e.start();
        e.start();

        tokio::time::timeout(std::time::Duration::from_secs(2), e.stop())
            .await
            .expect("stop hung");
        e.stop().await;
    }

    #[tokio::test]
    async fn stop_lets_an_in_flight_ban_land() {
        let (e, exec) = engine(|c| c.sweep_interval = 1);
        exec.delay_bans_by(std::time::Duration::from_millis(300));
        let now = Utc::now();
        for _ in 0..5 {
            e.on_member_banned(G, Some(7), now);
        }
        e.start();

        tokio::time::timeout(std::time::Duration::from_secs(3), async {
            while !e.pending_actions(G, ActorId::Member(7)).is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }).await.expect("sweep never ran");

        e.stop().await;
        assert_eq!(exec.bans(), vec![(G, 7)]);
        assert_eq!(e.stats().mitigations_dispatched, 1);
    }

    #[test]
    fn rejected_feed_lines_show_in_stats() {
        let (e, _) = engine(|_| {});
        e.note_rejected_line();
        e.note_rejected_line();
        assert_eq!(e.stats().feed_rejected, 2);
        assert_eq!(e.stats().events_observed, 0);
    }
}
