// tripwire/src/engine/dispatcher.rs
//
// Turns a MitigationEvent into executor calls.
//
//   MassAction   → ban_member(actor) + log-channel embed
//   MessageFlood → timeout_member(author) + channel warning + log-channel embed
//
// The primary action's result is returned to the caller. Follow-up notices
// (channel warning, log embed) are best effort: a failure is logged and does
// not turn a successful ban or timeout into an error.
//
// A MassAction fire on the unknown-actor bucket has nobody to ban. The ban
// is skipped with DispatchError::UnknownActor, but the log channel still
// hears about it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::GuardConfig;
use crate::error::DispatchError;
use crate::events::{ActionKind, ActorId, ChannelId, MitigationEvent, Trigger};
use crate::executor::{ActionExecutor, Embed, OutboundMessage};

const ALERT_RED:   u32 = 0xff0000;
const ALERT_AMBER: u32 = 0xffa500;

pub struct Dispatcher {
    executor: Arc<dyn ActionExecutor>,
    config:   Arc<GuardConfig>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn ActionExecutor>, config: Arc<GuardConfig>) -> Self {
        Self { executor, config }
    }

    pub fn executor(&self) -> &Arc<dyn ActionExecutor> { &self.executor }

    pub async fn dispatch(&self, event: &MitigationEvent) -> Result<(), DispatchError> {
        match event.trigger {
            Trigger::MassAction { kind }      => self.lockdown(event, kind).await,
            Trigger::MessageFlood { channel } => self.silence(event, channel).await,
        }
    }

    async fn lockdown(&self, event: &MitigationEvent, kind: ActionKind) -> Result<(), DispatchError> {
        let Some(member) = event.actor.member() else {
            warn!(
                community = event.community, %kind, count = event.count,
                "ANTINUKE burst from unattributed actor; nobody to ban"
            );
            self.notify_log(event, lockdown_embed(event, kind, false)).await;
            return Err(DispatchError::UnknownActor { community: event.community, kind });
        };

        self.executor.ban_member(event.community, member, &event.reason).await?;
        info!(
            community = event.community, actor = member, %kind, count = event.count,
            "ANTINUKE ban issued"
        );
        self.notify_log(event, lockdown_embed(event, kind, true)).await;
        Ok(())
    }

    async fn silence(&self, event: &MitigationEvent, channel: ChannelId) -> Result<(), DispatchError> {
        let Some(member) = event.actor.member() else {
            // Message authors are always known.
            return Err(DispatchError::Rejected("message flood without an author".into()));
        };

        let duration = self.config.timeout_duration();
        self.executor.timeout_member(event.community, member, duration, &event.reason).await?;
        info!(
            community = event.community, actor = member, channel, count = event.count,
            timeout_secs = duration.as_secs(),
            "AUTOMOD timeout issued"
        );

        let warning = OutboundMessage::Text(format!(
            "{} has been timed out for spamming.", event.actor.mention()
        ));
        if let Err(e) = self.executor.send_message(channel, &warning).await {
            warn!(channel, "Spam warning not delivered: {}", e);
        }

        let embed = Embed::new("Automod Alert", ALERT_AMBER)
            .field("User", format!("{} ({})", event.actor.mention(), member))
            .field("Action", format!("Timed out for {} minutes", duration.as_secs() / 60))
            .field("Reason", format!("{} messages in {}s", event.count, self.config.automod.spam_time))
            .field("Channel", format!("<#{}>", channel))
            .footer(footer(event));
        self.notify_log(event, embed).await;
        Ok(())
    }

    /// Post to the community's log channel, if it has one.
    async fn notify_log(&self, event: &MitigationEvent, embed: Embed) {
        let Some(log_channel) = self.config.log_channel(event.community) else { return };
        if let Err(e) = self.executor.send_message(log_channel, &OutboundMessage::Embed(embed)).await {
            warn!(community = event.community, log_channel, "Log notification failed: {}", e);
        }
    }
}

fn lockdown_embed(event: &MitigationEvent, kind: ActionKind, banned: bool) -> Embed {
    let user = match event.actor {
        ActorId::Member(id) => format!("{} ({})", event.actor.mention(), id),
        ActorId::Unknown    => "Unattributed (platform did not report the actor)".to_string(),
    };
    let outcome = if banned {
        format!("{} was banned for {}.", event.actor.mention(), kind.describe())
    } else {
        format!("Detected {} but could not identify who to ban.", kind.describe())
    };
    Embed::new("Antinuke Alert", ALERT_RED)
        .field("User", user)
        .field("Outcome", outcome)
        .field("Actions in window", event.count.to_string())
        .footer(footer(event))
}

fn footer(event: &MitigationEvent) -> String {
    format!("{} | Timestamp: {}", event.pipeline(), event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{Call, RecordingExecutor};
    use chrono::Utc;

    fn config_with_log(log: Option<ChannelId>) -> Arc<GuardConfig> {
        let mut c = GuardConfig::default();
        if let Some(ch) = log { c.logs.insert(1, ch); }
        Arc::new(c)
    }

    #[tokio::test]
    async fn mass_action_bans_and_notifies_log_channel() {
        let exec = Arc::new(RecordingExecutor::default());
        let d = Dispatcher::new(exec.clone(), config_with_log(Some(500)));
        let ev = MitigationEvent::mass_action(1, ActorId::Member(7), ActionKind::Ban, 5, Utc::now());

        d.dispatch(&ev).await.unwrap();

        let calls = exec.calls();
        assert_eq!(calls[0], Call::Ban { community: 1, member: 7, reason: "Antinuke: Mass banning detected".into() });
        match &calls[1] {
            Call::Send { channel: 500, message: OutboundMessage::Embed(e) } => {
                assert_eq!(e.title, "Antinuke Alert");
                assert!(e.fields.iter().any(|f| f.value.contains("mass banning")));
            }
            other => panic!("expected log embed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_log_channel_suppresses_notification_only() {
        let exec = Arc::new(RecordingExecutor::default());
        let d = Dispatcher::new(exec.clone(), config_with_log(None));
        let ev = MitigationEvent::mass_action(1, ActorId::Member(7), ActionKind::Ban, 5, Utc::now());

        d.dispatch(&ev).await.unwrap();
        assert_eq!(exec.calls().len(), 1);
        assert_eq!(exec.bans(), vec![(1, 7)]);
    }

    #[tokio::test]
    async fn message_flood_times_out_warns_and_logs() {
        let exec = Arc::new(RecordingExecutor::default());
        let d = Dispatcher::new(exec.clone(), config_with_log(Some(500)));
        let ev = MitigationEvent::message_flood(1, 9, 42, 6, Utc::now());

        d.dispatch(&ev).await.unwrap();

        let calls = exec.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], Call::Timeout {
            community: 1, member: 9, duration: std::time::Duration::from_secs(300), reason: "Spam detected".into(),
        });
        assert_eq!(calls[1], Call::Send {
            channel: 42,
            message: OutboundMessage::Text("<@9> has been timed out for spamming.".into()),
        });
        assert!(matches!(calls[2], Call::Send { channel: 500, .. }));
    }

    #[tokio::test]
    async fn unknown_actor_skips_ban_but_still_alerts() {
        let exec = Arc::new(RecordingExecutor::default());
        let d = Dispatcher::new(exec.clone(), config_with_log(Some(500)));
        let ev = MitigationEvent::mass_action(1, ActorId::Unknown, ActionKind::Ban, 5, Utc::now());

        let err = d.dispatch(&ev).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownActor { community: 1, kind: ActionKind::Ban }));
        assert!(exec.bans().is_empty());
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_ban_is_returned_and_skips_log() {
        let exec = Arc::new(RecordingExecutor::default());
        exec.fail_bans_for(7);
        let d = Dispatcher::new(exec.clone(), config_with_log(Some(500)));
        let ev = MitigationEvent::mass_action(1, ActorId::Member(7), ActionKind::Ban, 5, Utc::now());

        assert!(matches!(d.dispatch(&ev).await, Err(DispatchError::TargetNotFound { .. })));
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_warning_does_not_fail_the_timeout() {
        let exec = Arc::new(RecordingExecutor::default());
        exec.fail_sends_to(42);
        let d = Dispatcher::new(exec.clone(), config_with_log(None));
        let ev = MitigationEvent::message_flood(1, 9, 42, 6, Utc::now());

        d.dispatch(&ev).await.unwrap();
        assert_eq!(exec.timeouts(), vec![(1, 9)]);
    }
}
