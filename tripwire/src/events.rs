// tripwire/src/events.rs
//
// Shared event types and all domain types flowing through Tripwire.
//
// Inbound:  PlatformEvent (one JSONL line per event from the platform client)
// Ledgers:  ActionRecord / MessageRecord (immutable, timestamped)
// Outbound: MitigationEvent → Dispatcher → OutboundMessage / executor calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ledger::Timestamped;

// ── Identifiers ───────────────────────────────────────────────────────────────

pub type CommunityId = u64;
pub type ChannelId   = u64;
pub type UserId      = u64;
pub type MessageId   = u64;

/// Who an observed action is attributed to.
///
/// Ban events from the platform carry no moderator, so they land in the
/// `Unknown` bucket and are counted there like any named actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorId {
    Member(UserId),
    Unknown,
}

impl ActorId {
    pub fn member(self) -> Option<UserId> {
        match self {
            Self::Member(id) => Some(id),
            Self::Unknown    => None,
        }
    }

    /// Platform mention string, used in channel notices.
    pub fn mention(self) -> String {
        match self {
            Self::Member(id) => format!("<@{}>", id),
            Self::Unknown    => "an unidentified actor".to_string(),
        }
    }
}

impl From<Option<UserId>> for ActorId {
    fn from(id: Option<UserId>) -> Self {
        id.map(Self::Member).unwrap_or(Self::Unknown)
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Member(id) => write!(f, "{}", id),
            Self::Unknown    => write!(f, "unknown"),
        }
    }
}

// ── Destructive actions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Ban,
    Kick,
    RoleCreate,
    RoleDelete,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [Self::Ban, Self::Kick, Self::RoleCreate, Self::RoleDelete];

    /// Fixed reason string attached to the protective ban.
    pub fn ban_reason(self) -> &'static str {
        match self {
            Self::Ban        => "Antinuke: Mass banning detected",
            Self::Kick       => "Antinuke: Mass kicking detected",
            Self::RoleCreate => "Antinuke: Mass role creation detected",
            Self::RoleDelete => "Antinuke: Mass role deletion detected",
        }
    }

    /// Human phrase for log notices ("was banned for mass banning").
    pub fn describe(self) -> &'static str {
        match self {
            Self::Ban        => "mass banning",
            Self::Kick       => "mass kicking",
            Self::RoleCreate => "mass role creation",
            Self::RoleDelete => "mass role deletion",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ban        => write!(f, "ban"),
            Self::Kick       => write!(f, "kick"),
            Self::RoleCreate => write!(f, "role_create"),
            Self::RoleDelete => write!(f, "role_delete"),
        }
    }
}

// ── Ledger records ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind:      ActionKind,
    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(kind: ActionKind, timestamp: DateTime<Utc>) -> Self {
        Self { kind, timestamp }
    }
}

impl Timestamped for ActionRecord {
    fn timestamp(&self) -> DateTime<Utc> { self.timestamp }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(timestamp: DateTime<Utc>) -> Self { Self { timestamp } }
}

impl Timestamped for MessageRecord {
    fn timestamp(&self) -> DateTime<Utc> { self.timestamp }
}

// ── Inbound platform events ───────────────────────────────────────────────────

/// One notification from the platform client. Feed lines look like
/// `{"type":"member_banned","community":1,"actor":null}`; a missing
/// `timestamp` means "now".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    Message {
        community: CommunityId,
        channel:   ChannelId,
        #[serde(default)]
        message_id: Option<MessageId>,
        author:    UserId,
        #[serde(default)]
        content:   String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    RoleCreated {
        community: CommunityId,
        #[serde(default)]
        actor:     Option<UserId>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    RoleDeleted {
        community: CommunityId,
        #[serde(default)]
        actor:     Option<UserId>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    MemberBanned {
        community: CommunityId,
        #[serde(default)]
        actor:     Option<UserId>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    MemberKicked {
        community: CommunityId,
        #[serde(default)]
        actor:     Option<UserId>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl PlatformEvent {
    /// Parse one feed line. Blank lines carry nothing and yield `None`.
    pub fn from_feed_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Message      { timestamp, .. }
            | Self::RoleCreated  { timestamp, .. }
            | Self::RoleDeleted  { timestamp, .. }
            | Self::MemberBanned { timestamp, .. }
            | Self::MemberKicked { timestamp, .. } => *timestamp,
        }
    }

    /// Re-stamp the event (replay mode shifts captured feeds to wall-clock time).
    pub fn set_timestamp(&mut self, at: DateTime<Utc>) {
        match self {
            Self::Message      { timestamp, .. }
            | Self::RoleCreated  { timestamp, .. }
            | Self::RoleDeleted  { timestamp, .. }
            | Self::MemberBanned { timestamp, .. }
            | Self::MemberKicked { timestamp, .. } => *timestamp = at,
        }
    }
}

// ── Mitigation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    DestructiveAction,
    MessageRate,
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DestructiveAction => write!(f, "ANTINUKE"),
            Self::MessageRate       => write!(f, "AUTOMOD"),
        }
    }
}

/// What crossed its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pipeline", rename_all = "snake_case")]
pub enum Trigger {
    MassAction   { kind: ActionKind },
    MessageFlood { channel: ChannelId },
}

impl Trigger {
    pub fn pipeline(&self) -> PipelineKind {
        match self {
            Self::MassAction   { .. } => PipelineKind::DestructiveAction,
            Self::MessageFlood { .. } => PipelineKind::MessageRate,
        }
    }
}

/// Output of a fired evaluation. Built, dispatched, dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationEvent {
    pub community: CommunityId,
    pub actor:     ActorId,
    pub trigger:   Trigger,
    /// Qualifying records inside the window when the rule fired.
    pub count:     usize,
    pub reason:    String,
    pub timestamp: DateTime<Utc>,
}

impl MitigationEvent {
    pub fn mass_action(
        community: CommunityId,
        actor:     ActorId,
        kind:      ActionKind,
        count:     usize,
        now:       DateTime<Utc>,
    ) -> Self {
        Self {
            community,
            actor,
            trigger:   Trigger::MassAction { kind },
            count,
            reason:    kind.ban_reason().to_string(),
            timestamp: now,
        }
    }

    pub fn message_flood(
        community: CommunityId,
        author:    UserId,
        channel:   ChannelId,
        count:     usize,
        now:       DateTime<Utc>,
    ) -> Self {
        Self {
            community,
            actor:     ActorId::Member(author),
            trigger:   Trigger::MessageFlood { channel },
            count,
            reason:    "Spam detected".to_string(),
            timestamp: now,
        }
    }

    pub fn pipeline(&self) -> PipelineKind { self.trigger.pipeline() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_actor_maps_to_unknown_bucket() {
        assert_eq!(ActorId::from(None), ActorId::Unknown);
        assert_eq!(ActorId::from(Some(7)), ActorId::Member(7));
        assert_eq!(ActorId::Unknown.member(), None);
    }

    #[test]
    fn feed_line_without_actor_or_timestamp_parses() {
        let before = Utc::now();
        let ev: PlatformEvent =
            serde_json::from_str(r#"{"type":"member_banned","community":42}"#).unwrap();
        match ev {
            PlatformEvent::MemberBanned { community, actor, timestamp } => {
                assert_eq!(community, 42);
                assert_eq!(actor, None);
                assert!(timestamp >= before);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn message_line_parses_with_explicit_timestamp() {
        let ev: PlatformEvent = serde_json::from_str(
            r#"{"type":"message","community":1,"channel":2,"author":3,
                "content":"hi","timestamp":"2024-05-01T12:00:00Z"}"#,
        ).unwrap();
        assert!(matches!(ev, PlatformEvent::Message { community: 1, author: 3, .. }));
        assert_eq!(ev.timestamp().to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn feed_lines_skip_blanks_and_reject_garbage() {
        assert!(PlatformEvent::from_feed_line("").unwrap().is_none());
        assert!(PlatformEvent::from_feed_line("   \r").unwrap().is_none());
        assert!(PlatformEvent::from_feed_line("{not json").is_err());
        assert!(PlatformEvent::from_feed_line(r#"{"type":"member_exploded","community":1}"#).is_err());

        let ev = PlatformEvent::from_feed_line("  {\"type\":\"role_deleted\",\"community\":4,\"actor\":8}\n")
            .unwrap()
            .unwrap();
        assert!(matches!(ev, PlatformEvent::RoleDeleted { community: 4, actor: Some(8), .. }));
    }

    #[test]
    fn trigger_reports_its_pipeline() {
        let now = Utc::now();
        let ev = MitigationEvent::mass_action(1, ActorId::Member(2), ActionKind::Ban, 5, now);
        assert_eq!(ev.pipeline(), PipelineKind::DestructiveAction);
        assert_eq!(ev.reason, "Antinuke: Mass banning detected");

        let ev = MitigationEvent::message_flood(1, 2, 3, 6, now);
        assert_eq!(ev.pipeline(), PipelineKind::MessageRate);
        assert_eq!(ev.actor, ActorId::Member(2));
    }
}
