// tripwire/src/executor.rs
//
// Outbound seam to the platform. The engine decides; an ActionExecutor
// carries the decision out (ban, timeout, post, delete).
//
// JsonlExecutor is the bundled implementation: it appends every request to
// per-action JSONL files in an output directory. A platform client tails
// those files and performs the calls.
//
//   bans.jsonl       — ban_member requests
//   timeouts.jsonl   — timeout_member requests
//   messages.jsonl   — send_message requests (notices + log embeds)
//   deletions.jsonl  — delete_message requests
//   audit_log.jsonl  — everything above, in order

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::DispatchError;
use crate::events::{ChannelId, CommunityId, MessageId, UserId};

// ── Outbound messages ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name:   String,
    pub value:  String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title:  String,
    pub colour: u32,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
}

impl Embed {
    pub fn new(title: impl Into<String>, colour: u32) -> Self {
        Self { title: title.into(), colour, fields: Vec::new(), footer: None }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(EmbedField { name: name.into(), value: value.into(), inline: false });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text(String),
    Embed(Embed),
}

// ── Executor trait ────────────────────────────────────────────────────────────

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn ban_member(&self, community: CommunityId, member: UserId, reason: &str)
        -> Result<(), DispatchError>;

    async fn timeout_member(
        &self,
        community: CommunityId,
        member:    UserId,
        duration:  Duration,
        reason:    &str,
    ) -> Result<(), DispatchError>;

    async fn send_message(&self, channel: ChannelId, message: &OutboundMessage)
        -> Result<(), DispatchError>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId)
        -> Result<(), DispatchError>;
}

// ── JSONL executor ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    Ban     { community: CommunityId, member: UserId, reason: String },
    Timeout { community: CommunityId, member: UserId, seconds: u64, reason: String },
    Send    { channel: ChannelId, message: OutboundMessage },
    Delete  { channel: ChannelId, message: MessageId },
}

#[derive(Debug, Serialize)]
struct RequestLine<'a> {
    #[serde(flatten)]
    request:   &'a ActionRequest,
    timestamp: DateTime<Utc>,
}

pub struct JsonlExecutor {
    out: PathBuf,
}

impl JsonlExecutor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, DispatchError> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)?;
        Ok(Self { out })
    }

    pub fn output_dir(&self) -> &Path { &self.out }

    async fn record(&self, file: &str, request: ActionRequest) -> Result<(), DispatchError> {
        let line = serde_json::to_string(&RequestLine { request: &request, timestamp: Utc::now() })? + "\n";
        self.write(file, &line).await?;
        self.write("audit_log.jsonl", &line).await?;
        debug!(file, "action request written");
        Ok(())
    }

    async fn write(&self, file: &str, content: &str) -> Result<(), DispatchError> {
        let mut f = OpenOptions::new().create(true).append(true)
            .open(self.out.join(file)).await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for JsonlExecutor {
    async fn ban_member(&self, community: CommunityId, member: UserId, reason: &str)
        -> Result<(), DispatchError>
    {
        self.record("bans.jsonl", ActionRequest::Ban {
            community, member, reason: reason.to_string(),
        }).await
    }

    async fn timeout_member(
        &self,
        community: CommunityId,
        member:    UserId,
        duration:  Duration,
        reason:    &str,
    ) -> Result<(), DispatchError> {
        self.record("timeouts.jsonl", ActionRequest::Timeout {
            community, member, seconds: duration.as_secs(), reason: reason.to_string(),
        }).await
    }

    async fn send_message(&self, channel: ChannelId, message: &OutboundMessage)
        -> Result<(), DispatchError>
    {
        self.record("messages.jsonl", ActionRequest::Send { channel, message: message.clone() }).await
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId)
        -> Result<(), DispatchError>
    {
        self.record("deletions.jsonl", ActionRequest::Delete { channel, message }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(dir: &Path, file: &str) -> Vec<serde_json::Value> {
        std::fs::read_to_string(dir.join(file))
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn requests_land_in_their_file_and_the_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let exec = JsonlExecutor::new(dir.path().join("out")).unwrap();
        let out = exec.output_dir().to_path_buf();

        exec.ban_member(1, 2, "Antinuke: Mass banning detected").await.unwrap();
        exec.timeout_member(1, 3, Duration::from_secs(300), "Spam detected").await.unwrap();
        exec.send_message(9, &OutboundMessage::Text("hello".into())).await.unwrap();

        let bans = lines(&out, "bans.jsonl");
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0]["action"], "ban");
        assert_eq!(bans[0]["member"], 2);
        assert_eq!(bans[0]["reason"], "Antinuke: Mass banning detected");

        let timeouts = lines(&out, "timeouts.jsonl");
        assert_eq!(timeouts[0]["seconds"], 300);

        let messages = lines(&out, "messages.jsonl");
        assert_eq!(messages[0]["message"]["kind"], "text");
        assert_eq!(messages[0]["message"]["body"], "hello");

        assert_eq!(lines(&out, "audit_log.jsonl").len(), 3);
        assert!(lines(&out, "deletions.jsonl").is_empty());
    }

    #[test]
    fn embed_builder_collects_fields() {
        let e = Embed::new("Antinuke Alert", 0xff0000)
            .field("User", "<@1>")
            .field("Trigger", "mass banning")
            .footer("Timestamp: now");
        assert_eq!(e.fields.len(), 2);
        assert_eq!(e.fields[1].value, "mass banning");
        assert_eq!(e.footer.as_deref(), Some("Timestamp: now"));
    }
}
