// tripwire/src/engine/testing.rs
//
// Recording executor for unit tests: remembers successful calls, fails,
// stalls or hangs on request.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::DispatchError;
use crate::events::{ChannelId, CommunityId, MessageId, UserId};
use crate::executor::{ActionExecutor, OutboundMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Ban     { community: CommunityId, member: UserId, reason: String },
    Timeout { community: CommunityId, member: UserId, duration: Duration, reason: String },
    Send    { channel: ChannelId, message: OutboundMessage },
    Delete  { channel: ChannelId, message: MessageId },
}

#[derive(Default)]
pub struct RecordingExecutor {
    calls:        Mutex<Vec<Call>>,
    failing_bans: Mutex<HashSet<UserId>>,
    hanging_bans: Mutex<HashSet<UserId>>,
    failing_sends: Mutex<HashSet<ChannelId>>,
    ban_delay:    Mutex<Option<Duration>>,
}

impl RecordingExecutor {
    pub fn fail_bans_for(&self, member: UserId) { self.failing_bans.lock().insert(member); }
    pub fn hang_bans_for(&self, member: UserId) { self.hanging_bans.lock().insert(member); }
    pub fn fail_sends_to(&self, channel: ChannelId) { self.failing_sends.lock().insert(channel); }
    pub fn delay_bans_by(&self, delay: Duration) { *self.ban_delay.lock() = Some(delay); }

    pub fn calls(&self) -> Vec<Call> { self.calls.lock().clone() }

    pub fn bans(&self) -> Vec<(CommunityId, UserId)> {
        self.calls().into_iter().filter_map(|c| match c {
            Call::Ban { community, member, .. } => Some((community, member)),
            _ => None,
        }).collect()
    }

    pub fn timeouts(&self) -> Vec<(CommunityId, UserId)> {
        self.calls().into_iter().filter_map(|c| match c {
            Call::Timeout { community, member, .. } => Some((community, member)),
            _ => None,
        }).collect()
    }

    pub fn deletions(&self) -> Vec<(ChannelId, MessageId)> {
        self.calls().into_iter().filter_map(|c| match c {
            Call::Delete { channel, message } => Some((channel, message)),
            _ => None,
        }).collect()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn ban_member(&self, community: CommunityId, member: UserId, reason: &str)
        -> Result<(), DispatchError>
    {
        let hang = self.hanging_bans.lock().contains(&member);
        if hang {
            std::future::pending::<()>().await;
        }
        let delay = *self.ban_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_bans.lock().contains(&member) {
            return Err(DispatchError::TargetNotFound { community, target: member });
        }
        self.calls.lock().push(Call::Ban { community, member, reason: reason.to_string() });
        Ok(())
    }

    async fn timeout_member(&self, community: CommunityId, member: UserId, duration: Duration, reason: &str)
        -> Result<(), DispatchError>
    {
        self.calls.lock().push(Call::Timeout { community, member, duration, reason: reason.to_string() });
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, message: &OutboundMessage)
        -> Result<(), DispatchError>
    {
        if self.failing_sends.lock().contains(&channel) {
            return Err(DispatchError::PermissionDenied(format!("send in {}", channel)));
        }
        self.calls.lock().push(Call::Send { channel, message: message.clone() });
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId)
        -> Result<(), DispatchError>
    {
        self.calls.lock().push(Call::Delete { channel, message });
        Ok(())
    }
}
