// tripwire/src/config.rs
//
// Guard configuration — the same JSON document the platform bot keeps in
// config.json. Owned by the outside world; the engine only ever reads it.
//
//   {
//     "logs":     { "<community>": <channel> },
//     "automod":  { "enabled", "banned_words", "spam_threshold", "spam_time" },
//     "antinuke": { "enabled", "ban_threshold", "kick_threshold", "role_threshold",
//                   "time_window", "evaluated_kinds", "track_unattributed" },
//     "sweep_interval": 60, "timeout_minutes": 5, "self_id": null
//   }
//
// Every field has a default, so a partial (or absent) file is fine. Keys the
// bot keeps for itself (autorole, greetings) are ignored. Channel ids are
// accepted as JSON numbers or as the strings the bot writes.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::events::{ActionKind, ChannelId, CommunityId, UserId};

/// Longest window or sweep interval accepted, in seconds (366 days).
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 3600;
/// Longest timeout the platform grants (28 days).
pub const MAX_TIMEOUT_MINUTES: u64 = 28 * 24 * 60;

// ── Pipeline sections ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomodConfig {
    pub enabled:        bool,
    pub banned_words:   Vec<String>,
    /// Messages allowed inside `spam_time`; one more triggers a timeout.
    pub spam_threshold: usize,
    /// Seconds.
    pub spam_time:      u64,
}

impl Default for AutomodConfig {
    fn default() -> Self {
        Self {
            enabled:        false,
            banned_words:   Vec::new(),
            spam_threshold: 5,
            spam_time:      10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntinukeConfig {
    pub enabled:            bool,
    pub ban_threshold:      usize,
    pub kick_threshold:     usize,
    /// Shared by role creation and role deletion (counted separately).
    pub role_threshold:     usize,
    /// Seconds.
    pub time_window:        u64,
    /// Kinds the sweep evaluates. Everything is recorded; only these can fire.
    pub evaluated_kinds:    Vec<ActionKind>,
    /// Count events with no known actor under the shared unknown bucket.
    pub track_unattributed: bool,
}

impl Default for AntinukeConfig {
    fn default() -> Self {
        Self {
            enabled:            false,
            ban_threshold:      5,
            kick_threshold:     5,
            role_threshold:     5,
            time_window:        60,
            evaluated_kinds:    vec![ActionKind::Ban],
            track_unattributed: true,
        }
    }
}

// ── Threshold view ────────────────────────────────────────────────────────────

/// One pipeline's (or one action kind's) rule, as the evaluator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdConfig {
    pub window:          Duration,
    pub count_threshold: usize,
    pub enabled:         bool,
}

// ── Root ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// community → log channel
    #[serde(deserialize_with = "channel_ids")]
    pub logs:            HashMap<CommunityId, ChannelId>,
    pub automod:         AutomodConfig,
    pub antinuke:        AntinukeConfig,
    /// Seconds between sweeps.
    pub sweep_interval:  u64,
    pub timeout_minutes: u64,
    /// The bot's own account; its messages are never tracked.
    pub self_id:         Option<UserId>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            logs:            HashMap::new(),
            automod:         AutomodConfig::default(),
            antinuke:        AntinukeConfig::default(),
            sweep_interval:  60,
            timeout_minutes: 5,
            self_id:         None,
        }
    }
}

impl GuardConfig {
    /// Load from a JSON file. A missing file yields defaults; a malformed or
    /// out-of-range one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("No config at {} — using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        info!(
            automod = config.automod.enabled,
            antinuke = config.antinuke.enabled,
            log_channels = config.logs.len(),
            "Loaded config from {}", path.display()
        );
        Ok(config)
    }

    /// Reject windows and timeouts too large to represent as durations.
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("automod.spam_time",    self.automod.spam_time),
            ("antinuke.time_window", self.antinuke.time_window),
            ("sweep_interval",       self.sweep_interval),
        ];
        for (key, secs) in windows {
            if secs > MAX_WINDOW_SECS {
                bail!("{} = {}s exceeds the {}s limit", key, secs, MAX_WINDOW_SECS);
            }
        }
        if self.timeout_minutes > MAX_TIMEOUT_MINUTES {
            bail!("timeout_minutes = {} exceeds the {} minute limit", self.timeout_minutes, MAX_TIMEOUT_MINUTES);
        }
        Ok(())
    }

    pub fn log_channel(&self, community: CommunityId) -> Option<ChannelId> {
        self.logs.get(&community).copied()
    }

    /// Rule for one destructive-action kind. Disabled unless antinuke is on
    /// and the kind is listed in `evaluated_kinds`.
    pub fn action_threshold(&self, kind: ActionKind) -> ThresholdConfig {
        let a = &self.antinuke;
        let count_threshold = match kind {
            ActionKind::Ban  => a.ban_threshold,
            ActionKind::Kick => a.kick_threshold,
            ActionKind::RoleCreate | ActionKind::RoleDelete => a.role_threshold,
        };
        ThresholdConfig {
            window: self.action_window(),
            count_threshold,
            enabled: a.enabled && a.evaluated_kinds.contains(&kind),
        }
    }

    /// Shared by every destructive kind; older records never count.
    pub fn action_window(&self) -> Duration {
        window_secs(self.antinuke.time_window)
    }

    pub fn message_threshold(&self) -> ThresholdConfig {
        ThresholdConfig {
            window:          window_secs(self.automod.spam_time),
            count_threshold: self.automod.spam_threshold,
            enabled:         self.automod.enabled,
        }
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval.clamp(1, MAX_WINDOW_SECS))
    }

    pub fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_minutes.min(MAX_TIMEOUT_MINUTES) * 60)
    }
}

// Values past the limit only reach here when `validate` was skipped; clamp
// rather than overflow.
fn window_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Snowflake {
    Number(u64),
    Text(String),
}

fn channel_ids<'de, D>(deserializer: D) -> std::result::Result<HashMap<CommunityId, ChannelId>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    HashMap::<CommunityId, Snowflake>::deserialize(deserializer)?
        .into_iter()
        .map(|(community, id)| -> std::result::Result<(CommunityId, ChannelId), D::Error> {
            let channel = match id {
                Snowflake::Number(n) => n,
                Snowflake::Text(s)   => s.trim().parse().map_err(|_| {
                    D::Error::custom(format!("log channel for {} is not an id: {:?}", community, s))
                })?,
            };
            Ok((community, channel))
        })
        .collect()
}
