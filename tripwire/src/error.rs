// tripwire/src/error.rs
//
// Errors crossing the executor seam. None of these are fatal: the engine
// logs them and moves on to the next entry.

use thiserror::Error;

use crate::events::{ActionKind, CommunityId};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("missing permission for {0}")]
    PermissionDenied(String),

    #[error("target {target} not found in community {community}")]
    TargetNotFound { community: CommunityId, target: u64 },

    #[error("cannot mitigate {kind} burst in community {community}: actor unknown")]
    UnknownActor { community: CommunityId, kind: ActionKind },

    #[error("platform rejected request: {0}")]
    Rejected(String),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("banned word filter: {0}")]
    Filter(#[from] aho_corasick::BuildError),
}
