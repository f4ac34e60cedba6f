//! Error taxonomy for the episode orchestration core.
//!
//! Each concern gets its own `thiserror` enum; callers at the process
//! boundary convert to `anyhow::Error` via `?`.

use thiserror::Error;

/// Fatal configuration problems — surfaced at startup only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown episode type in filter list: {0}")]
    UnknownEpisodeType(String),
    #[error("empty episode filter resolves to zero usable episode types")]
    EmptyFilter,
    #[error("own listen port and peer port must differ when peer is localhost")]
    PortConflict,
    #[error("invalid world type tag: {0} (expected \"flat\" or \"normal\")")]
    InvalidWorldType(String),
}

/// Peer-channel failures.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to peer {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("peer connection lost")]
    Disconnected,
    #[error("malformed frame from peer")]
    MalformedFrame,
    #[error("send to peer failed: {0}")]
    SendFailed(String),
}

/// External-world control-channel failures (teleport, place, etc).
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },
    #[error("world command {command} timed out")]
    Timeout { command: String },
}

/// Faults surfaced from within a running phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("phase rendezvous {phase} timed out")]
    Timeout { phase: String },
    #[error("agent death detected")]
    AgentDeath,
    #[error("peer reported an error")]
    PeerError,
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("internal error in phase body: {0}")]
    Internal(String),
}
