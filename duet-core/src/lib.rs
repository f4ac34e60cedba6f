//! `duet-core`: the episode orchestration and bot-coordination engine shared
//! by both agent processes in a synchronized two-agent gameplay-recording
//! session.
//!
//! This crate is deliberately silent on *what* an episode does (pathfinding,
//! building, combat) and *how* the world protocol or video pipeline work —
//! those are external collaborators it composes through the [`world`] and
//! [`recording`] traits. What it owns is getting two independent processes
//! through an episode in lockstep: identical randomness without exchanging
//! seeds at runtime (`rng`), a peer message channel (`coordinator`), and a
//! phase-rendezvous state machine (`phase`) driving a pluggable catalogue of
//! episode types (`catalogue`).

pub mod catalogue;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod phase;
pub mod recording;
pub mod rng;
pub mod world;

pub use catalogue::{Catalogue, EpisodeType, Selector};
pub use config::{EpisodeFilter, SessionConfig, Timeouts, WorldType};
pub use context::EpisodeContext;
pub use coordinator::PeerCoordinator;
pub use error::{ConfigError, CoordinatorError, PhaseError, WorldError};
pub use message::{PhaseEvent, PhaseKind};
pub use phase::{EpisodeRecord, PhaseEngine};
pub use recording::{FrameCapture, RecordingController};
pub use rng::{AgentRng, Stream};
pub use world::{Position, WorldHandle};
