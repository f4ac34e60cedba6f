//! Session configuration (§3) and world-type/filter types.
//!
//! `SessionConfig` is the immutable, validated configuration the rest of the
//! core operates on. The binary's CLI struct (`duet-agent`) is responsible
//! for parsing raw input and converting it into this type via
//! [`SessionConfig::build`].

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// World-type tag, used to filter episode types (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldType {
    Flat,
    Normal,
}

impl WorldType {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "flat" => Ok(WorldType::Flat),
            "normal" => Ok(WorldType::Normal),
            other => Err(ConfigError::InvalidWorldType(other.to_string())),
        }
    }
}

/// Which episode types are eligible this session.
#[derive(Debug, Clone)]
pub enum EpisodeFilter {
    All,
    Named(Vec<String>),
}

impl EpisodeFilter {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("all") {
            EpisodeFilter::All
        } else {
            EpisodeFilter::Named(raw.split(',').map(|s| s.trim().to_string()).collect())
        }
    }
}

/// Timeout knobs threaded through the coordinator and phase engine.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Upper bound on a single phase rendezvous (§4.4, §5).
    pub phase_rendezvous: Duration,
    /// Upper bound on an entire episode, regardless of phase count.
    pub episode_total: Duration,
    /// Deadline for `RecordingController::await_stopped` (§4.3).
    pub recording_stop: Duration,
    /// Interval between peer connect retries, both at startup and on every
    /// reconnect attempt during `setup_connections`.
    pub connect_retry_interval: Duration,
    /// Wall-clock bound on a single connect attempt (startup or reconnect)
    /// before it is treated as failed (§4.2: "Bind/connect failure at
    /// startup → fatal").
    pub connect_timeout: Duration,
    /// How many times the coordinator retries establishing the link after
    /// it drops mid-session before giving up and reporting the session
    /// unrecoverable (§6 exit code 2).
    pub max_reconnect_attempts: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            phase_rendezvous: Duration::from_secs(15),
            episode_total: Duration::from_secs(300),
            recording_stop: Duration::from_secs(10),
            connect_retry_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

/// Immutable per-process session configuration (§3).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub own_name: String,
    pub peer_name: String,
    pub own_listen_port: u16,
    pub peer_addr: SocketAddr,
    pub seed: String,
    pub episode_count: u64,
    pub start_index: u64,
    pub world_type: WorldType,
    pub filter: EpisodeFilter,
    pub smoke_test: bool,
    pub timeouts: Timeouts,
}

impl SessionConfig {
    /// Validate raw fields and assemble a `SessionConfig`, or a
    /// `ConfigError` describing why startup must abort (exit code 1, §6).
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        own_name: String,
        peer_name: String,
        own_listen_port: u16,
        peer_addr: SocketAddr,
        seed: String,
        episode_count: u64,
        start_index: u64,
        world_type: &str,
        filter: &str,
        smoke_test: bool,
        timeouts: Timeouts,
    ) -> Result<Self, ConfigError> {
        let world_type = WorldType::parse(world_type)?;
        let filter = EpisodeFilter::parse(filter);
        if let EpisodeFilter::Named(ref names) = filter {
            if names.is_empty() || names.iter().all(|n| n.is_empty()) {
                return Err(ConfigError::EmptyFilter);
            }
        }
        if peer_addr.ip().is_loopback() && peer_addr.port() == own_listen_port {
            return Err(ConfigError::PortConflict);
        }
        Ok(Self {
            own_name,
            peer_name,
            own_listen_port,
            peer_addr,
            seed,
            episode_count,
            start_index,
            world_type,
            filter,
            smoke_test,
            timeouts,
        })
    }

    /// Lexicographic primary/secondary tie-break (GLOSSARY: "Primary peer").
    pub fn is_primary(&self) -> bool {
        self.own_name < self.peer_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn rejects_unknown_world_type() {
        let err = SessionConfig::build(
            "Alpha".into(),
            "Bravo".into(),
            7000,
            addr(7001),
            "seed".into(),
            1,
            0,
            "hilly",
            "all",
            false,
            Timeouts::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorldType(_)));
    }

    #[test]
    fn rejects_same_loopback_port_for_self_and_peer() {
        let err = SessionConfig::build(
            "Alpha".into(),
            "Bravo".into(),
            7000,
            addr(7000),
            "seed".into(),
            1,
            0,
            "flat",
            "all",
            false,
            Timeouts::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::PortConflict));
    }

    #[test]
    fn primary_is_lexicographically_smaller_name() {
        let cfg = SessionConfig::build(
            "Alpha".into(),
            "Bravo".into(),
            7000,
            addr(7001),
            "seed".into(),
            1,
            0,
            "flat",
            "all",
            false,
            Timeouts::default(),
        )
        .unwrap();
        assert!(cfg.is_primary());

        let cfg2 = SessionConfig::build(
            "Bravo".into(),
            "Alpha".into(),
            7001,
            addr(7000),
            "seed".into(),
            1,
            0,
            "flat",
            "all",
            false,
            Timeouts::default(),
        )
        .unwrap();
        assert!(!cfg2.is_primary());
    }
}
