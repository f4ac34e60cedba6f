//! Peer Coordinator (C2).
//!
//! A long-lived, full-duplex message channel between the two agent
//! processes: one inbound socket (we listen, peer connects) and one outbound
//! socket (we connect, peer listens). Grounded on the teacher's
//! `freeq-sdk::client` event-loop-over-`mpsc` structure and
//! `freeq-server::server`'s accept-loop/spawned-connection-task pattern —
//! the *task shape* is kept, the *wire format* (length-prefixed JSON here,
//! rather than IRC lines) is not.
//!
//! Mid-session the link can drop (peer crash, network blip). §4.2 and §7
//! require auto-reconnect with periodic retry, and require that a dropped
//! link surface to the running episode as `peer_error=true` rather than a
//! plain timeout. Both are handled by a single background supervisor task
//! that owns the connection for the coordinator's whole lifetime: it runs
//! the current connection until it dies, then retries establishing a new
//! one a bounded number of times, publishing its status
//! (`Connected`/`Reconnecting`/`Unrecoverable`) on a `watch` channel that
//! both the phase engine (`disconnected`) and the session loop
//! (`await_connected`) observe.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::CoordinatorError;
use crate::message::{self, PhaseEvent, PhaseKind};

type ListenerKey = (String, u64);
type ListenerMap = Arc<Mutex<HashMap<ListenerKey, oneshot::Sender<PhaseEvent>>>>;

/// Outbound send capacity. Message rate is low (<10/s, §5); a small bounded
/// channel is enough that `try_send` saturating is a genuine signal of
/// trouble rather than routine backpressure.
const SEND_QUEUE_CAPACITY: usize = 64;

/// Link health, shared between the supervisor task and every caller of
/// `disconnected`/`await_connected` via a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkStatus {
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted (§4.2, §6 exit code 2): the session
    /// cannot proceed.
    Unrecoverable,
}

/// A bidirectional channel to the peer agent.
pub struct PeerCoordinator {
    listeners: ListenerMap,
    send_tx: mpsc::Sender<PhaseEvent>,
    status_rx: watch::Receiver<LinkStatus>,
    _supervisor: tokio::task::JoinHandle<()>,
}

impl PeerCoordinator {
    /// Start the listener and initiate the outbound connect, retrying the
    /// connect side on a fixed interval until both sides of the channel are
    /// established or `connect_timeout` elapses. Suspension point: returns
    /// only once both the inbound accept and the outbound connect have
    /// completed (startup failure, either bind or an exhausted connect
    /// retry, is fatal per §4.2).
    ///
    /// Once established, a background task keeps the link alive for the
    /// rest of the coordinator's lifetime, reconnecting up to
    /// `max_reconnect_attempts` times whenever the connection drops.
    pub async fn setup_connections(
        my_port: u16,
        peer_addr: SocketAddr,
        connect_retry_interval: Duration,
        connect_timeout: Duration,
        max_reconnect_attempts: u32,
    ) -> Result<Self, CoordinatorError> {
        let bind_addr = format!("0.0.0.0:{my_port}");
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| CoordinatorError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        tracing::info!(%bind_addr, "peer coordinator listening");

        let (inbound, outbound) =
            Self::establish(&listener, peer_addr, connect_retry_interval, connect_timeout).await?;
        tracing::info!(%peer_addr, "peer coordinator link established");

        let listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (status_tx, status_rx) = watch::channel(LinkStatus::Connected);

        let supervisor = tokio::spawn(Self::supervise(
            listener,
            peer_addr,
            connect_retry_interval,
            connect_timeout,
            max_reconnect_attempts,
            Arc::clone(&listeners),
            send_rx,
            status_tx,
            inbound,
            outbound,
        ));

        Ok(Self {
            listeners,
            send_tx,
            status_rx,
            _supervisor: supervisor,
        })
    }

    /// One connection attempt: race an accept against a connect-with-retry
    /// loop bounded by `connect_timeout`. Used both for the initial startup
    /// handshake and for every later reconnect attempt.
    ///
    /// `connect_timeout` bounds the connect side only: if the peer cannot be
    /// dialed within that window the call fails fast with
    /// `CoordinatorError::Connect` rather than waiting on `accept` forever,
    /// which matters for reconnects where the peer process may be
    /// permanently gone (the accept side has no independent deadline —
    /// nothing else in this system can bound "has the peer dialed us yet").
    async fn establish(
        listener: &TcpListener,
        peer_addr: SocketAddr,
        retry_interval: Duration,
        connect_timeout: Duration,
    ) -> Result<(TcpStream, TcpStream), CoordinatorError> {
        let accept_fut = async {
            listener
                .accept()
                .await
                .map(|(stream, _from)| stream)
                .map_err(|source| CoordinatorError::Bind {
                    addr: listener
                        .local_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "<unknown>".to_string()),
                    source,
                })
        };
        let connect_fut = async {
            let deadline = tokio::time::Instant::now() + connect_timeout;
            loop {
                match TcpStream::connect(peer_addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(source) => {
                        if tokio::time::Instant::now() >= deadline {
                            return Err(CoordinatorError::Connect {
                                addr: peer_addr.to_string(),
                                source,
                            });
                        }
                        tracing::debug!(%peer_addr, error = %source, "peer connect failed, retrying");
                        tokio::time::sleep(retry_interval).await;
                    }
                }
            }
        };

        tokio::pin!(accept_fut);
        tokio::pin!(connect_fut);
        let mut inbound: Option<TcpStream> = None;
        let mut outbound: Option<TcpStream> = None;
        while inbound.is_none() || outbound.is_none() {
            tokio::select! {
                res = &mut accept_fut, if inbound.is_none() => {
                    inbound = Some(res?);
                }
                res = &mut connect_fut, if outbound.is_none() => {
                    outbound = Some(res?);
                }
            }
        }
        Ok((inbound.unwrap(), outbound.unwrap()))
    }

    /// Resolves once the link is anything other than `Connected` — used by
    /// the phase engine to race a rendezvous or an episode body against a
    /// mid-session peer-link failure (§7 `PeerLinkError`). Resolves
    /// immediately if the link is already down when called.
    pub async fn disconnected(&self) {
        let mut rx = self.status_rx.clone();
        let _ = rx.wait_for(|s| *s != LinkStatus::Connected).await;
    }

    /// Suspension point used by the session loop before starting the next
    /// episode (§8 boundary behavior: "next episode blocks in
    /// setup_connections until reconnect"). Resolves `Ok(())` once
    /// `Connected`, or `Err` once the supervisor gives up
    /// (`Unrecoverable`) — the caller should then treat the session as
    /// unrecoverable (§6 exit code 2).
    pub async fn await_connected(&self) -> Result<(), CoordinatorError> {
        let mut rx = self.status_rx.clone();
        loop {
            match *rx.borrow() {
                LinkStatus::Connected => return Ok(()),
                LinkStatus::Unrecoverable => return Err(CoordinatorError::Disconnected),
                LinkStatus::Reconnecting => {}
            }
            if rx.changed().await.is_err() {
                return Err(CoordinatorError::Disconnected);
            }
        }
    }

    /// Register a one-shot listener for `(kind, episode_index)`. Must be
    /// called, and its receiver's registration observed as complete, before
    /// the corresponding `send` — this is I2, enforced by callers (the
    /// phase engine's `rendezvous` helper) never awaiting between the two.
    pub fn once(&self, kind: &PhaseKind, episode_index: u64) -> oneshot::Receiver<PhaseEvent> {
        let (tx, rx) = oneshot::channel();
        self.listeners
            .lock()
            .insert((kind.wire_name(), episode_index), tx);
        rx
    }

    /// Fire-and-forget send on the outbound socket. Non-blocking: a
    /// saturated queue is reported as an error rather than applying
    /// backpressure (§5). While the link is down, sends are rejected
    /// outright rather than queued — per §4.2, "messages sent during the
    /// gap are dropped (no queue)".
    pub fn send(
        &self,
        kind: &PhaseKind,
        params: serde_json::Value,
        episode_index: u64,
    ) -> Result<(), CoordinatorError> {
        if *self.status_rx.borrow() != LinkStatus::Connected {
            return Err(CoordinatorError::Disconnected);
        }
        let event = PhaseEvent::new(kind, params, episode_index);
        self.send_tx
            .try_send(event)
            .map_err(|e| CoordinatorError::SendFailed(e.to_string()))
    }

    /// Drop all pending listeners scoped to `episode_index` (invoked at
    /// teardown, I3-adjacent cleanup: a lingering listener from an aborted
    /// episode must never fire into the next one).
    pub fn clear_scope(&self, episode_index: u64) {
        self.listeners
            .lock()
            .retain(|(_, idx), _| *idx != episode_index);
    }

    /// Owns the connection for the coordinator's whole lifetime: runs the
    /// current socket pair until it drops, then retries establishing a new
    /// one up to `max_reconnect_attempts` times before giving up.
    #[allow(clippy::too_many_arguments)]
    async fn supervise(
        listener: TcpListener,
        peer_addr: SocketAddr,
        retry_interval: Duration,
        connect_timeout: Duration,
        max_reconnect_attempts: u32,
        listeners: ListenerMap,
        mut send_rx: mpsc::Receiver<PhaseEvent>,
        status_tx: watch::Sender<LinkStatus>,
        first_inbound: TcpStream,
        first_outbound: TcpStream,
    ) {
        let mut inbound = first_inbound;
        let mut outbound = first_outbound;

        loop {
            status_tx.send_replace(LinkStatus::Connected);

            match run_connection(&mut inbound, &mut outbound, &listeners, &mut send_rx).await {
                ConnectionOutcome::OwnerGone => return,
                ConnectionOutcome::LinkDropped => {}
            }

            status_tx.send_replace(LinkStatus::Reconnecting);
            tracing::warn!("peer link dropped, attempting to reconnect before next episode");

            let mut attempt = 0u32;
            let reconnected = loop {
                attempt += 1;
                match Self::establish(&listener, peer_addr, retry_interval, connect_timeout).await {
                    Ok(pair) => break Some(pair),
                    Err(e) => {
                        tracing::warn!(attempt, max_reconnect_attempts, error = %e, "reconnect attempt failed");
                        if attempt >= max_reconnect_attempts {
                            break None;
                        }
                    }
                }
            };

            match reconnected {
                Some((new_inbound, new_outbound)) => {
                    tracing::info!("peer link re-established");
                    inbound = new_inbound;
                    outbound = new_outbound;
                }
                None => {
                    tracing::error!("peer link unrecoverable after exhausting reconnect attempts");
                    status_tx.send_replace(LinkStatus::Unrecoverable);
                    return;
                }
            }
        }
    }
}

/// Why `run_connection` returned.
enum ConnectionOutcome {
    /// The socket pair died (EOF, read/write error) — the supervisor should
    /// attempt to reconnect.
    LinkDropped,
    /// The owning `PeerCoordinator` (and its `send_tx`) was dropped —
    /// nothing left to serve, the supervisor should exit for good.
    OwnerGone,
}

/// Runs one connected socket pair: dispatches inbound frames to registered
/// one-shot listeners, and forwards queued outbound sends onto the socket.
/// Returns as soon as either direction indicates the link is no longer
/// usable.
async fn run_connection(
    inbound: &mut TcpStream,
    outbound: &mut TcpStream,
    listeners: &ListenerMap,
    send_rx: &mut mpsc::Receiver<PhaseEvent>,
) -> ConnectionOutcome {
    loop {
        tokio::select! {
            frame = message::read_frame(inbound) => {
                match frame {
                    Ok(Some(event)) => {
                        let key = (event.event_name.clone(), event.episode_index);
                        let waiter = listeners.lock().remove(&key);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(event);
                            }
                            None => {
                                // No listener registered yet: the peer's send
                                // raced ahead of our register. Not an error —
                                // any handshake relying on ordering must always
                                // register before it sends (§4.2).
                                tracing::debug!(
                                    event = %key.0,
                                    episode_index = key.1,
                                    "dropped inbound message with no registered listener"
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!("peer coordinator inbound stream closed");
                        return ConnectionOutcome::LinkDropped;
                    }
                    Err(CoordinatorError::MalformedFrame) => {
                        tracing::warn!("malformed frame from peer, skipping");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "peer coordinator inbound stream errored");
                        return ConnectionOutcome::LinkDropped;
                    }
                }
            }
            maybe_event = send_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        if let Err(e) = message::write_frame(outbound, &event).await {
                            tracing::warn!(error = %e, "failed to write frame to peer, link likely down");
                            return ConnectionOutcome::LinkDropped;
                        }
                    }
                    None => return ConnectionOutcome::OwnerGone,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TEST_CONNECT_TIMEOUT: Duration = Duration::from_millis(150);
    const TEST_MAX_RECONNECT_ATTEMPTS: u32 = 3;

    async fn pair(port_a: u16, port_b: u16) -> (PeerCoordinator, PeerCoordinator) {
        let addr_a: SocketAddr = format!("127.0.0.1:{port_a}").parse().unwrap();
        let addr_b: SocketAddr = format!("127.0.0.1:{port_b}").parse().unwrap();
        let (a, b) = tokio::join!(
            PeerCoordinator::setup_connections(
                port_a,
                addr_b,
                Duration::from_millis(20),
                TEST_CONNECT_TIMEOUT,
                TEST_MAX_RECONNECT_ATTEMPTS,
            ),
            PeerCoordinator::setup_connections(
                port_b,
                addr_a,
                Duration::from_millis(20),
                TEST_CONNECT_TIMEOUT,
                TEST_MAX_RECONNECT_ATTEMPTS,
            ),
        );
        (a.unwrap(), b.unwrap())
    }

    #[tokio::test]
    async fn two_coordinators_exchange_a_phase_rendezvous() {
        let (port_a, port_b) = (pick_port(), pick_port());
        let (a, b) = pair(port_a, port_b).await;

        // Listener-before-send (I2): register first, then send.
        let rx_b = b.once(&PhaseKind::Teleport, 0);
        a.send(&PhaseKind::Teleport, serde_json::json!({"ok": true}), 0)
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx_b)
            .await
            .expect("timed out waiting for rendezvous")
            .expect("sender dropped");
        assert_eq!(got.event_name, "teleport");
        assert_eq!(got.episode_index, 0);
    }

    #[tokio::test]
    async fn unregistered_message_is_dropped_not_fatal() {
        let (port_a, port_b) = (pick_port(), pick_port());
        let (a, b) = pair(port_a, port_b).await;

        // No listener registered on b for this phase — must not panic or hang.
        a.send(&PhaseKind::Stop, serde_json::json!({}), 3).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // b can still register and receive a subsequent, distinct message.
        let rx = b.once(&PhaseKind::Stopped, 3);
        a.send(&PhaseKind::Stopped, serde_json::json!({}), 3).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.event_name, "stopped");
    }

    #[tokio::test]
    async fn clear_scope_drops_listeners_for_that_episode_only() {
        let (port_a, port_b) = (pick_port(), pick_port());
        let (a, b) = pair(port_a, port_b).await;
        let _ = a;

        let rx_ep0 = b.once(&PhaseKind::Stop, 0);
        let rx_ep1 = b.once(&PhaseKind::Stop, 1);
        b.clear_scope(0);

        assert_eq!(b.listeners.lock().len(), 1);
        drop(rx_ep0);
        drop(rx_ep1);
    }

    #[tokio::test]
    async fn link_drop_marks_disconnected_and_then_reconnects() {
        let (port_a, port_b) = (pick_port(), pick_port());
        let (a, b) = pair(port_a, port_b).await;

        // Kill `a`'s side of the link entirely; `b`'s supervisor should
        // observe the drop and transition away from Connected.
        drop(a);

        tokio::time::timeout(Duration::from_secs(2), b.disconnected())
            .await
            .expect("b did not observe the link drop in time");

        // `await_connected` must not hang forever: a fresh peer for `a`'s
        // old port is never coming back within the bounded attempt budget in
        // this test, but the method itself must still resolve once the
        // supervisor gives up.
        let result = tokio::time::timeout(Duration::from_secs(5), b.await_connected()).await;
        assert!(result.is_ok(), "await_connected hung instead of giving up");
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected_not_queued() {
        let (port_a, port_b) = (pick_port(), pick_port());
        let (a, b) = pair(port_a, port_b).await;
        drop(b);

        tokio::time::timeout(Duration::from_secs(2), a.disconnected())
            .await
            .expect("a did not observe the link drop in time");

        let err = a
            .send(&PhaseKind::Stop, serde_json::json!({}), 0)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Disconnected));
    }

    fn pick_port() -> u16 {
        use std::net::TcpListener as StdListener;
        let l = StdListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }
}
