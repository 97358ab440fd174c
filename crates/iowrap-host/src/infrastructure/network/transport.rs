//! UDP datagram transport for agent traffic.
//!
//! One socket serves every agent.  Two named threads drive it:
//!
//! - the **receiver** blocks in `recv_from` with a 500ms read timeout,
//!   decodes each datagram and hands it to a handler;
//! - the **sender** drains a [`SendQueue`] and, between datagrams, calls a
//!   periodic housekeeping hook.
//!
//! On each read timeout the receiver checks the `running` flag, so clearing
//! it stops both threads within one timeout.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use iowrap_core::protocol::{decode_message, encode_message, AgentMessage, ProtocolError};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Read timeout applied to the socket.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest datagram the receiver accepts.
const RECV_BUFFER_SIZE: usize = 65_536;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The UDP socket could not be bound.
    #[error("failed to bind agent socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A transport thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to send to {peer}: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The socket operations the transport needs.
///
/// Implemented by [`UdpSocket`]; tests use the in-memory socket in
/// [`super::mock`].
pub trait DatagramSocket: Send + Sync + 'static {
    fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> io::Result<usize>;

    /// Blocks for at most the configured read timeout.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, bytes, peer)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }
}

/// Binds the agent socket on `addr` with [`READ_TIMEOUT`] applied.
///
/// # Errors
///
/// Returns [`TransportError::BindFailed`] if the socket cannot be bound.
pub fn bind_udp(addr: SocketAddr) -> Result<UdpSocket, TransportError> {
    let socket = UdpSocket::bind(addr).map_err(|source| TransportError::BindFailed { addr, source })?;
    if let Err(e) = socket.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!("could not set read timeout on {addr}: {e}");
    }
    info!("agent socket listening on UDP {addr}");
    Ok(socket)
}

/// Encodes `message` and sends it to `peer` immediately.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] if encoding fails or
/// [`TransportError::Send`] if the socket refuses the datagram.
pub fn send_message<S: DatagramSocket + ?Sized>(
    socket: &S,
    peer: SocketAddr,
    message: &AgentMessage,
) -> Result<(), TransportError> {
    let bytes = encode_message(message)?;
    socket
        .send_to(&bytes, peer)
        .map_err(|source| TransportError::Send { peer, source })?;
    trace!(%peer, kind = ?message.message_type(), "datagram sent");
    Ok(())
}

// ── Send queue ────────────────────────────────────────────────────────────────

/// A datagram waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub peer: SocketAddr,
    pub message: AgentMessage,
}

#[derive(Default)]
struct QueueInner {
    control: VecDeque<Outgoing>,
    telemetry: VecDeque<Outgoing>,
    closed: bool,
}

/// Two-lane outgoing queue: control messages always leave before telemetry.
#[derive(Default)]
pub struct SendQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `message` for `peer`.  Ignored once the queue is closed.
    pub fn push(&self, peer: SocketAddr, message: AgentMessage) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        let item = Outgoing { peer, message };
        if item.message.is_telemetry() {
            inner.telemetry.push_back(item);
        } else {
            inner.control.push_back(item);
        }
        drop(inner);
        self.ready.notify_one();
    }

    /// Takes the next message without waiting.
    pub fn try_pop(&self) -> Option<Outgoing> {
        let mut inner = self.lock();
        inner.control.pop_front().or_else(|| inner.telemetry.pop_front())
    }

    /// Waits up to `timeout` for the next message.
    ///
    /// Returns `None` on timeout or once the queue is closed and empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Outgoing> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.control.pop_front().or_else(|| inner.telemetry.pop_front()) {
                return Some(item);
            }
            let now = Instant::now();
            if inner.closed || now >= deadline {
                return None;
            }
            inner = self
                .ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Rejects further pushes and wakes any waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.control.len() + inner.telemetry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Transport threads ─────────────────────────────────────────────────────────

/// Spawns the receive thread.
///
/// `handler` is called for every datagram that decodes.  Undecodable
/// datagrams are logged and dropped.
///
/// # Errors
///
/// Returns [`TransportError::Spawn`] if the thread cannot be started.
pub fn start_receiver<S, H>(
    socket: Arc<S>,
    running: Arc<AtomicBool>,
    mut handler: H,
) -> Result<JoinHandle<()>, TransportError>
where
    S: DatagramSocket + ?Sized,
    H: FnMut(AgentMessage, SocketAddr) + Send + 'static,
{
    std::thread::Builder::new()
        .name("iowrap-udp-recv".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            while running.load(Ordering::Relaxed) {
                let (len, src) = match socket.recv_from(&mut buf) {
                    Ok(pair) => pair,
                    Err(e) if is_timeout_error(&e) => continue,
                    Err(e) => {
                        error!("agent socket recv error: {e}");
                        // Avoid spinning on a persistently failing socket.
                        std::thread::sleep(READ_TIMEOUT);
                        continue;
                    }
                };
                match decode_message(&buf[..len]) {
                    Ok((message, _)) => handler(message, src),
                    Err(e) => debug!("failed to decode datagram from {src}: {e}"),
                }
            }
            info!("agent receiver stopped");
        })
        .map_err(|source| TransportError::Spawn {
            name: "receiver",
            source,
        })
}

/// Spawns the send thread.
///
/// Messages are sent in queue order.  `housekeeping` runs at least once per
/// `tick`, between datagrams.
///
/// # Errors
///
/// Returns [`TransportError::Spawn`] if the thread cannot be started.
pub fn start_sender<S, F>(
    socket: Arc<S>,
    queue: Arc<SendQueue>,
    running: Arc<AtomicBool>,
    tick: Duration,
    mut housekeeping: F,
) -> Result<JoinHandle<()>, TransportError>
where
    S: DatagramSocket + ?Sized,
    F: FnMut() + Send + 'static,
{
    std::thread::Builder::new()
        .name("iowrap-udp-send".to_string())
        .spawn(move || {
            let mut next_tick = Instant::now() + tick;
            while running.load(Ordering::Relaxed) {
                let wait = next_tick.saturating_duration_since(Instant::now());
                if let Some(item) = queue.pop_timeout(wait) {
                    if let Err(e) = send_message(socket.as_ref(), item.peer, &item.message) {
                        warn!("dropping datagram: {e}");
                    }
                }
                if Instant::now() >= next_tick {
                    housekeeping();
                    next_tick = Instant::now() + tick;
                }
            }
            info!("agent sender stopped");
        })
        .map_err(|source| TransportError::Spawn {
            name: "sender",
            source,
        })
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::mock::MockSocket;
    use iowrap_core::protocol::messages::IoValues;

    fn peer() -> SocketAddr {
        "192.168.1.40:8090".parse().unwrap()
    }

    fn telemetry() -> AgentMessage {
        AgentMessage::Output {
            hostname: "host".to_string(),
            values: IoValues::default(),
        }
    }

    #[test]
    fn test_is_timeout_error_recognises_timed_out_and_would_block() {
        assert!(is_timeout_error(&io::Error::new(io::ErrorKind::TimedOut, "timed out")));
        assert!(is_timeout_error(&io::Error::new(io::ErrorKind::WouldBlock, "would block")));
    }

    #[test]
    fn test_is_timeout_error_returns_false_for_other_errors() {
        assert!(!is_timeout_error(&io::Error::new(io::ErrorKind::ConnectionRefused, "refused")));
    }

    #[test]
    fn test_control_messages_leave_before_telemetry() {
        // Arrange
        let queue = SendQueue::new();
        queue.push(peer(), telemetry());
        queue.push(peer(), AgentMessage::Subscribe { hostname: "host".to_string() });
        queue.push(peer(), telemetry());
        queue.push(peer(), AgentMessage::DescriptorRequest { hostname: "host".to_string() });

        // Act
        let order: Vec<bool> = std::iter::from_fn(|| queue.try_pop())
            .map(|o| o.message.is_telemetry())
            .collect();

        // Assert
        assert_eq!(order, vec![false, false, true, true]);
    }

    #[test]
    fn test_control_order_is_preserved_within_lane() {
        let queue = SendQueue::new();
        queue.push(peer(), AgentMessage::Subscribe { hostname: "a".to_string() });
        queue.push(peer(), AgentMessage::Unsubscribe { hostname: "a".to_string() });

        let first = queue.try_pop().unwrap();
        let second = queue.try_pop().unwrap();

        assert!(matches!(first.message, AgentMessage::Subscribe { .. }));
        assert!(matches!(second.message, AgentMessage::Unsubscribe { .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_timeout_returns_none_when_empty() {
        let queue = SendQueue::new();

        let start = Instant::now();
        let item = queue.pop_timeout(Duration::from_millis(20));

        assert!(item.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_closed_queue_ignores_pushes() {
        let queue = SendQueue::new();
        queue.close();

        queue.push(peer(), telemetry());

        assert!(queue.is_empty());
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_bind_udp_on_ephemeral_port_succeeds() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap()).expect("bind");

        assert_eq!(socket.read_timeout().unwrap(), Some(READ_TIMEOUT));
    }

    #[test]
    fn test_receiver_hands_decoded_messages_to_handler() {
        // Arrange
        let socket = Arc::new(MockSocket::new());
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = start_receiver(Arc::clone(&socket), Arc::clone(&running), move |msg, src| {
            tx.send((msg, src)).ok();
        })
        .unwrap();

        // Act
        socket.deliver_raw(vec![0xEE, 0, 0, 0, 0], peer());
        socket.deliver(&AgentMessage::HeartbeatRequest { hostname: "esp".to_string() }, peer());

        // Assert
        let (msg, src) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(msg, AgentMessage::HeartbeatRequest { hostname: "esp".to_string() });
        assert_eq!(src, peer());
        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_sender_drains_queue_and_runs_housekeeping() {
        // Arrange
        let socket = Arc::new(MockSocket::new());
        let queue = Arc::new(SendQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticks_hook = Arc::clone(&ticks);
        let handle = start_sender(
            Arc::clone(&socket),
            Arc::clone(&queue),
            Arc::clone(&running),
            Duration::from_millis(5),
            move || {
                ticks_hook.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        // Act
        queue.push(peer(), AgentMessage::BindStart { hostname: "h".to_string() });
        let deadline = Instant::now() + Duration::from_secs(2);
        while socket.sent_messages().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Relaxed);
        queue.close();
        handle.join().unwrap();

        // Assert
        assert_eq!(socket.sent_messages().len(), 1);
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }
}
