//! In-memory datagram socket.
//!
//! Tests deliver datagrams "from" an agent with [`MockSocket::deliver`] and
//! inspect what the host sent with [`MockSocket::sent_messages`].

use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use iowrap_core::protocol::{decode_message, encode_message, AgentMessage};

use super::transport::DatagramSocket;

/// How long `recv_from` blocks before reporting a timeout.
const MOCK_READ_TIMEOUT: Duration = Duration::from_millis(20);

pub struct MockSocket {
    inbound_tx: Mutex<Sender<(Vec<u8>, SocketAddr)>>,
    inbound_rx: Mutex<Receiver<(Vec<u8>, SocketAddr)>>,
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl MockSocket {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            inbound_tx: Mutex::new(tx),
            inbound_rx: Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues an encoded message as if `from` had sent it.
    pub fn deliver(&self, message: &AgentMessage, from: SocketAddr) {
        if let Ok(bytes) = encode_message(message) {
            self.deliver_raw(bytes, from);
        }
    }

    pub fn deliver_raw(&self, bytes: Vec<u8>, from: SocketAddr) {
        let tx = self.inbound_tx.lock().unwrap_or_else(PoisonError::into_inner);
        tx.send((bytes, from)).ok();
    }

    /// Every datagram sent so far that decodes, in send order.
    pub fn sent_messages(&self) -> Vec<(AgentMessage, SocketAddr)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(bytes, peer)| decode_message(bytes).ok().map(|(msg, _)| (msg, *peer)))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for MockSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl DatagramSocket for MockSocket {
    fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> io::Result<usize> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((bytes.to_vec(), peer));
        Ok(bytes.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let rx = self.inbound_rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(MOCK_READ_TIMEOUT) {
            Ok((bytes, from)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok((len, from))
            }
            Err(RecvTimeoutError::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "no datagram")),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recv_times_out_when_nothing_delivered() {
        let socket = MockSocket::new();
        let mut buf = [0u8; 64];

        let err = socket.recv_from(&mut buf).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_sent_datagrams_decode_back() {
        let socket = MockSocket::new();
        let peer: SocketAddr = "10.0.0.2:8090".parse().unwrap();
        let bytes = encode_message(&AgentMessage::Subscribe { hostname: "h".to_string() }).unwrap();

        socket.send_to(&bytes, peer).unwrap();

        assert_eq!(
            socket.sent_messages(),
            vec![(AgentMessage::Subscribe { hostname: "h".to_string() }, peer)]
        );
    }
}
