//! udp.rs
//! Non-blocking UDP event channel with a single connected peer.
//!
//! Handshake:
//! - `$connect` from any address makes it the peer, answered with `$ok`
//! - `$ping` from the peer is answered with `$ok`
//! - `$unconnect` from the peer drops it
//! - datagrams from anyone else are ignored
//!
//! Handshake datagrams are still returned from `poll()`; they are commands and
//! never reach the data file.

use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    thread,
    time::Duration,
};

use log::{info, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::Result;
use crate::recording::remote::{CONNECT, PING, REPLY_OK, UNCONNECT};

const MAX_DATAGRAM: usize = 1024;
const SEND_RETRIES: u32 = 100;

/// The remote side of an event source.
pub trait EventChannel: Send {
    /// Next received payload, `None` if nothing is waiting.
    fn poll(&mut self) -> Result<Option<Vec<u8>>>;
    /// Sends to the peer; false if there is none or sending failed.
    fn send(&mut self, payload: &[u8]) -> bool;
    fn is_connected(&self) -> bool;
    fn close(&mut self) {}
}

pub struct UdpConnection {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpConnection {
    /// Binds a non-blocking socket on all interfaces.
    pub fn bind(port: u16) -> Result<Self> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    pub fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.set_nonblocking(true)?;
        let socket: UdpSocket = socket.into();
        info!("[UDP] listening on {}", socket.local_addr()?);
        Ok(Self { socket, peer: None })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn unconnect_peer(&mut self) {
        if let Some(peer) = self.peer.take() {
            info!("[UDP] peer {} disconnected", peer);
        }
    }
}

impl EventChannel for UdpConnection {
    fn poll(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, sender) = match self.socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = buf[..n].to_vec();

        if data == CONNECT {
            self.peer = Some(sender);
            if self.send(REPLY_OK) {
                info!("[UDP] peer {} connected", sender);
            } else {
                warn!("[UDP] can't reply to {}, connection dropped", sender);
                self.peer = None;
            }
        } else if self.peer != Some(sender) {
            return Ok(None);
        } else if data == PING {
            self.send(REPLY_OK);
        } else if data == UNCONNECT {
            self.unconnect_peer();
        }
        Ok(Some(data))
    }

    fn send(&mut self, payload: &[u8]) -> bool {
        let Some(peer) = self.peer else {
            return false;
        };
        for _ in 0..SEND_RETRIES {
            match self.socket.send_to(payload, peer) {
                Ok(_) => return true,
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(1)),
                Err(e) => {
                    warn!("[UDP] send to {} failed: {}", peer, e);
                    return false;
                }
            }
        }
        false
    }

    fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    fn close(&mut self) {
        if self.peer.is_some() {
            self.send(UNCONNECT);
        }
        self.unconnect_peer();
    }
}
