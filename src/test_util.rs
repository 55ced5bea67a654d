use crate::error::TransportError;
use crate::message_dispatcher::MessageDispatcher;
use crate::packet::Packet;
use crate::socket::DatagramSocket;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// convenience for test code: a localhost address based on a port number
pub fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

/// decides for a packet (and the address it is sent from) whether it should be dropped
pub type DropFilter = Box<dyn FnMut(SocketAddr, &Packet) -> bool + Send>;

#[derive(Clone, Debug)]
pub struct SentDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub datagram: Bytes,
    pub dropped: bool,
}
impl SentDatagram {
    pub fn packet(&self) -> Packet {
        Packet::decode(&self.datagram).unwrap()
    }
}

/// An in-memory stand-in for UDP: datagrams are delivered in the order they are sent, unless a
///  drop filter discards them. Datagrams to addresses without a socket are lost silently.
#[derive(Default)]
pub struct MemoryNetwork {
    routes: Mutex<FxHashMap<SocketAddr, mpsc::UnboundedSender<(Bytes, SocketAddr)>>>,
    drop_filter: Mutex<Option<DropFilter>>,
    sent: Mutex<Vec<SentDatagram>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<MemoryNetwork> {
        Default::default()
    }

    pub fn socket(self: &Arc<Self>, addr: SocketAddr) -> Arc<MemorySocket> {
        let (send, recv) = mpsc::unbounded_channel();
        self.routes.lock().unwrap().insert(addr, send);
        Arc::new(MemorySocket {
            addr,
            network: self.clone(),
            inbox: tokio::sync::Mutex::new(recv),
        })
    }

    pub fn set_drop_filter(&self, filter: impl FnMut(SocketAddr, &Packet) -> bool + Send + 'static) {
        *self.drop_filter.lock().unwrap() = Some(Box::new(filter));
    }

    /// makes the socket bound to `addr` fail on its next receive
    pub fn disconnect(&self, addr: SocketAddr) {
        self.routes.lock().unwrap().remove(&addr);
    }

    /// delivers a raw datagram, bypassing the drop filter and the record of sent datagrams
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, datagram: &[u8]) {
        if let Some(route) = self.routes.lock().unwrap().get(&to) {
            let _ = route.send((Bytes::copy_from_slice(datagram), from));
        }
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.sent.lock().unwrap().clone()
    }

    /// the decoded packets sent from `from`, dropped ones included
    pub fn packets_from(&self, from: SocketAddr) -> Vec<Packet> {
        self.sent().iter()
            .filter(|d| d.from == from)
            .map(|d| d.packet())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn route(&self, from: SocketAddr, to: SocketAddr, datagram: &[u8]) {
        let dropped = match (self.drop_filter.lock().unwrap().as_mut(), Packet::decode(datagram)) {
            (Some(filter), Ok(packet)) => filter(from, &packet),
            _ => false,
        };

        let datagram = Bytes::copy_from_slice(datagram);
        self.sent.lock().unwrap().push(SentDatagram { from, to, datagram: datagram.clone(), dropped });

        if dropped {
            trace!("memory network: dropping datagram from {:?} to {:?}", from, to);
            return;
        }
        if let Some(route) = self.routes.lock().unwrap().get(&to) {
            let _ = route.send((datagram, from));
        }
    }
}

pub struct MemorySocket {
    addr: SocketAddr,
    network: Arc<MemoryNetwork>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
}

#[async_trait]
impl DatagramSocket for MemorySocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<()> {
        self.network.route(self.addr, to, buf);
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.inbox.lock().await.recv().await {
            Some((datagram, from)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, from))
            }
            None => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "memory socket disconnected")),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

#[derive(Default)]
pub struct CollectingMessageDispatcher {
    messages: Mutex<Vec<Vec<u8>>>,
    errors: Mutex<Vec<String>>,
}
impl CollectingMessageDispatcher {
    pub fn new() -> Arc<CollectingMessageDispatcher> {
        Default::default()
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    /// waits (in tokio time) until at least `n` messages were dispatched
    pub async fn wait_for_messages(&self, n: usize, max_wait: Duration) -> Vec<Vec<u8>> {
        let _ = tokio::time::timeout(max_wait, async {
            while self.messages.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }).await;
        self.messages()
    }
}

#[async_trait]
impl MessageDispatcher for CollectingMessageDispatcher {
    async fn on_message(&self, msg_buf: &[u8]) {
        self.messages.lock().unwrap().push(msg_buf.to_vec());
    }

    async fn on_error(&self, error: &TransportError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
