use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::message_dispatcher::MessageDispatcher;
use crate::packet::Packet;
use crate::seq_nr::SeqNr;
use crate::socket::DatagramSocket;
use crate::stats::ConnectionStats;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// work items for the dispatch task, in the order they are passed to the message dispatcher
enum Dispatch {
    Message(Bytes),
    Error(TransportError),
}

type DispatcherSlot = Arc<RwLock<Option<Arc<dyn MessageDispatcher>>>>;

struct SendWindowEntry {
    /// the encoded packet, re-sent verbatim on retransmission
    datagram: Bytes,
    last_sent: Instant,
    num_retransmissions: u32,
    retransmit_handle: JoinHandle<()>,
}

struct SelectiveRepeatInner {
    config: Arc<ConnectionConfig>,
    /// `None` after the engine was closed
    channel: Option<Arc<dyn DatagramSocket>>,

    /// lowest unacknowledged sequence number, or `next_sequence` if nothing is outstanding
    send_base: SeqNr,
    next_sequence: SeqNr,
    send_window: FxHashMap<SeqNr, SendWindowEntry>,

    /// the sequence number that is delivered next, i.e. everything before it was delivered
    recv_base: SeqNr,
    receive_buffer: FxHashMap<SeqNr, Bytes>,
    dispatch_queue: mpsc::UnboundedSender<Dispatch>,

    stats: ConnectionStats,
}

impl SelectiveRepeatInner {
    async fn send_datagram(&self, datagram: &[u8]) {
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.send_to(datagram, self.config.peer_addr).await {
                warn!("error sending datagram to {:?}: {}", self.config.peer_addr, e);
            }
        }
    }

    async fn send_ack(&self, sequence: SeqNr) {
        trace!("acknowledging packet #{}", sequence);
        let ack = Packet::ack(self.config.connection_id, sequence).encode();
        self.send_datagram(&ack).await;
    }

    /// Retires an acknowledged packet. Returns the number of window slots this freed up, which
    ///  is non-zero only if the ACK moved `send_base`.
    fn on_ack(&mut self, acked: SeqNr) -> u16 {
        let Some(entry) = self.send_window.remove(&acked) else {
            trace!("ACK for packet #{} which is not outstanding - ignoring", acked);
            return 0;
        };
        entry.retransmit_handle.abort();
        self.stats.acks_received += 1;
        if entry.num_retransmissions == 0 {
            // an ACK for a retransmitted packet could belong to any of its transmissions
            self.stats.record_rtt_sample(entry.last_sent.elapsed());
        }

        let old_base = self.send_base;
        let new_base = old_base.to(self.next_sequence)
            .find(|s| self.send_window.contains_key(s))
            .unwrap_or(self.next_sequence);
        self.send_base = new_base;

        trace!("ACK for packet #{} after {} retransmissions, send window now starts at #{}", acked, entry.num_retransmissions, new_base);
        new_base.distance_from(old_base) as u16
    }

    async fn on_data(&mut self, packet: Packet) {
        let sequence = packet.sequence;
        let offset = sequence.distance_from(self.recv_base);

        if offset < 0 {
            debug!("received packet #{} which was delivered before - re-acknowledging", sequence);
            self.stats.duplicates += 1;
            self.send_ack(sequence).await;
            return;
        }
        if offset >= self.config.window_size.into() {
            debug!("received packet #{} outside the receive window starting at #{} - dropping", sequence, self.recv_base);
            return;
        }

        match self.receive_buffer.entry(sequence) {
            Entry::Occupied(_) => {
                debug!("received packet #{} which is buffered already", sequence);
                self.stats.duplicates += 1;
            }
            Entry::Vacant(e) => {
                e.insert(packet.payload);
            }
        }
        self.send_ack(sequence).await;

        self.release_in_order();
    }

    /// passes buffered payloads to the dispatch task for as long as there is no gap
    fn release_in_order(&mut self) {
        while let Some(payload) = self.receive_buffer.remove(&self.recv_base) {
            trace!("releasing packet #{} for dispatch", self.recv_base);
            if self.dispatch_queue.send(Dispatch::Message(payload)).is_err() {
                debug!("dispatch task terminated - discarding packet #{}", self.recv_base);
            }
            self.recv_base = self.recv_base.next();
        }
    }

    /// Returns `false` if the packet is not outstanding any more, i.e. its timer should stop.
    async fn retransmit_if_due(&mut self, sequence: SeqNr, timeout: Duration) -> bool {
        if self.channel.is_none() {
            return false;
        }
        let Some(entry) = self.send_window.get_mut(&sequence) else {
            return false;
        };
        if entry.last_sent.elapsed() < timeout {
            return true;
        }

        entry.last_sent = Instant::now();
        entry.num_retransmissions += 1;
        let num_retransmissions = entry.num_retransmissions;
        let datagram = entry.datagram.clone();
        self.stats.retransmissions += 1;

        debug!("packet #{} was not acknowledged after {:?} - retransmitting (#{})", sequence, timeout, num_retransmissions);
        self.send_datagram(&datagram).await;
        true
    }
}

/// The Selective-Repeat ARQ state machine of a single connection.
///
/// The sender side keeps every packet in a send window until it is acknowledged, and each
///  outstanding packet has its own retransmission timer. The window never spans more than
///  `window_size` sequence numbers starting at the oldest unacknowledged packet, and submitting
///  more suspends the caller until an ACK moves the window forward.
///
/// The receiver side acknowledges every valid data packet individually, buffers packets that
///  arrive ahead of a gap, and passes payloads to the message dispatcher strictly in sequence
///  order.
///
/// All window and buffer state is guarded by a single lock. Messages are passed to the message
///  dispatcher by a separate dispatch task, so a dispatcher that sends on the same connection
///  can suspend without stalling ACK processing.
pub struct SelectiveRepeat {
    config: Arc<ConnectionConfig>,
    inner: Arc<Mutex<SelectiveRepeatInner>>,
    /// one permit per free slot in the send window - FIFO, so suspended senders are admitted in
    ///  the order they arrived
    window_permits: Semaphore,
    message_dispatcher: DispatcherSlot,
    messages_delivered: Arc<AtomicU64>,
}

impl SelectiveRepeat {
    /// This spawns the dispatch task, so it must be called from inside a tokio runtime. The task
    ///  terminates when the engine is dropped.
    pub fn new(config: Arc<ConnectionConfig>, channel: Arc<dyn DatagramSocket>) -> SelectiveRepeat {
        let message_dispatcher: DispatcherSlot = Default::default();
        let messages_delivered: Arc<AtomicU64> = Default::default();
        let (dispatch_queue, dispatch_receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::dispatch_loop(dispatch_receiver, message_dispatcher.clone(), messages_delivered.clone()));

        let inner = SelectiveRepeatInner {
            config: config.clone(),
            channel: Some(channel),
            send_base: SeqNr::ZERO,
            next_sequence: SeqNr::ZERO,
            send_window: FxHashMap::default(),
            recv_base: SeqNr::ZERO,
            receive_buffer: FxHashMap::default(),
            dispatch_queue,
            stats: ConnectionStats::default(),
        };

        SelectiveRepeat {
            window_permits: Semaphore::new(config.window_size.into()),
            config,
            inner: Arc::new(Mutex::new(inner)),
            message_dispatcher,
            messages_delivered,
        }
    }

    /// Registers the consumer of delivered messages, replacing the previous one. Messages that
    ///  become deliverable while no dispatcher is registered are discarded.
    pub async fn set_message_dispatcher(&self, message_dispatcher: Arc<dyn MessageDispatcher>) {
        *self.message_dispatcher.write().await = Some(message_dispatcher);
    }

    /// Sends a message reliably, suspending while the send window is full. The message counts
    ///  as sent once it is in the send window - this returns before it is acknowledged.
    pub async fn submit(&self, payload: &[u8]) -> Result<SeqNr, TransportError> {
        let max = self.config.max_payload_len();
        if payload.len() > max {
            return Err(TransportError::MessageTooLarge { len: payload.len(), max });
        }

        let permit = self.window_permits.acquire().await
            .map_err(|_| TransportError::ConnectionClosed)?;

        let mut inner = self.inner.lock().await;
        if inner.channel.is_none() {
            return Err(TransportError::ConnectionClosed);
        }

        let sequence = inner.next_sequence;
        debug_assert!(sequence.distance_from(inner.send_base) < self.config.window_size.into());

        let datagram = Packet::data(self.config.connection_id, sequence, Bytes::copy_from_slice(payload)).encode();
        let retransmit_handle = tokio::spawn(Self::retransmit_loop(
            Arc::downgrade(&self.inner),
            sequence,
            self.config.retransmission_timeout,
        ));

        // no await until the permit is forgotten: once this future can be dropped, the packet
        //  is outstanding and its ACK returns the permit
        inner.send_window.insert(sequence, SendWindowEntry {
            datagram: datagram.clone(),
            last_sent: Instant::now(),
            num_retransmissions: 0,
            retransmit_handle,
        });
        inner.next_sequence = sequence.next();
        inner.stats.messages_sent += 1;
        permit.forget();

        trace!("sending packet #{} with {} bytes payload", sequence, payload.len());
        inner.send_datagram(&datagram).await;

        Ok(sequence)
    }

    /// Handles a raw datagram from the peer: ACKs retire outstanding packets, data packets are
    ///  acknowledged and buffered, and everything that is in sequence is dispatched. Corrupt
    ///  datagrams are dropped without a response.
    pub async fn on_datagram(&self, datagram: &[u8]) {
        let mut inner = self.inner.lock().await;
        inner.stats.datagrams_received += 1;

        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping corrupt datagram: {}", e);
                inner.stats.corrupt_dropped += 1;
                return;
            }
        };
        trace!("received {:?}", packet);

        if packet.is_ack() {
            let freed = inner.on_ack(packet.ack);
            if freed > 0 {
                self.window_permits.add_permits(freed.into());
            }
            return;
        }

        inner.on_data(packet).await;
    }

    /// Stops all retransmission timers and releases the channel. Pending and future calls to
    ///  `submit` fail with [TransportError::ConnectionClosed].
    pub async fn close(&self) {
        self.window_permits.close();

        let mut inner = self.inner.lock().await;
        if inner.channel.take().is_none() {
            return;
        }
        for (_, entry) in inner.send_window.drain() {
            entry.retransmit_handle.abort();
        }
        debug!("closed engine with send window at #{} and receive window at #{}", inner.send_base, inner.recv_base);
    }

    /// Closes the engine because of a fatal error. The message dispatcher is notified after all
    ///  messages that were released before.
    pub async fn fail(&self, error: TransportError) {
        self.close().await;

        if self.inner.lock().await.dispatch_queue.send(Dispatch::Error(error)).is_err() {
            debug!("dispatch task terminated - not reporting error");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.window_permits.is_closed()
    }

    pub async fn stats(&self) -> ConnectionStats {
        let mut stats = self.inner.lock().await.stats;
        stats.messages_delivered = self.messages_delivered.load(Ordering::Relaxed);
        stats
    }

    /// Passes released messages to the message dispatcher that is registered at the time. This
    ///  runs until the engine (and with it the sending end of the queue) is dropped.
    async fn dispatch_loop(mut dispatch_receiver: mpsc::UnboundedReceiver<Dispatch>, message_dispatcher: DispatcherSlot, messages_delivered: Arc<AtomicU64>) {
        while let Some(item) = dispatch_receiver.recv().await {
            let Some(message_dispatcher) = message_dispatcher.read().await.clone() else {
                debug!("no message dispatcher registered - discarding");
                continue;
            };

            match item {
                Dispatch::Message(payload) => {
                    messages_delivered.fetch_add(1, Ordering::Relaxed);
                    message_dispatcher.on_message(&payload).await;
                }
                Dispatch::Error(error) => message_dispatcher.on_error(&error).await,
            }
        }
        trace!("dispatch queue closed - terminating dispatch task");
    }

    /// Retransmission timer for a single packet. It holds only a weak reference so that it can
    ///  not keep a dropped engine alive.
    async fn retransmit_loop(inner: Weak<Mutex<SelectiveRepeatInner>>, sequence: SeqNr, timeout: Duration) {
        let mut ticks = time::interval((timeout / 2).max(Duration::from_millis(1)));
        // the first tick completes immediately
        ticks.tick().await;

        loop {
            ticks.tick().await;

            let Some(strong_inner) = inner.upgrade() else {
                return;
            };
            let mut locked = strong_inner.lock().await;
            if !locked.retransmit_if_due(sequence, timeout).await {
                return;
            }
        }
    }
}
