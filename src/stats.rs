use std::time::Duration;

/// Per-connection counters, taken as a snapshot through [crate::connection::Connection::stats]
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ConnectionStats {
    /// messages admitted to the send window
    pub messages_sent: u64,
    /// messages passed to the message dispatcher
    pub messages_delivered: u64,
    /// datagrams that reached the engine, corrupt ones included
    pub datagrams_received: u64,
    /// ACKs that retired an outstanding packet
    pub acks_received: u64,
    pub retransmissions: u64,
    pub corrupt_dropped: u64,
    /// data packets that were received before, either buffered or already delivered
    pub duplicates: u64,

    /// Round trip time, measured from sending a packet to receiving its ACK. Only packets that
    ///  were never retransmitted are sampled.
    pub latest_rtt: Option<Duration>,
    /// exponentially weighted moving average of the RTT samples, with weight 1/8 for new samples
    pub smoothed_rtt: Option<Duration>,
    pub rtt_samples: u64,
}

impl ConnectionStats {
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        self.smoothed_rtt = Some(match self.smoothed_rtt {
            Some(smoothed) => smoothed * 7 / 8 + sample / 8,
            None => sample,
        });
        self.latest_rtt = Some(sample);
        self.rtt_samples += 1;
    }
}
