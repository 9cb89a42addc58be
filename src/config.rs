use crate::rtt::{RTO_MAX, RTO_MIN};
use crate::segment::SegmentHeader;
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// This is the maximum size of a packet handed to the packet sink, including segment headers.
    ///  Every packet carries at least one segment header, so the payload per segment (MSS) is
    ///  `mtu - 24`.
    ///
    /// The connection does not fragment packets at the IP level, so this must fit into whatever
    ///  the underlying channel can carry: for UDP over Ethernet without optional IP headers this is
    ///  `1500 - 20 - 8 = 1472` for IPV4 and `1500 - 40 - 8 = 1452` for IPV6. The default leaves
    ///  some room for encapsulation.
    pub mtu: usize,

    /// This is the maximum number of *packets* (not bytes) in flight, i.e. sent but not acked
    pub send_window_size: u32,
    /// This is the maximum number of received segments that are buffered for the application.
    ///  A message with `n` fragments can only be delivered if this is at least `n`.
    pub receive_window_size: u32,

    /// If set, the congestion window limits the number of segments in flight in addition to
    ///  the send window and the peer's receive window
    pub congestion_control: bool,
    /// A segment is retransmitted immediately after this many acks for later segments arrived.
    ///  `0` disables fast retransmit.
    pub fast_retransmit_threshold: u32,
    /// Trades bandwidth for latency: no extra delay before the first retransmission, and gentler
    ///  retransmission timeout growth
    pub no_delay: bool,
    /// The connection is considered dead once a single segment was transmitted this many times
    pub max_transmit_count: u32,

    /// lower bound for the retransmission timeout in milliseconds
    pub min_rto: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            mtu: 1400,
            send_window_size: 32,
            receive_window_size: 256,
            congestion_control: true,
            fast_retransmit_threshold: 0,
            no_delay: false,
            max_transmit_count: 20,
            min_rto: RTO_MIN,
        }
    }
}

impl ConnectionConfig {
    /// A preset for interactive traffic: fast retransmit after two skips, no retransmission
    ///  delay, no congestion window
    pub fn low_latency() -> ConnectionConfig {
        ConnectionConfig {
            congestion_control: false,
            fast_retransmit_threshold: 2,
            no_delay: true,
            ..ConnectionConfig::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu <= SegmentHeader::SERIALIZED_LEN {
            bail!("MTU {} leaves no room for payload after the {} byte segment header", self.mtu, SegmentHeader::SERIALIZED_LEN);
        }
        if self.mtu > u32::MAX as usize {
            bail!("MTU {} is too big", self.mtu);
        }
        if self.send_window_size == 0 {
            bail!("send window size must be positive");
        }
        if self.receive_window_size == 0 {
            bail!("receive window size must be positive");
        }
        if self.max_transmit_count == 0 {
            bail!("max transmit count must be positive");
        }
        if self.min_rto > RTO_MAX {
            bail!("minimum RTO {} exceeds the maximum RTO of {}ms", self.min_rto, RTO_MAX);
        }

        Ok(())
    }

    pub fn mss(&self) -> usize {
        self.mtu.saturating_sub(SegmentHeader::SERIALIZED_LEN)
    }
}
