use crate::config::ConnectionConfig;
use crate::congestion::CongestionControl;
use crate::error::{InputError, MtuError, ReceiveError, SendError};
use crate::output_batch::OutputBatch;
use crate::probe::WindowProbe;
use crate::receive_path::ReceivePath;
use crate::rtt::RttEstimator;
use crate::safe_converter::SafeCast;
use crate::segment::{Command, SegmentHeader};
use crate::send_path::{FlushContext, SendPath};
use crate::sink::PacketSink;
use std::cmp::min;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    Alive,
    /// A segment was transmitted the configured maximum number of times without being acked.
    ///  This is permanent: the connection keeps working mechanically, but the peer must be
    ///  assumed unreachable.
    Dead,
}

/// One end of a conversation, i.e. a reliable ordered message channel to a single peer.
///
/// A connection does no I/O and has no timers of its own. The application
///  * hands outgoing messages to [Connection::send] and polls for incoming ones with
///    [Connection::receive],
///  * feeds every datagram received from the peer to [Connection::input],
///  * and calls [Connection::update] periodically (every 10-100ms, depending on the
///    desired latency) with a monotonic millisecond timestamp. This is where all segments are
///    (re)sent, synchronously through the [PacketSink].
pub struct Connection {
    conversation_id: u32,
    config: ConnectionConfig,

    send: SendPath,
    receive: ReceivePath,
    rtt: RttEstimator,
    congestion: CongestionControl,
    probe: WindowProbe,

    /// free receive window the peer advertised in its most recent segment
    remote_window_size: u32,
    state: ConnectionState,
    /// timestamp of the most recent call to [Connection::update]
    current: u32,

    sink: Arc<dyn PacketSink>,
    output_buf: Vec<u8>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CONN{{{}:{:?} snd={}..{} rcv={} rwnd={} cwnd={} rto={}}}",
               self.conversation_id,
               self.state,
               self.send.una(),
               self.send.next_id(),
               self.receive.next_id(),
               self.remote_window_size,
               self.congestion.cwnd(),
               self.rtt.rto(),
        )
    }
}

impl Connection {
    pub fn new(conversation_id: u32, sink: Arc<dyn PacketSink>) -> Connection {
        Self::create(conversation_id, ConnectionConfig::default(), sink)
    }

    pub fn with_config(conversation_id: u32, config: ConnectionConfig, sink: Arc<dyn PacketSink>) -> anyhow::Result<Connection> {
        config.validate()?;
        Ok(Self::create(conversation_id, config, sink))
    }

    fn create(conversation_id: u32, config: ConnectionConfig, sink: Arc<dyn PacketSink>) -> Connection {
        let mss = Self::mss_for(config.mtu);
        Connection {
            conversation_id,
            send: SendPath::new(),
            receive: ReceivePath::new(config.receive_window_size),
            rtt: RttEstimator::new(config.min_rto),
            congestion: CongestionControl::new(mss),
            probe: WindowProbe::new(),
            // until the peer tells us otherwise, we assume it is configured like us
            remote_window_size: config.receive_window_size,
            state: ConnectionState::Alive,
            current: 0,
            sink,
            output_buf: vec![0; config.mtu],
            config,
        }
    }

    fn mss_for(mtu: usize) -> u32 {
        u32::try_from(mtu.saturating_sub(SegmentHeader::SERIALIZED_LEN)).unwrap_or(u32::MAX)
    }

    pub fn conversation_id(&self) -> u32 {
        self.conversation_id
    }

    pub fn mtu(&self) -> usize {
        self.config.mtu
    }

    /// The maximum payload per segment
    pub fn mss(&self) -> usize {
        self.config.mss()
    }

    pub fn send_window_size(&self) -> u32 {
        self.config.send_window_size
    }

    pub fn receive_window_size(&self) -> u32 {
        self.config.receive_window_size
    }

    pub fn remote_window_size(&self) -> u32 {
        self.remote_window_size
    }

    pub fn rto(&self) -> u32 {
        self.rtt.rto()
    }

    pub fn congestion_window(&self) -> u32 {
        self.congestion.cwnd()
    }

    pub fn slow_start_threshold(&self) -> u32 {
        self.congestion.ssthresh()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == ConnectionState::Dead
    }

    /// The number of segments that were not sent yet or are waiting for an ack
    pub fn pending_send_count(&self) -> usize {
        self.send.pending_count()
    }

    /// Changes the maximum packet size. An MTU of exactly the header size is accepted, but leaves
    ///  no room for payload, so [Connection::send] rejects every message until it is raised again.
    ///
    /// Only messages sent afterwards are fragmented for the new MTU. Segments that were
    ///  fragmented before keep their size, and if the MTU shrinks, each of them goes on the wire
    ///  as a packet of its own that may exceed the new MTU.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), MtuError> {
        if mtu < SegmentHeader::SERIALIZED_LEN {
            return Err(MtuError {
                mtu,
                header_len: SegmentHeader::SERIALIZED_LEN,
            });
        }

        debug!("{:?}: changing MTU from {} to {}", self, self.config.mtu, mtu);
        self.config.mtu = mtu;
        if self.output_buf.len() < mtu {
            self.output_buf.resize(mtu, 0);
        }
        Ok(())
    }

    /// Sets send and receive window sizes in packets. A value of zero leaves the corresponding
    ///  window unchanged.
    pub fn set_window_size(&mut self, send_window_size: u32, receive_window_size: u32) {
        if send_window_size > 0 {
            self.config.send_window_size = send_window_size;
        }
        if receive_window_size > 0 {
            self.config.receive_window_size = receive_window_size;
            self.receive.set_window_size(receive_window_size);
        }
    }

    pub fn set_congestion_control(&mut self, enabled: bool) {
        self.config.congestion_control = enabled;
    }

    /// `0` disables fast retransmit
    pub fn set_fast_retransmit_threshold(&mut self, threshold: u32) {
        self.config.fast_retransmit_threshold = threshold;
    }

    pub fn set_no_delay(&mut self, no_delay: bool) {
        self.config.no_delay = no_delay;
    }

    /// A value of zero is ignored
    pub fn set_max_transmit_count(&mut self, max_transmit_count: u32) {
        if max_transmit_count > 0 {
            self.config.max_transmit_count = max_transmit_count;
        }
    }

    /// Queues a message for sending. It goes on the wire during a later call to
    ///  [Connection::update], as the windows allow.
    pub fn send(&mut self, message: &[u8]) -> Result<(), SendError> {
        let mss = self.config.mss();
        self.send.enqueue_message(message, mss)
            .inspect_err(|e| debug!("{:?}: rejecting message: {}", self, e))?;
        Ok(())
    }

    /// The size of the next complete message, or `None` if there is none yet
    pub fn readable_bytes_size(&self) -> Option<usize> {
        self.receive.readable_size()
    }

    /// Copies the next complete message into `buf` and returns its length
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, ReceiveError> {
        self.receive.receive(buf)
    }

    /// Processes a datagram received from the peer. It may contain several segments; if one of
    ///  them is malformed, the segments before it remain applied and the rest is discarded.
    pub fn input(&mut self, data: &[u8]) -> Result<(), InputError> {
        if data.len() < SegmentHeader::SERIALIZED_LEN {
            warn!("{:?}: dropping input of {} bytes - shorter than a segment header", self, data.len());
            return Err(InputError::TooShort { len: data.len() });
        }

        let una_before = self.send.una();
        let result = self.input_segments(data);

        if self.send.una() > una_before {
            let mss = Self::mss_for(self.config.mtu);
            self.congestion.on_ack_progress(mss, self.remote_window_size);
        }

        if let Err(e) = &result {
            warn!("{:?}: dropping rest of input: {}", self, e);
        }
        result
    }

    fn input_segments(&mut self, data: &[u8]) -> Result<(), InputError> {
        let mut offs = 0;
        while data.len() - offs >= SegmentHeader::SERIALIZED_LEN {
            let header = SegmentHeader::decode(data, offs, self.conversation_id)?;
            offs += SegmentHeader::SERIALIZED_LEN;
            let payload_len: usize = header.payload_len.safe_cast();
            let payload = &data[offs..offs + payload_len];
            offs += payload.len();

            trace!("received {:?}", header);

            let remote_window_size = header.window_hint as u32;
            if remote_window_size != self.remote_window_size {
                debug!("peer's receive window changed from {} to {}", self.remote_window_size, remote_window_size);
                self.remote_window_size = remote_window_size;
            }
            self.send.ack_cumulative(header.cumulative_ack);

            match header.command {
                Command::Ack => {
                    match self.current.checked_sub(header.timestamp) {
                        Some(rtt) => self.rtt.on_sample(rtt),
                        None => trace!("ack echoes a timestamp from the future - no RTT sample"),
                    }
                    self.send.ack_single(header.sequence_number);
                }
                Command::Data => {
                    self.receive.on_data(header, payload);
                }
                Command::AskWindowSize => {
                    self.receive.request_window_tell();
                }
                Command::TellWindowSize => {}
            }
        }

        if offs < data.len() {
            trace!("ignoring {} trailing bytes", data.len() - offs);
        }
        Ok(())
    }

    fn window_hint(&self) -> u16 {
        u16::try_from(self.receive.available_window()).unwrap_or(u16::MAX)
    }

    fn control_header(&self, command: Command, sequence_number: u32, timestamp: u32) -> SegmentHeader {
        SegmentHeader {
            conversation_id: self.conversation_id,
            command,
            fragment_index: 0,
            window_hint: self.window_hint(),
            timestamp,
            sequence_number,
            cumulative_ack: self.receive.next_id(),
            payload_len: 0,
        }
    }

    /// Drives the protocol: sends pending acks and window control segments, moves queued
    ///  segments into flight and (re)transmits whatever is due.
    pub fn update(&mut self, now: u32) {
        self.current = now;

        let mut batch = OutputBatch::new(std::mem::take(&mut self.output_buf), self.config.mtu, self.sink.clone());

        if self.receive.has_pending_acks() {
            let mut ack_header = self.control_header(Command::Ack, 0, 0);
            for (sequence_number, timestamp) in self.receive.drain_pending_acks() {
                ack_header.sequence_number = sequence_number;
                ack_header.timestamp = timestamp;
                batch.push(&ack_header, &[]);
            }
        }

        if self.probe.poll(now, self.remote_window_size) {
            debug!("{:?}: asking for the peer's receive window", self);
            batch.push(&self.control_header(Command::AskWindowSize, 0, now), &[]);
        }

        if self.receive.take_need_tell_window_size() {
            trace!("telling peer our receive window of {}", self.window_hint());
            batch.push(&self.control_header(Command::TellWindowSize, 0, now), &[]);
        }

        let mut window = min(self.config.send_window_size, self.remote_window_size);
        if self.config.congestion_control {
            window = self.congestion.limit(window);
        }
        self.send.move_into_flight(window, self.conversation_id, now, self.receive.next_id());

        let ctx = FlushContext {
            now,
            rto: self.rtt.rto(),
            no_delay: self.config.no_delay,
            fast_retransmit_threshold: self.config.fast_retransmit_threshold,
            window_hint: self.window_hint(),
            cumulative_ack: self.receive.next_id(),
            max_transmit_count: self.config.max_transmit_count,
        };
        let outcome = self.send.flush(&ctx, &mut batch);

        let mss = Self::mss_for(self.config.mtu);
        if outcome.lost {
            self.congestion.on_loss(mss);
        }
        else if outcome.fast_retransmitted {
            self.congestion.on_fast_retransmit(mss, self.send.num_in_flight(), self.config.fast_retransmit_threshold);
        }

        if outcome.reached_max_transmit && self.state == ConnectionState::Alive {
            warn!("{:?}: segment was sent {} times without an ack - connection is dead", self, self.config.max_transmit_count);
            self.state = ConnectionState::Dead;
        }

        self.output_buf = batch.into_buffer();
    }
}
