#[cfg(test)] use mockall::automock;
use std::net::UdpSocket;
use tracing::{error, trace};

/// This is the abstraction for handing a wire-ready packet to the underlying unreliable
///  channel. The connection calls it inline from its driver, so implementations must not block
///  indefinitely and must not call back into the connection.
///
/// There is no delivery feedback: a packet that cannot be sent is simply lost, which the
///  protocol handles like any other loss.
#[cfg_attr(test, automock)]
pub trait PacketSink: Send + Sync + 'static {
    fn output(&self, packet: &[u8]);
}

/// A UDP socket that was `connect()`ed to the peer
impl PacketSink for UdpSocket {
    fn output(&self, packet: &[u8]) {
        trace!("UDP socket: sending packet of {} bytes", packet.len());

        if let Err(e) = self.send(packet) {
            error!("error sending UDP packet: {}", e);
        }
    }
}
