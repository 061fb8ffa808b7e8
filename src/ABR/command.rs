// Rate-change commands on the control channel: one u32 bitrate per datagram.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::debug;

use crate::error::{Error, Result};

/// Bytes in an encoded rate command.
pub const RATE_COMMAND_LEN: usize = 4;

/// Encode `bitrate_bps` as a control datagram (little-endian u32).
pub fn encode_rate(bitrate_bps: u32) -> [u8; RATE_COMMAND_LEN] {
    bitrate_bps.to_le_bytes()
}

/// Decode a control datagram. Shorter than four bytes is not a command;
/// trailing bytes are ignored.
pub fn decode_rate(datagram: &[u8]) -> Option<u32> {
    let bytes: [u8; RATE_COMMAND_LEN] = datagram.get(..RATE_COMMAND_LEN)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Where the client sends rate changes. Fire-and-forget: no acknowledgement,
/// a lost command is corrected by the next one.
pub trait RateCommandSink {
    fn send_rate(&mut self, bitrate_bps: u32) -> Result<()>;
}

impl<F> RateCommandSink for F
where
    F: FnMut(u32) -> Result<()>,
{
    fn send_rate(&mut self, bitrate_bps: u32) -> Result<()> {
        self(bitrate_bps)
    }
}

/// Records every command; for tests and in-process wiring.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub sent: Vec<u32>,
}

impl RateCommandSink for RecordingSink {
    fn send_rate(&mut self, bitrate_bps: u32) -> Result<()> {
        self.sent.push(bitrate_bps);
        Ok(())
    }
}

/// Sends commands as UDP datagrams to the rate controller.
#[derive(Debug)]
pub struct UdpRateSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpRateSender {
    /// Bind an ephemeral local socket and address `target`.
    pub fn connect(target: impl ToSocketAddrs) -> Result<Self> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::config("control channel address resolved to nothing"))?;
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl RateCommandSink for UdpRateSender {
    fn send_rate(&mut self, bitrate_bps: u32) -> Result<()> {
        self.socket.send_to(&encode_rate(bitrate_bps), self.target)?;
        debug!(bitrate_bps, target = %self.target, "sent rate update");
        Ok(())
    }
}
