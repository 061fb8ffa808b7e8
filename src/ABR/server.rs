// Server side of the control channel: apply rate commands to a traffic source.

use std::io;
use std::net::UdpSocket;

use tracing::{debug, info};

use crate::error::Result;
use crate::ABR::command::decode_rate;

/// The sending entity whose rate the controller sets.
pub trait TrafficSource {
    fn set_rate(&mut self, bitrate_bps: u32);
}

impl<F: FnMut(u32)> TrafficSource for F {
    fn set_rate(&mut self, bitrate_bps: u32) {
        self(bitrate_bps)
    }
}

/// Applies each received rate command immediately; no smoothing, no reply.
pub struct RateController<T: TrafficSource> {
    source: T,
    current: Option<u32>,
    applied: u64,
    ignored: u64,
}

impl<T: TrafficSource> RateController<T> {
    pub fn new(source: T) -> Self {
        Self {
            source,
            current: None,
            applied: 0,
            ignored: 0,
        }
    }

    /// Handle one control datagram. Returns the rate applied, if it was a command.
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Option<u32> {
        let Some(bitrate) = decode_rate(datagram) else {
            self.ignored += 1;
            debug!(len = datagram.len(), "ignoring short control datagram");
            return None;
        };
        self.apply(bitrate);
        Some(bitrate)
    }

    /// Apply `bitrate_bps` to the source.
    pub fn apply(&mut self, bitrate_bps: u32) {
        let previous = self.current.replace(bitrate_bps);
        self.source.set_rate(bitrate_bps);
        self.applied += 1;
        info!(bitrate_bps, ?previous, "sending rate updated");
    }

    /// Drain every datagram waiting on a non-blocking `socket`.
    /// Returns how many commands were applied.
    pub fn poll_socket(&mut self, socket: &UdpSocket) -> Result<usize> {
        let mut buf = [0u8; 64];
        let mut handled = 0;
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    debug!(%from, len, "control datagram");
                    if self.handle_datagram(&buf[..len]).is_some() {
                        handled += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(handled),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Last applied rate.
    pub fn current_rate(&self) -> Option<u32> {
        self.current
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    pub fn source(&self) -> &T {
        &self.source
    }
}
