//! Error types shared by the exchange protocol, the control loop and the ABR client.

use std::time::Duration;

use thiserror::Error;

/// The primary error type for the simulation bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred (mapping, syscalls, sockets).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Role, layout or registry misconfiguration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The counterpart process went away (or stopped answering) while this
    /// side was blocked on the slot.
    #[error("peer lost on slot {slot} after waiting {waited:?}")]
    PeerLost { slot: usize, waited: Duration },

    /// The finished flag is set; no further exchanges will happen.
    #[error("exchange finished")]
    Finished,

    /// A decision value outside of the configured bounds.
    #[error("invalid action: tier index {index} out of range for {tiers} tiers")]
    InvalidAction { index: u64, tiers: usize },

    /// A tick observed a non-positive elapsed time.
    #[error("clock anomaly: elapsed {elapsed}s")]
    ClockAnomaly { elapsed: f64 },

    /// A handoff call was made out of order or from the wrong side.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// True for the conditions a control loop recovers from by skipping a cycle.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(self, Error::PeerLost { .. } | Error::Finished)
    }
}

/// A specialized `Result` type for this library.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Io(e) => e,
            Error::Configuration(msg) => std::io::Error::new(ErrorKind::InvalidInput, msg),
            Error::PeerLost { .. } => ErrorKind::TimedOut.into(),
            Error::Finished => ErrorKind::BrokenPipe.into(),
            Error::InvalidAction { .. } => ErrorKind::InvalidData.into(),
            Error::ClockAnomaly { .. } => ErrorKind::InvalidData.into(),
            Error::Protocol(msg) => std::io::Error::new(ErrorKind::Other, msg),
        }
    }
}
