//! Connection lifecycle: `New -> Connected -> Closing -> Closed`.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a connection.
///
/// States only ever move forward in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, upgrade not yet reported to listeners.
    #[default]
    New = 0,
    /// Open for data transfer in both directions.
    Connected = 1,
    /// A close frame has been sent; waiting for the close handshake to finish.
    Closing = 2,
    /// Fully closed. The transport has been released.
    Closed = 3,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::New,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether messages may be sent.
    #[must_use]
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether frames from the peer are still processed.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Closing)
    }

    #[must_use]
    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "NEW"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Closing => write!(f, "CLOSING"),
            ConnectionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Lock-free state cell shared between the reader and any number of
/// senders.
///
/// Transitions either succeed for exactly one caller
/// ([`transition`](Self::transition)) or ratchet forward without ever moving
/// back ([`advance`](Self::advance)).
#[derive(Debug, Default)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to` if the cell currently holds `from`.
    ///
    /// On failure returns the state that was observed instead.
    pub(crate) fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> std::result::Result<(), ConnectionState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// Move forward to `to` unless the cell is already there or beyond.
    /// Returns the previous state.
    pub(crate) fn advance(&self, to: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.fetch_max(to as u8, Ordering::AcqRel))
    }
}
