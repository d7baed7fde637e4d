//! Configuration and limits for WebSocket connections.

use std::time::Duration;

use crate::error::{Error, Result};

/// Resource limits applied to incoming data.
///
/// These bound memory use per connection so a slow or hostile peer cannot
/// force unbounded buffering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single frame in bytes.
    ///
    /// Default: 16 MB
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum number of frames in a single message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,

    /// Maximum size of the HTTP upgrade request or response.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Limits for memory-constrained deployments: 64 KB frames, 256 KB
    /// messages, 16 fragments, 4 KB handshakes.
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_fragment_count: 16,
            max_handshake_size: 4096,
        }
    }

    /// Effectively unlimited. Only for trusted peers.
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            max_frame_size: usize::MAX,
            max_message_size: usize::MAX,
            max_fragment_count: usize::MAX,
            max_handshake_size: 64 * 1024,
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`] if `count` exceeds the maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeouts enforced by the async driver and the upgrade helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed for the HTTP upgrade exchange.
    ///
    /// Default: 30 seconds
    pub handshake: Duration,

    /// Time a locally initiated close waits for the peer's close frame
    /// before the transport is released anyway.
    ///
    /// Default: 5 seconds
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            close: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn new(handshake: Duration, close: Duration) -> Self {
        Self { handshake, close }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Outgoing whole messages larger than this are split into
    /// continuation frames.
    ///
    /// Default: 16 KB
    pub fragment_size: usize,

    /// Deliver incoming data frames as partial fragments instead of
    /// buffering complete messages.
    ///
    /// Default: false
    pub streaming: bool,

    /// Accept unmasked frames from clients (server only). Violates RFC 6455;
    /// intended for testing against broken peers.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Read buffer capacity used by the async driver.
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,

    /// Driver and handshake timeouts.
    pub timeouts: Timeouts,

    /// Allowed `Origin` values. `None` disables origin checking.
    ///
    /// Default: None
    pub allowed_origins: Option<Vec<String>>,

    /// Subprotocols this endpoint supports, used both for server-side
    /// selection and for the client's offer.
    ///
    /// Default: empty
    pub subprotocols: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            streaming: false,
            accept_unmasked_frames: false,
            read_buffer_size: 8192,
            timeouts: Timeouts::default(),
            allowed_origins: None,
            subprotocols: Vec::new(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for the server side of a connection.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Configuration for the client side of a connection.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Enable or disable streaming delivery of incoming fragments.
    #[must_use]
    pub const fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Only accept upgrades whose `Origin` matches one of these values.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Some(origins);
        self
    }

    /// Supported subprotocols in preference order.
    #[must_use]
    pub fn with_subprotocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = protocols.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(limits.max_message_size, 64 * 1024 * 1024);
        assert_eq!(limits.max_fragment_count, 128);
        assert_eq!(limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_limits_checks() {
        let limits = Limits::new(10, 20, 2, 30);
        assert!(limits.check_frame_size(10).is_ok());
        assert_eq!(
            limits.check_frame_size(11),
            Err(Error::FrameTooLarge { size: 11, max: 10 })
        );
        assert!(limits.check_message_size(20).is_ok());
        assert!(matches!(
            limits.check_message_size(21),
            Err(Error::MessageTooLarge { size: 21, max: 20 })
        ));
        assert!(matches!(
            limits.check_fragment_count(3),
            Err(Error::TooManyFragments { count: 3, max: 2 })
        ));
        assert!(matches!(
            limits.check_handshake_size(31),
            Err(Error::HandshakeTooLarge { .. })
        ));
    }

    #[test]
    fn test_unrestricted_never_trips_size_checks() {
        let limits = Limits::unrestricted();
        assert!(limits.check_message_size(usize::MAX).is_ok());
        assert!(limits.check_frame_size(usize::MAX).is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = Config::server()
            .with_fragment_size(1024)
            .with_streaming(true)
            .with_subprotocols(["chat", "superchat"])
            .with_allowed_origins(vec!["https://example.com".into()])
            .with_timeouts(Timeouts::new(
                Duration::from_secs(1),
                Duration::from_millis(200),
            ));

        assert_eq!(config.fragment_size, 1024);
        assert!(config.streaming);
        assert_eq!(config.subprotocols, vec!["chat", "superchat"]);
        assert_eq!(
            config.allowed_origins.as_deref(),
            Some(&["https://example.com".to_string()][..])
        );
        assert_eq!(config.timeouts.close, Duration::from_millis(200));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(!config.streaming);
        assert!(!config.accept_unmasked_frames);
        assert_eq!(config.fragment_size, 16 * 1024);
        assert_eq!(config.timeouts, Timeouts::default());
        assert!(config.allowed_origins.is_none());
    }
}
