//! Endpoint role (client or server).

/// Which side of the connection this endpoint is.
///
/// The role fixes the masking rules of RFC 6455 Section 5.1: clients mask
/// every frame they send, servers never do, and each side rejects frames
/// from the peer that break the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Outgoing frames carry a masking key.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Incoming frames must carry a masking key.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }

    /// The role of the other endpoint.
    #[inline]
    #[must_use]
    pub const fn peer(&self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}
