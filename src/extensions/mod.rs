//! Extension framework (RFC 6455 Section 9).
//!
//! An [`ExtensionRegistry`] is configured once per endpoint and holds
//! factories. Each upgrade negotiates against it and produces an
//! [`ExtensionChain`]: fresh extension instances in negotiated order,
//! immutable for the life of the connection. Incoming frames pass through
//! the chain front to back, outgoing frames back to front.
//!
//! ```rust,ignore
//! use wsengine::extensions::ExtensionRegistry;
//!
//! let mut registry = ExtensionRegistry::new();
//! registry.register(|_role| Box::new(MyExtension::default()))?;
//!
//! // server side
//! let offers = ExtensionOffer::parse_header("x-my-ext; level=3")?;
//! let (chain, accepted) = registry.negotiate(&offers);
//! ```

#[cfg(feature = "compression")]
pub mod deflate;

use std::fmt;

use tracing::debug;

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::Frame;

const SEPARATORS: &str = "()<>@,;:\\\"/[]?={} \t";

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic() && !SEPARATORS.contains(c))
}

/// Split on `sep` outside double quotes.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        if c == '"' {
            quoted = !quoted;
        } else if c == sep && !quoted {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

/// A single extension parameter: `name` or `name=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    pub name: String,
    /// `None` for flag parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse `param`, `param=value` or `param="value"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the name or an unquoted value
    /// is not an HTTP token.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some((name, value)) = s.split_once('=') else {
            if !is_token(s) {
                return Err(Error::InvalidExtension(format!("invalid parameter: {s:?}")));
            }
            return Ok(Self::flag(s));
        };

        let name = name.trim();
        let value = value.trim();
        if !is_token(name) {
            return Err(Error::InvalidExtension(format!("invalid parameter name: {name:?}")));
        }
        let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
            Some(inner) => inner,
            None if is_token(value) => value,
            None => {
                return Err(Error::InvalidExtension(format!(
                    "invalid value for {name}: {value:?}"
                )));
            }
        };
        Ok(Self::new(name, value))
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) if is_token(v) => write!(f, "{}={}", self.name, v),
            Some(v) => write!(f, "{}=\"{}\"", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// One element of a `Sec-WebSocket-Extensions` header.
///
/// For example: `permessage-deflate; client_max_window_bits=15`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    pub name: String,
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse `extension-name; param1=value1; param2`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for an empty or malformed name or
    /// any malformed parameter.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = split_unquoted(s, ';').into_iter();
        let name = parts.next().unwrap_or_default().trim();
        if !is_token(name) {
            return Err(Error::InvalidExtension(format!("invalid extension name: {name:?}")));
        }
        let params = parts.map(ExtensionParam::parse).collect::<Result<Vec<_>>>()?;
        Ok(Self::with_params(name, params))
    }

    /// Parse a full header value. Empty list elements are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if any element is malformed.
    pub fn parse_header(header: &str) -> Result<Vec<Self>> {
        split_unquoted(header, ',')
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    pub fn get_param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for param in &self.params {
            write!(f, "; {param}")?;
        }
        Ok(())
    }
}

/// Join offers into a `Sec-WebSocket-Extensions` header value.
#[must_use]
pub fn format_header(offers: &[ExtensionOffer]) -> String {
    offers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reserved header bits an extension gives meaning to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsvBits {
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
}

impl RsvBits {
    pub const NONE: Self = Self {
        rsv1: false,
        rsv2: false,
        rsv3: false,
    };

    /// RSV1 only, as used by permessage-deflate.
    pub const RSV1: Self = Self {
        rsv1: true,
        rsv2: false,
        rsv3: false,
    };

    #[must_use]
    pub fn conflicts_with(&self, other: &RsvBits) -> bool {
        (self.rsv1 && other.rsv1) || (self.rsv2 && other.rsv2) || (self.rsv3 && other.rsv3)
    }

    #[must_use]
    pub fn union(&self, other: &RsvBits) -> RsvBits {
        RsvBits {
            rsv1: self.rsv1 || other.rsv1,
            rsv2: self.rsv2 || other.rsv2,
            rsv3: self.rsv3 || other.rsv3,
        }
    }

    /// Every bit set in `used` is also set here.
    #[must_use]
    pub fn covers(&self, used: &RsvBits) -> bool {
        (!used.rsv1 || self.rsv1) && (!used.rsv2 || self.rsv2) && (!used.rsv3 || self.rsv3)
    }
}

/// A negotiated frame transformation.
///
/// One instance serves exactly one connection, so implementations are free
/// to keep per-connection state such as compression contexts.
pub trait Extension: Send {
    /// Registered name, as it appears in `Sec-WebSocket-Extensions`.
    fn name(&self) -> &str;

    /// Reserved bits this extension may set on frames.
    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Server side: accept a client offer, returning the response
    /// parameters, or reject it with an error.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidExtension`] to decline the offer.
    fn negotiate(&mut self, params: &[ExtensionParam]) -> Result<Vec<ExtensionParam>>;

    /// Client side: apply the parameters the server accepted.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidExtension`] if the response is unacceptable, which
    /// fails the handshake.
    fn configure(&mut self, _params: &[ExtensionParam]) -> Result<()> {
        Ok(())
    }

    /// Client side: parameters to put in the offer.
    fn offer_params(&self) -> Vec<ExtensionParam> {
        Vec::new()
    }

    /// Transform a frame read from the peer.
    ///
    /// # Errors
    ///
    /// Any error fails the connection.
    fn incoming(&mut self, frame: Frame) -> Result<Frame>;

    /// Transform a frame about to be written.
    ///
    /// # Errors
    ///
    /// Any error fails the send.
    fn outgoing(&mut self, frame: Frame) -> Result<Frame>;
}

type Factory = Box<dyn Fn(Role) -> Box<dyn Extension> + Send + Sync>;

struct Registered {
    name: String,
    rsv_bits: RsvBits,
    factory: Factory,
}

/// Extensions an endpoint supports, in preference order.
#[derive(Default)]
pub struct ExtensionRegistry {
    entries: Vec<Registered>,
    used_rsv_bits: RsvBits,
}

impl ExtensionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory producing one extension instance per connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the name is already registered
    /// or its RSV bits collide with a registered extension.
    pub fn register<F>(&mut self, factory: F) -> Result<()>
    where
        F: Fn(Role) -> Box<dyn Extension> + Send + Sync + 'static,
    {
        let probe = factory(Role::Server);
        let name = probe.name().to_string();
        let rsv_bits = probe.rsv_bits();

        if self.entries.iter().any(|e| e.name == name) {
            return Err(Error::InvalidExtension(format!(
                "extension '{name}' is already registered"
            )));
        }
        if self.used_rsv_bits.conflicts_with(&rsv_bits) {
            return Err(Error::InvalidExtension(format!(
                "extension '{name}' RSV bits conflict with registered extensions"
            )));
        }

        self.used_rsv_bits = self.used_rsv_bits.union(&rsv_bits);
        self.entries.push(Registered {
            name,
            rsv_bits,
            factory: Box::new(factory),
        });
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    fn find(&self, name: &str) -> Option<&Registered> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Client side: the offers for the upgrade request.
    #[must_use]
    pub fn offers(&self) -> Vec<ExtensionOffer> {
        self.entries
            .iter()
            .map(|e| ExtensionOffer::with_params(&e.name, (e.factory)(Role::Client).offer_params()))
            .collect()
    }

    /// Server side: negotiate the client's offers in the order given.
    ///
    /// An offer for an unknown extension, a repeated offer for one already
    /// accepted, or an offer the extension declines is skipped. Returns the
    /// chain and the response parameters for each accepted extension.
    #[must_use]
    pub fn negotiate(&self, offers: &[ExtensionOffer]) -> (ExtensionChain, Vec<ExtensionOffer>) {
        let mut chain = ExtensionChain::default();
        let mut accepted = Vec::new();

        for offer in offers {
            let Some(entry) = self.find(&offer.name) else {
                debug!(extension = %offer.name, "ignoring unsupported extension offer");
                continue;
            };
            if chain.contains(&entry.name) {
                continue;
            }

            let mut extension = (entry.factory)(Role::Server);
            match extension.negotiate(&offer.params) {
                Ok(params) => {
                    debug!(extension = %entry.name, "extension accepted");
                    chain.push(extension, entry.rsv_bits);
                    accepted.push(ExtensionOffer::with_params(&entry.name, params));
                }
                Err(err) => {
                    debug!(extension = %entry.name, error = %err, "extension offer declined");
                }
            }
        }

        (chain, accepted)
    }

    /// Client side: build the chain from the server's response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the server accepted an
    /// extension that was not offered, accepted one twice, or the extension
    /// rejects the response parameters.
    pub fn configure(&self, responses: &[ExtensionOffer]) -> Result<ExtensionChain> {
        let mut chain = ExtensionChain::default();

        for response in responses {
            let entry = self.find(&response.name).ok_or_else(|| {
                Error::InvalidExtension(format!(
                    "server accepted extension '{}' that was not offered",
                    response.name
                ))
            })?;
            if chain.contains(&entry.name) {
                return Err(Error::InvalidExtension(format!(
                    "server accepted extension '{}' twice",
                    entry.name
                )));
            }

            let mut extension = (entry.factory)(Role::Client);
            extension.configure(&response.params)?;
            chain.push(extension, entry.rsv_bits);
        }

        Ok(chain)
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.names().collect::<Vec<_>>())
            .field("used_rsv_bits", &self.used_rsv_bits)
            .finish()
    }
}

/// The negotiated extensions of one connection.
///
/// Built once during the upgrade and never reordered; an empty chain passes
/// frames through untouched.
#[derive(Default)]
pub struct ExtensionChain {
    extensions: Vec<Box<dyn Extension>>,
    rsv_bits: RsvBits,
}

impl ExtensionChain {
    /// Build a chain from already negotiated extensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if two extensions claim the same
    /// reserved bit.
    pub fn new(extensions: Vec<Box<dyn Extension>>) -> Result<Self> {
        let mut chain = Self::default();
        for extension in extensions {
            let bits = extension.rsv_bits();
            if chain.rsv_bits.conflicts_with(&bits) {
                return Err(Error::InvalidExtension(format!(
                    "extension '{}' RSV bits conflict with the chain",
                    extension.name()
                )));
            }
            chain.push(extension, bits);
        }
        Ok(chain)
    }

    fn push(&mut self, extension: Box<dyn Extension>, bits: RsvBits) {
        self.rsv_bits = self.rsv_bits.union(&bits);
        self.extensions.push(extension);
    }

    fn contains(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e.name() == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(|e| e.name())
    }

    /// Reserved bits incoming frames may carry.
    #[must_use]
    pub fn rsv_bits(&self) -> RsvBits {
        self.rsv_bits
    }

    /// Run a frame read from the peer through the chain in negotiated order.
    ///
    /// # Errors
    ///
    /// The first error any extension reports.
    pub fn incoming(&mut self, frame: Frame) -> Result<Frame> {
        self.extensions
            .iter_mut()
            .try_fold(frame, |frame, ext| ext.incoming(frame))
    }

    /// Run a frame about to be written through the chain in reverse order.
    ///
    /// # Errors
    ///
    /// The first error any extension reports.
    pub fn outgoing(&mut self, frame: Frame) -> Result<Frame> {
        self.extensions
            .iter_mut()
            .rev()
            .try_fold(frame, |frame, ext| ext.outgoing(frame))
    }
}

impl fmt::Debug for ExtensionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionChain")
            .field("extensions", &self.names().collect::<Vec<_>>())
            .field("rsv_bits", &self.rsv_bits)
            .finish()
    }
}
