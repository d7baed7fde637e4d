//! HTTP upgrade handshake (RFC 6455 Section 4).
//!
//! The server side parses the raw request into a [`RequestLine`] and
//! [`Headers`], then [`HandshakeValidator::validate`] decides whether to
//! accept and negotiates subprotocol and extensions. The client side is
//! [`ClientHandshake`]: it writes the request and verifies the response
//! against its own nonce and offers.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extensions::{ExtensionChain, ExtensionOffer, ExtensionRegistry, format_header};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this engine speaks.
pub const WS_VERSION: &str = "13";

/// Headers that must appear at most once in an upgrade request.
const SINGLETON_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Computes the `Sec-WebSocket-Accept` value: Base64(SHA-1(key + GUID)).
///
/// ```
/// use wsengine::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A fresh random `Sec-WebSocket-Key`: 16 bytes, base64 encoded.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the operating system RNG fails.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::Transport(format!("random source unavailable: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Position just past the blank line ending an HTTP head, if present.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedHandshake(msg.into())
}

fn validate_header_value(header: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeaderValue {
            header: header.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// HTTP header list that keeps arrival order and compares names
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header. Values are stored trimmed.
    pub fn append(&mut self, name: impl Into<String>, value: impl AsRef<str>) {
        self.entries
            .push((name.into(), value.as_ref().trim().to_string()));
    }

    /// Builder form of [`append`](Self::append).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.append(name, value);
        self
    }

    /// First value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name` in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` joined as one comma list, the way HTTP
    /// combines repeated list-valued headers.
    #[must_use]
    pub fn get_joined(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self.get_all(name).collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any value of `name` lists `token`, case-insensitively.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(split_list)
            .any(|t| t.eq_ignore_ascii_case(token))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse header lines up to the first empty line.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedHandshake`] for a line without a colon, an empty
    /// name, or folded continuation lines.
    pub fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut headers = Self::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                return Err(malformed("folded header lines are not supported"));
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| malformed(format!("invalid header line: {line:?}")))?;
            let name = name.trim_end();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(malformed(format!("invalid header name: {name:?}")));
            }
            headers.append(name, value);
        }
        Ok(headers)
    }

    fn reject_duplicates(&self, names: &[&str]) -> Result<()> {
        for name in names {
            if self.get_all(name).nth(1).is_some() {
                return Err(malformed(format!("duplicate {name} header")));
            }
        }
        Ok(())
    }
}

/// `GET /path HTTP/1.1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version: version.into(),
        }
    }

    /// # Errors
    ///
    /// [`Error::MalformedHandshake`] unless the line has exactly three parts.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version), None) => {
                Ok(Self::new(method, target, version))
            }
            _ => Err(malformed(format!("invalid request line: {line:?}"))),
        }
    }
}

/// A raw upgrade request, parsed but not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub request_line: RequestLine,
    pub headers: Headers,
}

impl HandshakeRequest {
    /// Parse the request head. Bytes after the blank line are ignored.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedHandshake`] for non-UTF-8 data, a missing or
    /// malformed request line, or malformed headers.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let head = &data[..find_head_end(data).unwrap_or(data.len())];
        let text = std::str::from_utf8(head).map_err(|_| malformed("request is not UTF-8"))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| malformed("empty request"))?;

        Ok(Self {
            request_line: RequestLine::parse(request_line)?,
            headers: Headers::parse_lines(lines)?,
        })
    }

    /// # Errors
    ///
    /// [`Error::HandshakeTooLarge`] if `data` exceeds `max_size`, otherwise
    /// as [`parse`](Self::parse).
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }
}

/// What the server learned from an accepted upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub path: String,
    pub host: String,
    pub key: String,
    pub origin: Option<String>,
    /// Subprotocols the client offered, in its preference order.
    pub protocols: Vec<String>,
    /// Extensions the client offered, in its order.
    pub extensions: Vec<ExtensionOffer>,
    pub headers: Headers,
}

/// The server's `101 Switching Protocols` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub accept: String,
    pub protocol: Option<String>,
    pub extensions: Vec<ExtensionOffer>,
}

impl HandshakeResponse {
    /// Write the response head.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHeaderValue`] if the protocol or an extension
    /// contains CR or LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());

        if let Some(protocol) = &self.protocol {
            validate_header_value("Sec-WebSocket-Protocol", protocol)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {protocol}\r\n").as_bytes());
        }
        if !self.extensions.is_empty() {
            let value = format_header(&self.extensions);
            validate_header_value("Sec-WebSocket-Extensions", &value)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Extensions: {value}\r\n").as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// HTTP status a failed upgrade is answered with.
    #[must_use]
    pub fn rejection_status(err: &Error) -> u16 {
        match err {
            Error::OriginNotAllowed { .. } => 403,
            Error::UnsupportedVersion(_) => 426,
            Error::HandshakeTooLarge { .. } => 431,
            _ => 400,
        }
    }

    /// Write a plain-text error response for a rejected upgrade.
    ///
    /// A 426 carries `Sec-WebSocket-Version: 13` so the client can retry.
    pub fn write_rejection(status: u16, reason: &str, buf: &mut Vec<u8>) {
        let phrase = match status {
            403 => "Forbidden",
            426 => "Upgrade Required",
            431 => "Request Header Fields Too Large",
            _ => "Bad Request",
        };
        let body: String = reason.chars().filter(|c| !c.is_control()).collect();

        buf.extend_from_slice(format!("HTTP/1.1 {status} {phrase}\r\n").as_bytes());
        if status == 426 {
            buf.extend_from_slice(format!("Sec-WebSocket-Version: {WS_VERSION}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"Connection: close\r\n");
        buf.extend_from_slice(b"Content-Type: text/plain; charset=utf-8\r\n");
        buf.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        buf.extend_from_slice(body.as_bytes());
    }
}

/// Outcome of a successful server-side validation.
#[derive(Debug)]
pub struct AcceptResponse {
    pub request: UpgradeRequest,
    pub response: HandshakeResponse,
    /// Negotiated extensions, ready to be installed on the connection.
    pub extensions: ExtensionChain,
}

/// Server-side upgrade policy.
#[derive(Debug, Default)]
pub struct HandshakeValidator {
    allowed_origins: Option<Vec<String>>,
    subprotocols: Vec<String>,
    registry: ExtensionRegistry,
}

impl HandshakeValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Origin allow-list and subprotocols taken from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_origins: config.allowed_origins.clone(),
            subprotocols: config.subprotocols.clone(),
            registry: ExtensionRegistry::new(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ExtensionRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_subprotocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Some(origins);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Validate an upgrade request and negotiate its options.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedHandshake`] for a wrong method or HTTP version, a
    ///   missing or malformed required header, or a repeated singleton header
    /// - [`Error::UnsupportedVersion`] unless `Sec-WebSocket-Version` is 13
    /// - [`Error::OriginNotAllowed`] if an allow-list is set and the origin
    ///   is missing or not on it
    /// - [`Error::InvalidExtension`] for an unparsable extension header
    pub fn validate(&self, request_line: &RequestLine, headers: &Headers) -> Result<AcceptResponse> {
        self.negotiate(request_line, headers, None, &self.subprotocols)
    }

    /// Convenience for [`validate`](Self::validate) on a parsed request.
    ///
    /// # Errors
    ///
    /// As [`validate`](Self::validate).
    pub fn validate_request(&self, request: &HandshakeRequest) -> Result<AcceptResponse> {
        self.validate(&request.request_line, &request.headers)
    }

    /// [`validate_request`](Self::validate_request) under the policy of
    /// `config` as well: its origin allow-list must also admit the request,
    /// and its subprotocols are used when this validator has none.
    ///
    /// # Errors
    ///
    /// As [`validate`](Self::validate).
    pub fn validate_with_config(
        &self,
        request: &HandshakeRequest,
        config: &Config,
    ) -> Result<AcceptResponse> {
        let subprotocols = if self.subprotocols.is_empty() {
            &config.subprotocols
        } else {
            &self.subprotocols
        };
        self.negotiate(
            &request.request_line,
            &request.headers,
            config.allowed_origins.as_deref(),
            subprotocols,
        )
    }

    fn negotiate(
        &self,
        request_line: &RequestLine,
        headers: &Headers,
        extra_origins: Option<&[String]>,
        subprotocols: &[String],
    ) -> Result<AcceptResponse> {
        if request_line.method != "GET" {
            return Err(malformed(format!(
                "expected GET method, got {}",
                request_line.method
            )));
        }
        if request_line.version != "HTTP/1.1" {
            return Err(malformed(format!(
                "expected HTTP/1.1, got {}",
                request_line.version
            )));
        }
        headers.reject_duplicates(&SINGLETON_HEADERS)?;

        if !headers.has_token("upgrade", "websocket") {
            return Err(malformed("missing or invalid Upgrade header"));
        }
        if !headers.has_token("connection", "upgrade") {
            return Err(malformed("missing or invalid Connection header"));
        }

        let host = headers
            .get("host")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| malformed("missing Host header"))?;

        match headers.get("sec-websocket-version") {
            Some(WS_VERSION) => {}
            Some(other) => return Err(Error::UnsupportedVersion(other.to_string())),
            None => return Err(malformed("missing Sec-WebSocket-Version header")),
        }

        let key = headers
            .get("sec-websocket-key")
            .ok_or_else(|| malformed("missing Sec-WebSocket-Key header"))?;
        match BASE64.decode(key) {
            Ok(nonce) if nonce.len() == 16 => {}
            Ok(nonce) => {
                return Err(malformed(format!(
                    "Sec-WebSocket-Key must decode to 16 bytes, got {}",
                    nonce.len()
                )));
            }
            Err(_) => return Err(malformed("Sec-WebSocket-Key is not valid base64")),
        }

        let origin = headers.get("origin").map(str::to_string);
        check_origin(self.allowed_origins.as_deref(), origin.as_deref())?;
        check_origin(extra_origins, origin.as_deref())?;

        let protocols: Vec<String> = headers
            .get_all("sec-websocket-protocol")
            .flat_map(split_list)
            .map(str::to_string)
            .collect();
        let protocol = protocols
            .iter()
            .find(|offered| subprotocols.iter().any(|s| s == *offered))
            .cloned();

        let offers = match headers.get_joined("sec-websocket-extensions") {
            Some(value) => ExtensionOffer::parse_header(&value)?,
            None => Vec::new(),
        };
        let (chain, accepted) = self.registry.negotiate(&offers);

        debug!(
            path = %request_line.target,
            protocol = ?protocol,
            extensions = accepted.len(),
            "upgrade request accepted"
        );

        Ok(AcceptResponse {
            response: HandshakeResponse {
                accept: compute_accept_key(key),
                protocol,
                extensions: accepted,
            },
            request: UpgradeRequest {
                path: request_line.target.clone(),
                host: host.to_string(),
                key: key.to_string(),
                origin,
                protocols,
                extensions: offers,
                headers: headers.clone(),
            },
            extensions: chain,
        })
    }

}

fn check_origin(allowed: Option<&[String]>, origin: Option<&str>) -> Result<()> {
    let Some(allowed) = allowed else {
        return Ok(());
    };
    match origin {
        Some(o) if allowed.iter().any(|a| a.eq_ignore_ascii_case(o)) => Ok(()),
        Some(o) => Err(Error::OriginNotAllowed {
            origin: o.to_string(),
        }),
        None => Err(Error::OriginNotAllowed {
            origin: "(none)".to_string(),
        }),
    }
}

/// What the client learned from an accepted upgrade.
#[derive(Debug)]
pub struct ClientAccept {
    pub protocol: Option<String>,
    pub extensions: ExtensionChain,
    pub headers: Headers,
}

/// Client side of the upgrade.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    host: String,
    path: String,
    key: String,
    origin: Option<String>,
    protocols: Vec<String>,
    extensions: Vec<ExtensionOffer>,
    extra_headers: Headers,
}

impl ClientHandshake {
    /// A handshake for `path` on `host` with a fresh random key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if no random key can be generated.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        Ok(Self::with_key(host, path, generate_key()?))
    }

    /// A handshake with a caller-chosen key.
    pub fn with_key(
        host: impl Into<String>,
        path: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            key: key.into(),
            origin: None,
            protocols: Vec::new(),
            extensions: Vec::new(),
            extra_headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, offers: Vec<ExtensionOffer>) -> Self {
        self.extensions = offers;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.extra_headers.append(name, value);
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    #[must_use]
    pub fn extensions(&self) -> &[ExtensionOffer] {
        &self.extensions
    }

    /// Write the upgrade request head.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHeaderValue`] if any value contains CR or LF.
    pub fn write_request(&self, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("Request-Target", &self.path)?;
        validate_header_value("Host", &self.host)?;

        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Version: {WS_VERSION}\r\n").as_bytes());

        if let Some(origin) = &self.origin {
            validate_header_value("Origin", origin)?;
            buf.extend_from_slice(format!("Origin: {origin}\r\n").as_bytes());
        }
        if !self.protocols.is_empty() {
            let value = self.protocols.join(", ");
            validate_header_value("Sec-WebSocket-Protocol", &value)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {value}\r\n").as_bytes());
        }
        if !self.extensions.is_empty() {
            let value = format_header(&self.extensions);
            validate_header_value("Sec-WebSocket-Extensions", &value)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Extensions: {value}\r\n").as_bytes());
        }
        for (name, value) in self.extra_headers.iter() {
            validate_header_value(name, value)?;
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Check the server's response and build the client extension chain.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedHandshake`] for a non-101 status, missing upgrade
    ///   headers, an accept token that does not match the key, or a
    ///   subprotocol that was not offered
    /// - [`Error::InvalidExtension`] for an extension that was not offered or
    ///   that rejects the server's parameters
    pub fn verify(&self, data: &[u8], registry: &ExtensionRegistry) -> Result<ClientAccept> {
        let head = &data[..find_head_end(data).unwrap_or(data.len())];
        let text = std::str::from_utf8(head).map_err(|_| malformed("response is not UTF-8"))?;
        let mut lines = text.lines();

        let status_line = lines.next().ok_or_else(|| malformed("empty response"))?;
        let mut parts = status_line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("HTTP/1.1"), Some("101")) => {}
            _ => return Err(malformed(format!("expected 101 status, got: {status_line}"))),
        }

        let headers = Headers::parse_lines(lines)?;
        if !headers.has_token("upgrade", "websocket") {
            return Err(malformed("missing or invalid Upgrade header in response"));
        }
        if !headers.has_token("connection", "upgrade") {
            return Err(malformed("missing or invalid Connection header in response"));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| malformed("missing Sec-WebSocket-Accept header"))?;
        if accept != compute_accept_key(&self.key) {
            return Err(malformed("Sec-WebSocket-Accept does not match the key"));
        }

        let protocol = headers.get("sec-websocket-protocol").map(str::to_string);
        if let Some(p) = &protocol {
            if !self.protocols.iter().any(|offered| offered == p) {
                return Err(malformed(format!("server selected unoffered subprotocol {p}")));
            }
        }

        let accepted = match headers.get_joined("sec-websocket-extensions") {
            Some(value) => ExtensionOffer::parse_header(&value)?,
            None => Vec::new(),
        };
        for ext in &accepted {
            if !self.extensions.iter().any(|offer| offer.name == ext.name) {
                return Err(Error::InvalidExtension(format!(
                    "server accepted extension '{}' that was not offered",
                    ext.name
                )));
            }
        }
        let extensions = registry.configure(&accepted)?;

        debug!(protocol = ?protocol, extensions = extensions.len(), "upgrade response verified");
        Ok(ClientAccept {
            protocol,
            extensions,
            headers,
        })
    }
}
