//! permessage-deflate compression extension (RFC 7692).
//!
//! Each direction keeps its own raw-deflate context. A message is compressed
//! frame by frame with a sync flush, so a fragmented message never has to be
//! buffered whole; the trailing `00 00 ff ff` of the final frame is dropped
//! on the way out and restored on the way in. RSV1 marks the first frame of
//! a compressed message only.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::trace;

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::extensions::{Extension, ExtensionParam, RsvBits};
use crate::protocol::{Frame, OpCode};

pub const EXTENSION_NAME: &str = "permessage-deflate";

const MIN_WINDOW_BITS: u8 = 8;
const MAX_WINDOW_BITS: u8 = 15;
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Local preferences for permessage-deflate.
///
/// On the server these are the limits imposed on the negotiation; on the
/// client they shape the offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateConfig {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
    pub compression_level: u32,
    /// Upper bound on the inflated size of a single frame.
    ///
    /// Default: 64 MB
    pub max_inflated_size: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: MAX_WINDOW_BITS,
            client_max_window_bits: MAX_WINDOW_BITS,
            compression_level: 6,
            max_inflated_size: 64 * 1024 * 1024,
        }
    }
}

fn check_window_bits(name: &str, bits: u8) -> Result<u8> {
    if (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        Ok(bits)
    } else {
        Err(Error::InvalidExtension(format!(
            "{name} must be {MIN_WINDOW_BITS}-{MAX_WINDOW_BITS}, got {bits}"
        )))
    }
}

impl DeflateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.server_no_context_takeover = value;
        self
    }

    #[must_use]
    pub fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    /// # Errors
    ///
    /// [`Error::InvalidExtension`] unless `bits` is in 8..=15.
    pub fn server_max_window_bits(mut self, bits: u8) -> Result<Self> {
        self.server_max_window_bits = check_window_bits(SERVER_MAX_WINDOW_BITS, bits)?;
        Ok(self)
    }

    /// # Errors
    ///
    /// [`Error::InvalidExtension`] unless `bits` is in 8..=15.
    pub fn client_max_window_bits(mut self, bits: u8) -> Result<Self> {
        self.client_max_window_bits = check_window_bits(CLIENT_MAX_WINDOW_BITS, bits)?;
        Ok(self)
    }

    /// # Errors
    ///
    /// [`Error::InvalidExtension`] unless `level` is in 0..=9.
    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression_level must be 0-9, got {level}"
            )));
        }
        self.compression_level = level;
        Ok(self)
    }

    #[must_use]
    pub fn max_inflated_size(mut self, size: usize) -> Self {
        self.max_inflated_size = size;
        self
    }
}

/// Parameters in force after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Agreed {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    server_max_window_bits: u8,
    client_max_window_bits: u8,
}

impl Default for Agreed {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: MAX_WINDOW_BITS,
            client_max_window_bits: MAX_WINDOW_BITS,
        }
    }
}

fn parse_window_bits(param: &ExtensionParam) -> Result<u8> {
    let value = param.value.as_deref().ok_or_else(|| {
        Error::InvalidExtension(format!("{} requires a value", param.name))
    })?;
    let bits = value
        .parse::<u8>()
        .map_err(|_| Error::InvalidExtension(format!("invalid {}: {value}", param.name)))?;
    check_window_bits(&param.name, bits)
}

fn reject_duplicates(params: &[ExtensionParam]) -> Result<()> {
    for (i, param) in params.iter().enumerate() {
        if params[..i].iter().any(|p| p.name == param.name) {
            return Err(Error::InvalidExtension(format!(
                "duplicate parameter: {}",
                param.name
            )));
        }
    }
    Ok(())
}

fn reject_value(param: &ExtensionParam) -> Result<()> {
    match param.value {
        Some(_) => Err(Error::InvalidExtension(format!(
            "{} takes no value",
            param.name
        ))),
        None => Ok(()),
    }
}

/// One connection's permessage-deflate state.
pub struct DeflateExtension {
    role: Role,
    config: DeflateConfig,
    agreed: Agreed,
    compressor: Compress,
    decompressor: Decompress,
    /// An outgoing compressed message is open.
    deflating: bool,
    /// The incoming message in progress is compressed.
    inflating: bool,
}

impl DeflateExtension {
    #[must_use]
    pub fn new(role: Role, config: DeflateConfig) -> Self {
        let agreed = Agreed::default();
        Self {
            role,
            compressor: Self::new_compressor(&config, role, &agreed),
            decompressor: Decompress::new(false),
            config,
            agreed,
            deflating: false,
            inflating: false,
        }
    }

    /// Factory for [`ExtensionRegistry::register`](crate::extensions::ExtensionRegistry::register).
    pub fn factory(config: DeflateConfig) -> impl Fn(Role) -> Box<dyn Extension> + Send + Sync {
        move |role| Box::new(DeflateExtension::new(role, config.clone()))
    }

    fn new_compressor(config: &DeflateConfig, role: Role, agreed: &Agreed) -> Compress {
        let bits = match role {
            Role::Server => agreed.server_max_window_bits,
            Role::Client => agreed.client_max_window_bits,
        };
        // zlib refuses an 8-bit window for raw deflate; 9 is the smallest it
        // produces and stays within what the peer agreed to inflate.
        Compress::new_with_window_bits(
            Compression::new(config.compression_level),
            false,
            bits.max(9),
        )
    }

    fn apply(&mut self, agreed: Agreed) {
        self.agreed = agreed;
        self.compressor = Self::new_compressor(&self.config, self.role, &agreed);
        self.decompressor = Decompress::new(false);
    }

    fn own_no_context_takeover(&self) -> bool {
        match self.role {
            Role::Server => self.agreed.server_no_context_takeover,
            Role::Client => self.agreed.client_no_context_takeover,
        }
    }

    fn peer_no_context_takeover(&self) -> bool {
        match self.role {
            Role::Server => self.agreed.client_no_context_takeover,
            Role::Client => self.agreed.server_no_context_takeover,
        }
    }

    fn compress(&mut self, data: &[u8], fin: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        let start = self.compressor.total_in();

        loop {
            let consumed = (self.compressor.total_in() - start) as usize;
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity().max(1024));
            }
            self.compressor
                .compress_vec(&data[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("compression failed: {e}")))?;
            let consumed = (self.compressor.total_in() - start) as usize;
            if consumed == data.len() && out.len() < out.capacity() {
                break;
            }
        }

        if fin {
            if out.ends_with(&DEFLATE_TRAILER) {
                out.truncate(out.len() - DEFLATE_TRAILER.len());
            }
            if self.own_no_context_takeover() {
                self.compressor.reset();
            }
        }
        Ok(out)
    }

    fn decompress(&mut self, data: &[u8], fin: bool) -> Result<Vec<u8>> {
        let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(data);
        if fin {
            input.extend_from_slice(&DEFLATE_TRAILER);
        }

        let mut out = Vec::with_capacity((data.len() * 2).max(64));
        let start = self.decompressor.total_in();

        loop {
            let consumed = (self.decompressor.total_in() - start) as usize;
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(1024));
            }
            let before_out = out.len();
            let status = self
                .decompressor
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("decompression failed: {e}")))?;

            if out.len() > self.config.max_inflated_size {
                return Err(Error::MessageTooLarge {
                    size: out.len(),
                    max: self.config.max_inflated_size,
                });
            }

            let consumed = (self.decompressor.total_in() - start) as usize;
            let done = consumed == input.len() && out.len() < out.capacity();
            let stalled = status == Status::BufError && out.len() == before_out;
            if done || stalled || status == Status::StreamEnd {
                break;
            }
        }

        if fin && self.peer_no_context_takeover() {
            self.decompressor.reset(false);
        }
        Ok(out)
    }
}

impl Extension for DeflateExtension {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn negotiate(&mut self, params: &[ExtensionParam]) -> Result<Vec<ExtensionParam>> {
        reject_duplicates(params)?;

        let mut agreed = Agreed {
            server_no_context_takeover: self.config.server_no_context_takeover,
            client_no_context_takeover: self.config.client_no_context_takeover,
            server_max_window_bits: self.config.server_max_window_bits,
            client_max_window_bits: MAX_WINDOW_BITS,
        };
        let mut client_window_offered = false;

        for param in params {
            match param.name.as_str() {
                SERVER_NO_CONTEXT_TAKEOVER => {
                    reject_value(param)?;
                    agreed.server_no_context_takeover = true;
                }
                CLIENT_NO_CONTEXT_TAKEOVER => {
                    reject_value(param)?;
                    agreed.client_no_context_takeover = true;
                }
                SERVER_MAX_WINDOW_BITS => {
                    let bits = parse_window_bits(param)?;
                    agreed.server_max_window_bits = agreed.server_max_window_bits.min(bits);
                }
                CLIENT_MAX_WINDOW_BITS => {
                    client_window_offered = true;
                    if param.value.is_some() {
                        agreed.client_max_window_bits = parse_window_bits(param)?;
                    }
                }
                other => {
                    return Err(Error::InvalidExtension(format!("unknown parameter: {other}")));
                }
            }
        }

        if self.config.client_max_window_bits < MAX_WINDOW_BITS {
            if !client_window_offered {
                return Err(Error::InvalidExtension(
                    "client cannot limit its window size".into(),
                ));
            }
            agreed.client_max_window_bits = agreed
                .client_max_window_bits
                .min(self.config.client_max_window_bits);
        }

        let mut response = Vec::new();
        if agreed.server_no_context_takeover {
            response.push(ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER));
        }
        if agreed.client_no_context_takeover {
            response.push(ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER));
        }
        if agreed.server_max_window_bits < MAX_WINDOW_BITS {
            response.push(ExtensionParam::new(
                SERVER_MAX_WINDOW_BITS,
                agreed.server_max_window_bits.to_string(),
            ));
        }
        if client_window_offered && agreed.client_max_window_bits < MAX_WINDOW_BITS {
            response.push(ExtensionParam::new(
                CLIENT_MAX_WINDOW_BITS,
                agreed.client_max_window_bits.to_string(),
            ));
        }

        self.apply(agreed);
        Ok(response)
    }

    fn configure(&mut self, params: &[ExtensionParam]) -> Result<()> {
        reject_duplicates(params)?;

        let mut agreed = Agreed {
            client_no_context_takeover: self.config.client_no_context_takeover,
            ..Agreed::default()
        };

        for param in params {
            match param.name.as_str() {
                SERVER_NO_CONTEXT_TAKEOVER => {
                    reject_value(param)?;
                    agreed.server_no_context_takeover = true;
                }
                CLIENT_NO_CONTEXT_TAKEOVER => {
                    reject_value(param)?;
                    agreed.client_no_context_takeover = true;
                }
                SERVER_MAX_WINDOW_BITS => {
                    agreed.server_max_window_bits = parse_window_bits(param)?;
                }
                CLIENT_MAX_WINDOW_BITS => {
                    agreed.client_max_window_bits = parse_window_bits(param)?;
                }
                other => {
                    return Err(Error::InvalidExtension(format!("unknown parameter: {other}")));
                }
            }
        }

        if self.config.server_no_context_takeover && !agreed.server_no_context_takeover {
            return Err(Error::InvalidExtension(
                "server ignored server_no_context_takeover".into(),
            ));
        }
        if agreed.server_max_window_bits > self.config.server_max_window_bits {
            return Err(Error::InvalidExtension(format!(
                "server window {} exceeds requested {}",
                agreed.server_max_window_bits, self.config.server_max_window_bits
            )));
        }
        agreed.client_max_window_bits = agreed
            .client_max_window_bits
            .min(self.config.client_max_window_bits);

        self.apply(agreed);
        Ok(())
    }

    fn offer_params(&self) -> Vec<ExtensionParam> {
        let mut params = Vec::new();
        if self.config.server_no_context_takeover {
            params.push(ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER));
        }
        if self.config.client_no_context_takeover {
            params.push(ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER));
        }
        if self.config.server_max_window_bits < MAX_WINDOW_BITS {
            params.push(ExtensionParam::new(
                SERVER_MAX_WINDOW_BITS,
                self.config.server_max_window_bits.to_string(),
            ));
        }
        if self.config.client_max_window_bits < MAX_WINDOW_BITS {
            params.push(ExtensionParam::new(
                CLIENT_MAX_WINDOW_BITS,
                self.config.client_max_window_bits.to_string(),
            ));
        } else {
            params.push(ExtensionParam::flag(CLIENT_MAX_WINDOW_BITS));
        }
        params
    }

    fn incoming(&mut self, mut frame: Frame) -> Result<Frame> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => self.inflating = frame.rsv1,
            OpCode::Continuation if frame.rsv1 => {
                return Err(Error::ProtocolViolation(
                    "RSV1 set on a continuation frame".into(),
                ));
            }
            OpCode::Continuation => {}
            _ if frame.rsv1 => {
                return Err(Error::ProtocolViolation("RSV1 set on a control frame".into()));
            }
            _ => return Ok(frame),
        }

        if !self.inflating {
            return Ok(frame);
        }

        let inflated = self.decompress(frame.payload(), frame.fin)?;
        trace!(
            compressed = frame.payload().len(),
            inflated = inflated.len(),
            "inflated frame"
        );
        if frame.fin {
            self.inflating = false;
        }
        frame.rsv1 = false;
        frame.set_payload(inflated);
        Ok(frame)
    }

    fn outgoing(&mut self, mut frame: Frame) -> Result<Frame> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                self.deflating = true;
                frame.rsv1 = true;
            }
            OpCode::Continuation if self.deflating => {}
            _ => return Ok(frame),
        }

        let compressed = self.compress(frame.payload(), frame.fin)?;
        trace!(
            original = frame.payload().len(),
            compressed = compressed.len(),
            "deflated frame"
        );
        if frame.fin {
            self.deflating = false;
        }
        frame.set_payload(compressed);
        Ok(frame)
    }
}

impl std::fmt::Debug for DeflateExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateExtension")
            .field("role", &self.role)
            .field("config", &self.config)
            .field("agreed", &self.agreed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::{ExtensionOffer, ExtensionRegistry};

    fn pair(config: DeflateConfig) -> (DeflateExtension, DeflateExtension) {
        let mut client = DeflateExtension::new(Role::Client, config.clone());
        let mut server = DeflateExtension::new(Role::Server, config);
        let response = server.negotiate(&client.offer_params()).unwrap();
        client.configure(&response).unwrap();
        (client, server)
    }

    #[test]
    fn test_whole_message_round_trip() {
        let (mut client, mut server) = pair(DeflateConfig::default());
        let text = "Hello, WebSocket compression! ".repeat(20);

        let frame = client.outgoing(Frame::text(text.clone())).unwrap();
        assert!(frame.rsv1);
        assert!(frame.payload().len() < text.len());
        assert!(!frame.payload().ends_with(&DEFLATE_TRAILER));

        let frame = server.incoming(frame).unwrap();
        assert!(!frame.rsv1);
        assert_eq!(frame.payload().as_ref(), text.as_bytes());
    }

    #[test]
    fn test_rfc7692_hello_example() {
        // RFC 7692 Section 7.2.3.1: "Hello" compressed without context
        let mut server = DeflateExtension::new(Role::Server, DeflateConfig::default());
        let mut frame = Frame::text(vec![0xf2u8, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00]);
        frame.rsv1 = true;
        let frame = server.incoming(frame).unwrap();
        assert_eq!(frame.payload().as_ref(), b"Hello");
    }

    #[test]
    fn test_fragmented_message_sets_rsv1_on_first_frame_only() {
        let (mut client, mut server) = pair(DeflateConfig::default());
        let parts = ["first part ", "second part ", "third part"];

        let mut wire = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            let opcode = if i == 0 { OpCode::Binary } else { OpCode::Continuation };
            let fin = i == parts.len() - 1;
            wire.push(client.outgoing(Frame::new(fin, opcode, part.as_bytes().to_vec())).unwrap());
        }
        assert!(wire[0].rsv1);
        assert!(!wire[1].rsv1);
        assert!(!wire[2].rsv1);

        let mut received = Vec::new();
        for frame in wire {
            received.extend_from_slice(server.incoming(frame).unwrap().payload());
        }
        assert_eq!(received, parts.concat().as_bytes());
    }

    #[test]
    fn test_context_takeover_across_messages() {
        let (mut client, mut server) = pair(DeflateConfig::default());
        let text = "repetitive payload repetitive payload";

        let first = client.outgoing(Frame::text(text)).unwrap();
        let second = client.outgoing(Frame::text(text)).unwrap();
        assert!(second.payload().len() < first.payload().len());

        assert_eq!(server.incoming(first).unwrap().payload().as_ref(), text.as_bytes());
        assert_eq!(server.incoming(second).unwrap().payload().as_ref(), text.as_bytes());
    }

    #[test]
    fn test_no_context_takeover_resets_between_messages() {
        let config = DeflateConfig::new().client_no_context_takeover(true);
        let (mut client, mut server) = pair(config);
        let text = "repetitive payload repetitive payload";

        let first = client.outgoing(Frame::text(text)).unwrap();
        let second = client.outgoing(Frame::text(text)).unwrap();
        assert_eq!(first.payload(), second.payload());

        assert_eq!(server.incoming(first).unwrap().payload().as_ref(), text.as_bytes());
        assert_eq!(server.incoming(second).unwrap().payload().as_ref(), text.as_bytes());
    }

    #[test]
    fn test_uncompressed_messages_pass_through() {
        let (_, mut server) = pair(DeflateConfig::default());
        let frame = server.incoming(Frame::text("plain")).unwrap();
        assert_eq!(frame.payload().as_ref(), b"plain");

        let ping = server.outgoing(Frame::ping("p")).unwrap();
        assert!(!ping.rsv1);
        assert_eq!(ping.payload().as_ref(), b"p");
    }

    #[test]
    fn test_rsv1_misuse_is_protocol_error() {
        let (_, mut server) = pair(DeflateConfig::default());

        let mut ping = Frame::ping("x");
        ping.rsv1 = true;
        assert!(matches!(server.incoming(ping), Err(Error::ProtocolViolation(_))));

        let mut continuation = Frame::continuation(true, "x");
        continuation.rsv1 = true;
        assert!(matches!(
            server.incoming(continuation),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_inflate_limit() {
        let config = DeflateConfig::new().max_inflated_size(100);
        let (mut client, mut server) = pair(config);
        let frame = client.outgoing(Frame::binary(vec![0u8; 10_000])).unwrap();
        assert!(matches!(
            server.incoming(frame),
            Err(Error::MessageTooLarge { max: 100, .. })
        ));
    }

    #[test]
    fn test_server_negotiation() {
        let mut server = DeflateExtension::new(Role::Server, DeflateConfig::default());
        let response = server
            .negotiate(&[
                ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER),
                ExtensionParam::new(SERVER_MAX_WINDOW_BITS, "10"),
                ExtensionParam::new(CLIENT_MAX_WINDOW_BITS, "12"),
            ])
            .unwrap();
        assert_eq!(
            response,
            vec![
                ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER),
                ExtensionParam::new(SERVER_MAX_WINDOW_BITS, "10"),
                ExtensionParam::new(CLIENT_MAX_WINDOW_BITS, "12"),
            ]
        );
    }

    #[test]
    fn test_server_rejects_bad_offers() {
        let mut server = DeflateExtension::new(Role::Server, DeflateConfig::default());
        assert!(server.negotiate(&[ExtensionParam::flag("unknown")]).is_err());
        assert!(
            server
                .negotiate(&[ExtensionParam::new(SERVER_MAX_WINDOW_BITS, "7")])
                .is_err()
        );
        assert!(
            server
                .negotiate(&[
                    ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER),
                    ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER),
                ])
                .is_err()
        );

        let limited = DeflateConfig::new().client_max_window_bits(10).unwrap();
        let mut server = DeflateExtension::new(Role::Server, limited);
        assert!(server.negotiate(&[]).is_err());
        assert_eq!(
            server
                .negotiate(&[ExtensionParam::flag(CLIENT_MAX_WINDOW_BITS)])
                .unwrap(),
            vec![ExtensionParam::new(CLIENT_MAX_WINDOW_BITS, "10")]
        );
    }

    #[test]
    fn test_client_rejects_unrequested_window() {
        let config = DeflateConfig::new().server_max_window_bits(10).unwrap();
        let mut client = DeflateExtension::new(Role::Client, config);
        assert!(
            client
                .configure(&[ExtensionParam::new(SERVER_MAX_WINDOW_BITS, "12")])
                .is_err()
        );
        assert!(
            client
                .configure(&[ExtensionParam::new(SERVER_MAX_WINDOW_BITS, "9")])
                .is_ok()
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(DeflateConfig::new().server_max_window_bits(8).is_ok());
        assert!(DeflateConfig::new().server_max_window_bits(16).is_err());
        assert!(DeflateConfig::new().client_max_window_bits(7).is_err());
        assert!(DeflateConfig::new().compression_level(9).is_ok());
        assert!(DeflateConfig::new().compression_level(10).is_err());
    }

    #[test]
    fn test_registry_integration() {
        let mut client_registry = ExtensionRegistry::new();
        client_registry
            .register(DeflateExtension::factory(DeflateConfig::default()))
            .unwrap();
        let mut server_registry = ExtensionRegistry::new();
        server_registry
            .register(DeflateExtension::factory(DeflateConfig::default()))
            .unwrap();

        let offers = client_registry.offers();
        assert_eq!(offers[0].to_string(), "permessage-deflate; client_max_window_bits");

        let (mut server_chain, accepted) = server_registry.negotiate(&offers);
        assert_eq!(accepted, vec![ExtensionOffer::new(EXTENSION_NAME)]);
        assert_eq!(server_chain.rsv_bits(), RsvBits::RSV1);

        let mut client_chain = client_registry.configure(&accepted).unwrap();
        let frame = client_chain.outgoing(Frame::text("chained")).unwrap();
        let frame = server_chain.incoming(frame).unwrap();
        assert_eq!(frame.payload().as_ref(), b"chained");
    }
}
