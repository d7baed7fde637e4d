//! # wsengine - RFC 6455 WebSocket protocol engine
//!
//! `wsengine` implements the WebSocket protocol between the HTTP upgrade and
//! the application: handshake validation, frame encoding and decoding,
//! message reassembly, extensions and the connection lifecycle.
//!
//! ## Features
//!
//! - **Strict framing**: masking by role, reserved bits, control frame
//!   rules and incremental UTF-8 validation
//! - **Resumable decoding** over arbitrarily split input
//! - **Listener fan-out** in registration order with panic isolation
//! - **Close handshake** with a bounded wait for the peer's reply
//! - **Extension framework** with optional permessage-deflate
//!   (`compression` feature)
//! - **Resource limits** on frames, messages, fragments and handshakes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use wsengine::protocol::HandshakeValidator;
//! use wsengine::{Config, Listener, WebSocket, upgrade};
//!
//! struct Echo;
//!
//! impl Listener for Echo {
//!     fn on_text(&self, ws: &WebSocket, text: &str) {
//!         let ws = ws.clone();
//!         let text = text.to_owned();
//!         tokio::spawn(async move { ws.send_text(text).await });
//!     }
//! }
//!
//! # async fn run() -> wsengine::Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9001").await?;
//! let validator = HandshakeValidator::new();
//! let listeners: Vec<Arc<dyn Listener>> = vec![Arc::new(Echo)];
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     let (ws, reader) =
//!         upgrade::accept(stream, &validator, Config::server(), listeners.clone()).await?;
//!     tokio::spawn(async move { ws.serve(reader).await });
//! }
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod upgrade;

pub use config::{Config, Limits, Timeouts};
pub use connection::{ConnectionState, MessageFragmenter, Role};
#[cfg(feature = "async-tokio")]
pub use connection::{ConnectionId, Inbound, Listener, ListenerId, WebSocket, WebSocketBuilder};
pub use error::{Error, Result};
pub use extensions::{Extension, ExtensionChain, ExtensionOffer, ExtensionRegistry};
pub use message::{CloseCode, CloseFrame, Fragment, Message};
pub use protocol::{
    ClientHandshake, Frame, HandshakeRequest, HandshakeResponse, HandshakeValidator, OpCode,
    WS_GUID, compute_accept_key,
};
