//! Connection lifecycle, listener fan-out and the async driver.
//!
//! A [`WebSocket`] moves through `NEW -> CONNECTED -> CLOSING -> CLOSED`.
//! Incoming frames are decoded and reassembled by an [`Inbound`] and fanned
//! out to [`Listener`]s in registration order; outgoing messages are
//! fragmented, run through the negotiated extensions and written under a
//! per-connection lock.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use wsengine::{Config, Listener, Role, WebSocket};
//!
//! struct Printer;
//!
//! impl Listener for Printer {
//!     fn on_text(&self, _ws: &WebSocket, text: &str) {
//!         println!("received {text}");
//!     }
//! }
//!
//! # async fn run(stream: tokio::net::TcpStream) -> wsengine::Result<()> {
//! let (reader, writer) = stream.into_split();
//! let ws = WebSocket::builder(Role::Server)
//!     .config(Config::server())
//!     .listener(Arc::new(Printer))
//!     .build(writer);
//! ws.on_connect();
//! ws.serve(reader).await
//! # }
//! ```

mod fragmenter;
mod role;
mod state;

pub use fragmenter::MessageFragmenter;
pub use role::Role;
pub use state::ConnectionState;

#[cfg(feature = "async-tokio")]
mod listener;
#[cfg(feature = "async-tokio")]
mod websocket;

#[cfg(feature = "async-tokio")]
pub use listener::{Listener, ListenerId};
#[cfg(feature = "async-tokio")]
pub use websocket::{ConnectionId, Inbound, WebSocket, WebSocketBuilder};
