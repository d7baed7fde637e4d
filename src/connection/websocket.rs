use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::codec::{FrameDecoder, FrameEncoder, ReadBuffer};
use crate::config::Config;
use crate::connection::fragmenter::MessageFragmenter;
use crate::connection::listener::{Listener, ListenerId, ListenerSet};
use crate::connection::state::AtomicState;
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::extensions::{ExtensionChain, RsvBits};
use crate::message::{CloseCode, CloseFrame, Fragment, Message};
use crate::protocol::handshake::UpgradeRequest;
use crate::protocol::{Frame, MessageAssembler, MessageEvent, OpCode};

/// Process-unique connection identity, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half and everything that must change in step with it.
struct Outbound {
    io: Option<BoxedWriter>,
    encoder: FrameEncoder,
    buf: BytesMut,
    /// Opcode of a streamed message whose last piece has not been sent.
    stream: Option<OpCode>,
}

impl Outbound {
    /// Encode all frames or none of them.
    fn encode(&mut self, frames: &[Frame]) -> Result<()> {
        let start = self.buf.len();
        for frame in frames {
            if let Err(err) = self.encoder.encode(frame, &mut self.buf) {
                self.buf.truncate(start);
                return Err(err);
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        let Some(io) = self.io.as_mut() else {
            self.buf.clear();
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport already released",
            ));
        };
        let written = io.write_all(&self.buf).await;
        self.buf.clear();
        written?;
        io.flush().await
    }

    async fn release(&mut self) -> Option<std::io::Error> {
        self.buf.clear();
        self.stream = None;
        let mut io = self.io.take()?;
        io.shutdown().await.err()
    }

    /// Drop the transport without shutting it down. Used when a write was
    /// cut short and the wire may hold half a frame.
    fn abandon(&mut self) {
        self.buf.clear();
        self.stream = None;
        self.io = None;
    }
}

struct Inner {
    id: ConnectionId,
    role: Role,
    config: Config,
    protocol: Option<String>,
    request: Option<UpgradeRequest>,
    state: AtomicState,
    listeners: ListenerSet,
    outbound: Mutex<Outbound>,
    extensions: StdMutex<ExtensionChain>,
    /// Held for the duration of one fan-out so events never overlap.
    dispatch_gate: StdMutex<()>,
    close_reported: AtomicBool,
    close_started: StdMutex<Option<Instant>>,
    terminated: AtomicBool,
    terminated_notify: Notify,
    /// Set once writes must stop; in-flight writes give up on `abort`.
    aborted: AtomicBool,
    abort: Notify,
    /// Wakes the read driver when the state or close deadline changes.
    wakeup: Notify,
}

/// Builder for a [`WebSocket`] whose upgrade has already happened.
pub struct WebSocketBuilder {
    role: Role,
    config: Config,
    extensions: ExtensionChain,
    protocol: Option<String>,
    request: Option<UpgradeRequest>,
    listeners: Vec<Arc<dyn Listener>>,
}

impl WebSocketBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Negotiated extensions.
    #[must_use]
    pub fn extensions(mut self, extensions: ExtensionChain) -> Self {
        self.extensions = extensions;
        self
    }

    /// Negotiated subprotocol.
    #[must_use]
    pub fn protocol(mut self, protocol: Option<String>) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn request(mut self, request: UpgradeRequest) -> Self {
        self.request = Some(request);
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub fn listeners(mut self, listeners: Vec<Arc<dyn Listener>>) -> Self {
        self.listeners.extend(listeners);
        self
    }

    /// Finish with the write half of the transport. The connection starts
    /// in [`ConnectionState::New`]; call [`WebSocket::on_connect`] to open it.
    pub fn build<W>(self, writer: W) -> WebSocket
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        WebSocket {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                role: self.role,
                protocol: self.protocol,
                request: self.request,
                state: AtomicState::new(ConnectionState::New),
                listeners: ListenerSet::new(self.listeners),
                outbound: Mutex::new(Outbound {
                    io: Some(Box::new(writer)),
                    encoder: FrameEncoder::new(self.role),
                    buf: BytesMut::with_capacity(self.config.read_buffer_size),
                    stream: None,
                }),
                extensions: StdMutex::new(self.extensions),
                dispatch_gate: StdMutex::new(()),
                close_reported: AtomicBool::new(false),
                close_started: StdMutex::new(None),
                terminated: AtomicBool::new(false),
                terminated_notify: Notify::new(),
                aborted: AtomicBool::new(false),
                abort: Notify::new(),
                wakeup: Notify::new(),
                config: self.config,
            }),
        }
    }
}

/// One WebSocket connection.
///
/// A cheap, cloneable handle. Sending is allowed from any task; sends are
/// serialized so frames of different messages never interleave on the
/// wire. Incoming data is processed by [`serve`](Self::serve) or, for
/// transports that push bytes, by an [`Inbound`].
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

impl WebSocket {
    #[must_use]
    pub fn builder(role: Role) -> WebSocketBuilder {
        WebSocketBuilder {
            role,
            config: Config::default(),
            extensions: ExtensionChain::default(),
            protocol: None,
            request: None,
            listeners: Vec::new(),
        }
    }

    /// A connection without extensions, subprotocol or listeners.
    pub fn new<W>(writer: W, role: Role, config: Config) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::builder(role).config(config).build(writer)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The negotiated subprotocol, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.inner.protocol.as_deref()
    }

    /// Metadata of the upgrade request (server side only).
    #[must_use]
    pub fn upgrade_request(&self) -> Option<&UpgradeRequest> {
        self.inner.request.as_ref()
    }

    /// Names of the negotiated extensions in chain order.
    #[must_use]
    pub fn extensions(&self) -> Vec<String> {
        self.chain().names().map(str::to_string).collect()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listeners(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Move from NEW to CONNECTED and notify listeners.
    ///
    /// Returns `false`, without notifying anyone, if the connection was
    /// not NEW.
    pub fn on_connect(&self) -> bool {
        match self
            .inner
            .state
            .transition(ConnectionState::New, ConnectionState::Connected)
        {
            Ok(()) => {
                debug!(connection = %self.id(), from = "NEW", to = "CONNECTED", "connection open");
                self.dispatch("open", |l| l.on_open(self));
                self.inner.wakeup.notify_one();
                true
            }
            Err(state) => {
                debug!(connection = %self.id(), %state, "connect ignored");
                false
            }
        }
    }

    /// Send a message.
    ///
    /// Text and binary messages larger than `Config::fragment_size` are
    /// split into continuation frames. `Message::Close` starts the closing
    /// handshake like [`close`](Self::close).
    ///
    /// Completes once the frames have been written and flushed.
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` unless the connection is CONNECTED
    /// - `Error::ProtocolViolation` while a streamed message is open
    /// - `Error::ControlFrameTooLarge` for ping/pong payloads over 125 bytes
    /// - `Error::Transport` if the write fails; the connection is then CLOSED
    pub async fn send(&self, message: Message) -> Result<()> {
        match message {
            Message::Text(text) => self.send_data(OpCode::Text, Bytes::from(text)).await,
            Message::Binary(data) => self.send_data(OpCode::Binary, data).await,
            Message::Ping(data) => self.send_control(Frame::ping(data)).await,
            Message::Pong(data) => self.send_control(Frame::pong(data)).await,
            Message::Close(close) => self.initiate_close(close).await,
        }
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_data(OpCode::Text, Bytes::from(text.into())).await
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_data(OpCode::Binary, data.into()).await
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_ping(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_control(Frame::ping(data)).await
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_pong(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_control(Frame::pong(data)).await
    }

    /// Send one piece of a text message. The first piece opens the message,
    /// `last` ends it. Whole-message sends are rejected until it ends.
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` unless the connection is CONNECTED
    /// - `Error::ProtocolViolation` if a streamed binary message is open
    /// - `Error::Transport` if the write fails
    pub async fn stream_text(&self, fragment: &str, last: bool) -> Result<()> {
        self.stream(OpCode::Text, Bytes::copy_from_slice(fragment.as_bytes()), last)
            .await
    }

    /// Binary counterpart of [`stream_text`](Self::stream_text).
    ///
    /// # Errors
    ///
    /// See [`stream_text`](Self::stream_text).
    pub async fn stream_binary(&self, fragment: impl Into<Bytes>, last: bool) -> Result<()> {
        self.stream(OpCode::Binary, fragment.into(), last).await
    }

    /// Start the closing handshake.
    ///
    /// Only the first close of a CONNECTED connection sends a close frame;
    /// the connection reaches CLOSED when the peer answers, or when
    /// `Timeouts::close` runs out while [`serve`](Self::serve) is driving it.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for codes that must not be sent
    /// - `Error::NotConnected` if the connection is not CONNECTED, including
    ///   when another close won the race
    /// - `Error::Transport` if the write fails
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.initiate_close(Some(CloseFrame::new(code, reason)))
            .await
    }

    /// `close(CloseCode::Normal, "")`.
    ///
    /// # Errors
    ///
    /// See [`close`](Self::close).
    pub async fn close_normal(&self) -> Result<()> {
        self.close(CloseCode::Normal, "").await
    }

    /// Resolves once the connection is CLOSED, listeners have seen
    /// `on_close` and the transport has been released.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.terminated_notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            if self.inner.terminated.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Drive the connection from `reader` until it is CLOSED.
    ///
    /// After a local close the peer has `Timeouts::close` to answer before
    /// the connection is closed anyway.
    ///
    /// # Errors
    ///
    /// The protocol or transport error that failed the connection. A clean
    /// closing handshake, or a timed out one, returns `Ok(())`.
    pub async fn serve<R>(&self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut inbound = Inbound::new(self);
        let read_size = self.inner.config.read_buffer_size.max(1);

        loop {
            if self.state().is_closed() {
                return Ok(());
            }
            let deadline = self.close_deadline();
            inbound.buffer_mut().reserve(read_size);

            tokio::select! {
                read = reader.read_buf(inbound.buffer_mut()) => match read {
                    Ok(0) => return self.peer_hung_up().await,
                    Ok(n) => {
                        trace!(connection = %self.id(), bytes = n, "read");
                        inbound.drain(self).await?;
                    }
                    Err(err) => {
                        let err = Error::from(err);
                        self.fail_transport(err.clone()).await;
                        return Err(err);
                    }
                },
                () = close_timer(deadline) => {
                    warn!(connection = %self.id(), timeout = ?self.inner.config.timeouts.close, "close handshake timed out");
                    self.terminate(None).await;
                    return Ok(());
                }
                () = self.inner.wakeup.notified() => inbound.drain(self).await?,
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Lock the write half, then re-check the state so nothing is written
    /// after a close that happened while waiting.
    async fn lock_connected(&self) -> Result<MutexGuard<'_, Outbound>> {
        self.ensure_connected()?;
        let out = self.inner.outbound.lock().await;
        self.ensure_connected()?;
        Ok(out)
    }

    async fn send_data(&self, opcode: OpCode, payload: Bytes) -> Result<()> {
        self.ensure_connected()?;
        self.inner.config.limits.check_message_size(payload.len())?;

        let mut out = self.lock_connected().await?;
        if let Some(open) = out.stream {
            return Err(Error::ProtocolViolation(format!(
                "cannot send a whole message while a streamed {open} message is open"
            )));
        }

        let frames = MessageFragmenter::new(payload, opcode, self.inner.config.fragment_size);
        let frames = self.outgoing(frames)?;
        out.encode(&frames)?;
        trace!(connection = %self.id(), %opcode, frames = frames.len(), "sending message");
        self.transmit(out).await
    }

    async fn send_control(&self, frame: Frame) -> Result<()> {
        self.ensure_connected()?;
        frame.validate()?;

        let mut out = self.lock_connected().await?;
        let frames = self.outgoing([frame])?;
        out.encode(&frames)?;
        self.transmit(out).await
    }

    async fn stream(&self, opcode: OpCode, payload: Bytes, last: bool) -> Result<()> {
        let mut out = self.lock_connected().await?;
        let frame_opcode = match out.stream {
            None => opcode,
            Some(open) if open == opcode => OpCode::Continuation,
            Some(open) => {
                return Err(Error::ProtocolViolation(format!(
                    "a streamed {open} message is already open"
                )));
            }
        };

        let frames = self.outgoing([Frame::new(last, frame_opcode, payload)])?;
        out.encode(&frames)?;
        out.stream = if last { None } else { Some(opcode) };
        self.transmit(out).await
    }

    async fn initiate_close(&self, close: Option<CloseFrame>) -> Result<()> {
        if let Some(frame) = &close {
            if !frame.code.is_valid() {
                return Err(Error::InvalidCloseCode(frame.code.as_u16()));
            }
        }
        if let Err(state) = self
            .inner
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closing)
        {
            debug!(connection = %self.id(), %state, "close ignored");
            return Err(Error::NotConnected);
        }
        debug!(connection = %self.id(), from = "CONNECTED", to = "CLOSING", "close initiated locally");
        self.start_close_timer();

        let mut out = self.lock_for_close().await;
        out.stream = None;
        out.encode(&[Frame::close(close.as_ref())])?;
        match self.transmit(out).await {
            Err(Error::NotConnected) => {
                debug!(connection = %self.id(), "transport aborted before the close frame was sent");
                self.terminate(None).await;
                Ok(())
            }
            sent => sent,
        }
    }

    fn start_close_timer(&self) {
        *self
            .inner
            .close_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.inner.wakeup.notify_one();
    }

    /// Lock the write half on the way to CLOSED. A writer still holding it
    /// at the close deadline is aborted.
    async fn lock_for_close(&self) -> MutexGuard<'_, Outbound> {
        let deadline = self.close_deadline();
        tokio::select! {
            out = self.inner.outbound.lock() => return out,
            () = close_timer(deadline) => {}
        }
        debug!(connection = %self.id(), "writer stalled past the close deadline");
        self.abort_writes();
        self.inner.outbound.lock().await
    }

    fn abort_writes(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.abort.notify_waiters();
    }

    /// Write and flush the encoded frames. Gives up, dropping the transport,
    /// when writes are aborted or the close deadline passes.
    async fn write(&self, out: &mut Outbound) -> std::io::Result<()> {
        let aborted = self.inner.abort.notified();
        let mut aborted = std::pin::pin!(aborted);
        aborted.as_mut().enable();

        if !self.inner.aborted.load(Ordering::Acquire) {
            let deadline = self.close_deadline();
            tokio::select! {
                flushed = out.flush() => return flushed,
                () = aborted => {}
                () = close_timer(deadline) => {}
            }
        }
        out.abandon();
        Err(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "write aborted",
        ))
    }

    /// Flush encoded frames. A failed write closes the connection; a write
    /// aborted by the close reports `Error::NotConnected`.
    async fn transmit(&self, mut out: MutexGuard<'_, Outbound>) -> Result<()> {
        match self.write(&mut out).await {
            Ok(()) => Ok(()),
            Err(_) if self.inner.aborted.load(Ordering::Acquire) => Err(Error::NotConnected),
            Err(err) => {
                drop(out);
                let err = Error::from(err);
                self.fail_transport(err.clone()).await;
                Err(err)
            }
        }
    }

    fn chain(&self) -> std::sync::MutexGuard<'_, ExtensionChain> {
        self.inner
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn extension_rsv_bits(&self) -> RsvBits {
        self.chain().rsv_bits()
    }

    fn outgoing(&self, frames: impl IntoIterator<Item = Frame>) -> Result<Vec<Frame>> {
        let mut chain = self.chain();
        if chain.is_empty() {
            return Ok(frames.into_iter().collect());
        }
        frames.into_iter().map(|f| chain.outgoing(f)).collect()
    }

    fn incoming(&self, frame: Frame) -> Result<Frame> {
        let mut chain = self.chain();
        if chain.is_empty() {
            return Ok(frame);
        }
        chain.incoming(frame)
    }

    fn dispatch(&self, event: &str, f: impl Fn(&dyn Listener)) {
        let _gate = self
            .inner
            .dispatch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.listeners.dispatch(self, event, f);
    }

    fn close_deadline(&self) -> Option<Instant> {
        self.inner
            .close_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|started| started + self.inner.config.timeouts.close)
    }

    fn deliver(&self, message: Message) {
        if !self.is_connected() {
            trace!(connection = %self.id(), "discarding message received while closing");
            return;
        }
        match message {
            Message::Text(text) => self.dispatch("text", |l| l.on_text(self, &text)),
            Message::Binary(data) => self.dispatch("binary", |l| l.on_binary(self, &data)),
            _ => {}
        }
    }

    fn deliver_fragment(&self, fragment: Fragment, last: bool) {
        if !self.is_connected() {
            trace!(connection = %self.id(), "discarding fragment received while closing");
            return;
        }
        match fragment {
            Fragment::Text(text) => {
                self.dispatch("text_fragment", |l| l.on_text_fragment(self, &text, last));
            }
            Fragment::Binary(data) => {
                self.dispatch("binary_fragment", |l| l.on_binary_fragment(self, &data, last));
            }
        }
    }

    async fn handle_ping(&self, data: Bytes) {
        if self.is_connected() {
            match self.send_control(Frame::pong(data.clone())).await {
                Ok(()) | Err(Error::NotConnected) => {}
                Err(err) => debug!(connection = %self.id(), error = %err, "pong not sent"),
            }
        }
        if self.state().can_receive() {
            self.dispatch("ping", |l| l.on_ping(self, &data));
        }
    }

    fn handle_pong(&self, data: Bytes) {
        if self.state().can_receive() {
            self.dispatch("pong", |l| l.on_pong(self, &data));
        }
    }

    /// A close from the peer while CONNECTED is echoed and the connection
    /// goes straight on to CLOSED once the echo is written; it does not wait
    /// in CLOSING for a second close frame.
    async fn handle_close(&self, close: Option<CloseFrame>) {
        match self
            .inner
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closing)
        {
            Ok(()) => {
                debug!(
                    connection = %self.id(),
                    from = "CONNECTED",
                    to = "CLOSING",
                    code = ?close.as_ref().map(|c| c.code),
                    "close received from peer"
                );
                self.start_close_timer();
                let mut out = self.lock_for_close().await;
                out.stream = None;
                let echoed = match out.encode(&[Frame::close(close.as_ref())]) {
                    Ok(()) => self.write(&mut out).await.map_err(Error::from),
                    Err(err) => Err(err),
                };
                drop(out);
                if let Err(err) = echoed {
                    debug!(connection = %self.id(), error = %err, "close echo not sent");
                }
                self.terminate(close.as_ref()).await;
            }
            Err(ConnectionState::Closing) => {
                debug!(connection = %self.id(), "closing handshake complete");
                self.terminate(close.as_ref()).await;
            }
            Err(state) => {
                debug!(connection = %self.id(), %state, "ignoring close frame");
            }
        }
    }

    async fn peer_hung_up(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Closed => Ok(()),
            ConnectionState::Closing => {
                debug!(connection = %self.id(), "transport closed during closing handshake");
                self.terminate(None).await;
                Ok(())
            }
            _ => {
                let err = Error::Transport("connection closed by peer".into());
                self.fail_transport(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Fail the connection after a protocol error in incoming data: send a
    /// close frame with the error's close code, report the error, close.
    async fn fail(&self, error: &Error) {
        if self.state().is_closed() {
            return;
        }
        let code = error.close_code().unwrap_or(CloseCode::ProtocolError);
        let close = CloseFrame::new(code, error.to_string());
        warn!(connection = %self.id(), %error, %code, "failing connection");

        if self
            .inner
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closing)
            .is_ok()
        {
            debug!(connection = %self.id(), from = "CONNECTED", to = "CLOSING", "connection failed");
            self.start_close_timer();
            let mut out = self.lock_for_close().await;
            out.stream = None;
            if out.encode(&[Frame::close(Some(&close))]).is_ok() {
                if let Err(err) = self.write(&mut out).await {
                    debug!(connection = %self.id(), error = %err, "close frame not sent");
                }
            }
        }

        self.dispatch("error", |l| l.on_error(self, error));
        self.terminate(Some(&close)).await;
    }

    /// Abrupt close: no closing handshake, no close code.
    async fn fail_transport(&self, error: Error) {
        let previous = self.inner.state.advance(ConnectionState::Closed);
        if previous.is_closed() {
            return;
        }
        warn!(connection = %self.id(), from = %previous, %error, "transport failure");
        self.dispatch("error", |l| l.on_error(self, &error));
        self.terminate(None).await;
    }

    /// Reach CLOSED, report it once and release the transport.
    async fn terminate(&self, close: Option<&CloseFrame>) {
        self.abort_writes();
        let previous = self.inner.state.advance(ConnectionState::Closed);
        if !previous.is_closed() {
            debug!(connection = %self.id(), from = %previous, to = "CLOSED", "connection closed");
        }
        if !self.inner.close_reported.swap(true, Ordering::AcqRel) {
            self.dispatch("close", |l| l.on_close(self, close));
        }

        if let Some(err) = self.inner.outbound.lock().await.release().await {
            debug!(connection = %self.id(), error = %err, "transport shutdown failed");
        }
        self.inner.terminated.store(true, Ordering::Release);
        self.inner.terminated_notify.notify_waiters();
        self.inner.wakeup.notify_one();
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("protocol", &self.inner.protocol)
            .field("listeners", &self.inner.listeners)
            .finish_non_exhaustive()
    }
}

async fn close_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Incoming half of a connection: resumable decode state plus message
/// reassembly.
///
/// [`WebSocket::serve`] owns one of these. Transports that push bytes
/// instead of being read from can create their own and call
/// [`feed`](Self::feed) with each chunk.
#[derive(Debug)]
pub struct Inbound {
    buffer: ReadBuffer,
    decoder: FrameDecoder,
    assembler: MessageAssembler,
}

impl Inbound {
    #[must_use]
    pub fn new(ws: &WebSocket) -> Self {
        let config = ws.config();
        Self {
            buffer: ReadBuffer::with_capacity(config.read_buffer_size),
            decoder: FrameDecoder::new(ws.role(), config.limits.clone())
                .with_accept_unmasked(config.accept_unmasked_frames)
                .with_rsv_bits(ws.extension_rsv_bits()),
            assembler: MessageAssembler::new(config.limits.clone())
                .with_streaming(config.streaming),
        }
    }

    /// Bytes received but not yet forming a complete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Process a chunk of bytes from the transport.
    ///
    /// Complete frames are handled in order; a trailing partial frame stays
    /// buffered for the next call.
    ///
    /// # Errors
    ///
    /// The protocol error that failed the connection. By the time this
    /// returns the close frame has been sent and the connection is CLOSED.
    pub async fn feed(&mut self, ws: &WebSocket, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        self.drain(ws).await
    }

    fn buffer_mut(&mut self) -> &mut BytesMut {
        self.buffer.buffer_mut()
    }

    /// Handle every complete frame in the buffer. Bytes that arrive before
    /// the connection is open stay buffered until it is.
    async fn drain(&mut self, ws: &WebSocket) -> Result<()> {
        while ws.state().can_receive() {
            let handled = match self.buffer.decode_next(&self.decoder) {
                Ok(Some(frame)) => self.handle(ws, frame).await,
                Ok(None) => return Ok(()),
                Err(err) => Err(err),
            };
            if let Err(err) = handled {
                self.assembler.reset();
                self.buffer.clear();
                ws.fail(&err).await;
                return Err(err);
            }
        }
        if ws.state() != ConnectionState::New {
            self.buffer.clear();
        }
        Ok(())
    }

    async fn handle(&mut self, ws: &WebSocket, frame: Frame) -> Result<()> {
        trace!(
            connection = %ws.id(),
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.payload().len(),
            "frame received"
        );
        let frame = ws.incoming(frame)?;

        match frame.opcode {
            OpCode::Ping => ws.handle_ping(frame.into_payload()).await,
            OpCode::Pong => ws.handle_pong(frame.into_payload()),
            OpCode::Close => ws.handle_close(frame.close_frame()?).await,
            _ => match self.assembler.feed(frame)? {
                MessageEvent::None => {}
                MessageEvent::Partial(fragment, last) => ws.deliver_fragment(fragment, last),
                MessageEvent::Complete(message) => ws.deliver(message),
            },
        }
        Ok(())
    }
}
