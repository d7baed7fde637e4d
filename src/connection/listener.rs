//! Event listeners and their fan-out.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tracing::warn;

use crate::connection::WebSocket;
use crate::error::Error;
use crate::message::CloseFrame;

/// Observer of one connection's events.
///
/// Every method has a no-op default, so implementations only override what
/// they care about. Calls for one connection never overlap and arrive in
/// wire order. A panicking method is reported to the same listener's
/// [`on_error`](Self::on_error) as [`Error::ListenerPanicked`]; the other
/// listeners still see the event.
///
/// Methods run on the task driving the connection. To send from inside a
/// callback, clone the handle and spawn the send.
#[allow(unused_variables)]
pub trait Listener: Send + Sync {
    /// The upgrade completed and the connection is CONNECTED.
    fn on_open(&self, ws: &WebSocket) {}

    /// A complete text message.
    fn on_text(&self, ws: &WebSocket, text: &str) {}

    /// A complete binary message.
    fn on_binary(&self, ws: &WebSocket, data: &Bytes) {}

    /// One piece of a fragmented text message (streaming mode only).
    fn on_text_fragment(&self, ws: &WebSocket, text: &str, last: bool) {}

    /// One piece of a fragmented binary message (streaming mode only).
    fn on_binary_fragment(&self, ws: &WebSocket, data: &Bytes, last: bool) {}

    /// A ping arrived. The pong has already been sent.
    fn on_ping(&self, ws: &WebSocket, data: &Bytes) {}

    fn on_pong(&self, ws: &WebSocket, data: &Bytes) {}

    /// The connection reached CLOSED. Called exactly once per connection.
    ///
    /// `close` is the close frame that ended the connection, or `None` when
    /// the transport went away without one.
    fn on_close(&self, ws: &WebSocket, close: Option<&CloseFrame>) {}

    fn on_error(&self, ws: &WebSocket, error: &Error) {}
}

/// Handle returned by registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Entries = Arc<Vec<(ListenerId, Arc<dyn Listener>)>>;

/// Listeners in registration order.
///
/// Mutations replace the whole list, so a dispatch works on the snapshot it
/// started with: removing a listener mid-dispatch never disturbs the
/// iteration in progress.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: AtomicU64,
    entries: RwLock<Entries>,
}

impl ListenerSet {
    pub(crate) fn new(initial: Vec<Arc<dyn Listener>>) -> Self {
        let set = Self::default();
        for listener in initial {
            set.add(listener);
        }
        set
    }

    pub(crate) fn add(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, listener));
        *entries = Arc::new(next);
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Entries {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Call `event` on every listener in registration order.
    pub(crate) fn dispatch(&self, ws: &WebSocket, event: &str, f: impl Fn(&dyn Listener)) {
        for (id, listener) in self.snapshot().iter() {
            let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) else {
                continue;
            };
            let message = panic_message(payload.as_ref());
            warn!(connection = %ws.id(), listener = %id, event, panic = %message, "listener panicked");

            let error = Error::ListenerPanicked(message);
            if catch_unwind(AssertUnwindSafe(|| listener.on_error(ws, &error))).is_err() {
                warn!(connection = %ws.id(), listener = %id, "listener panicked in on_error");
            }
        }
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<ListenerId> = self.snapshot().iter().map(|(id, _)| *id).collect();
        f.debug_struct("ListenerSet").field("listeners", &ids).finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
