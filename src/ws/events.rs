//! Event names, payloads and the listener registry behind `on`/`once`/`off`.
//!
//! Emission iterates over a snapshot of the listener list, so handlers may register or remove
//! listeners (including themselves) while an event is being dispatched.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;

use super::types::response::{Envelope, InstrumentRate, PrivateEvent};
use crate::error::Error;

/// Name of an event emitted by the streaming client.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum EventKind {
    /// Connection established, before authentication
    #[strum(serialize = "open")]
    Open,
    #[strum(serialize = "authenticated")]
    Authenticated,
    /// Raw envelope batch, before routing
    #[strum(serialize = "message")]
    Message,
    #[strum(serialize = "instrument:rate")]
    InstrumentRate,
    #[strum(serialize = "private:event")]
    PrivateEvent,
    #[strum(serialize = "close")]
    Close,
    #[strum(serialize = "error")]
    Error,
}

/// Event payload handed to listeners.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    Open,
    Authenticated,
    Message(Arc<Envelope>),
    InstrumentRate {
        instrument_id: u64,
        rate: InstrumentRate,
    },
    PrivateEvent(Arc<PrivateEvent>),
    Close {
        code: u16,
        reason: String,
    },
    Error(Arc<Error>),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Authenticated => EventKind::Authenticated,
            Self::Message(_) => EventKind::Message,
            Self::InstrumentRate { .. } => EventKind::InstrumentRate,
            Self::PrivateEvent(_) => EventKind::PrivateEvent,
            Self::Close { .. } => EventKind::Close,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Handle returned by `on`/`once`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = dyn Fn(&Event) + Send + Sync;

struct Listener {
    id: ListenerId,
    handler: Box<Handler>,
    /// `Some` for `once` listeners; set when the listener has fired.
    fired: Option<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    by_kind: DashMap<EventKind, Vec<Arc<Listener>>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("kinds", &self.by_kind.len())
            .finish_non_exhaustive()
    }
}

impl Listeners {
    pub(crate) fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(kind, Box::new(handler), None)
    }

    pub(crate) fn once<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(kind, Box::new(handler), Some(AtomicBool::new(false)))
    }

    fn insert(
        &self,
        kind: EventKind,
        handler: Box<Handler>,
        fired: Option<AtomicBool>,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.by_kind.entry(kind).or_default().push(Arc::new(Listener {
            id,
            handler,
            fired,
        }));
        id
    }

    /// Removes one listener. Returns whether it was registered.
    pub(crate) fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let Some(mut listeners) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        before != listeners.len()
    }

    /// Removes every listener for `kind`, or every listener at all when `kind` is `None`.
    pub(crate) fn remove_all(&self, kind: Option<EventKind>) {
        match kind {
            Some(kind) => {
                self.by_kind.remove(&kind);
            }
            None => self.by_kind.clear(),
        }
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).map_or(0, |listeners| listeners.len())
    }

    /// Invokes every listener registered for the event's kind, in registration order.
    ///
    /// Returns whether any listener was registered.
    pub(crate) fn emit(&self, event: &Event) -> bool {
        let kind = event.kind();
        // The map guard must be released before handlers run so they can call `on`/`off`.
        let snapshot: Vec<Arc<Listener>> = match self.by_kind.get(&kind) {
            Some(listeners) => listeners.value().clone(),
            None => return false,
        };
        if snapshot.is_empty() {
            return false;
        }

        for listener in snapshot {
            if let Some(fired) = &listener.fired {
                if fired.swap(true, Ordering::AcqRel) {
                    continue;
                }
                self.off(kind, listener.id);
            }
            (listener.handler)(event);
        }

        true
    }
}
