//! Frame dispatch.
//!
//! Handlers subscribe either to every frame or to one [`EventType`]. A
//! dispatch round invokes general handlers first, then keyed handlers, each
//! group in registration order.
//!
//! # Invariants
//!
//! - The handler set is snapshotted when a round starts. Handlers present at
//!   that point run exactly once for the frame; handlers registered during
//!   the round first see the next frame.
//! - A handler disposed during a round does not run in later rounds.
//! - A handler that errors never prevents the others from running.
//! - A handler already on the stack (a handler that dispatches from inside
//!   itself) is skipped for the nested round.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::{Rc, Weak},
};

use collab_proto::{EventType, Frame, ProtocolError};

use crate::error::HandlerError;

type HandlerFn = dyn FnMut(&Frame) -> Result<(), HandlerError>;

#[derive(Clone)]
struct Entry {
    id: u64,
    handler: Rc<RefCell<HandlerFn>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    general: Vec<Entry>,
    keyed: BTreeMap<EventType, Vec<Entry>>,
}

impl Registry {
    fn insert(&mut self, key: Option<EventType>, handler: Rc<RefCell<HandlerFn>>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let entry = Entry { id, handler };
        match key {
            None => self.general.push(entry),
            Some(event_type) => self.keyed.entry(event_type).or_default().push(entry),
        }
        id
    }

    fn remove(&mut self, key: Option<EventType>, id: u64) -> bool {
        let entries = match key {
            None => &mut self.general,
            Some(event_type) => match self.keyed.get_mut(&event_type) {
                Some(entries) => entries,
                None => return false,
            },
        };

        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        before != entries.len()
    }

    fn snapshot(&self, kind: Option<EventType>) -> Vec<Entry> {
        let mut entries = self.general.clone();
        if let Some(keyed) = kind.and_then(|k| self.keyed.get(&k)) {
            entries.extend(keyed.iter().cloned());
        }
        entries
    }

    fn len(&self) -> usize {
        self.general.len() + self.keyed.values().map(Vec::len).sum::<usize>()
    }
}

/// Outcome of one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned `Err`.
    pub failed: usize,
    /// Handlers skipped because they were already running.
    pub skipped: usize,
}

/// Routes frames to subscribed handlers.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct MessageDispatcher {
    registry: Rc<RefCell<Registry>>,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher").field("handlers", &self.handler_count()).finish()
    }
}

impl MessageDispatcher {
    /// Create a dispatcher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every frame, including unknown ones.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(&Frame) -> Result<(), HandlerError> + 'static,
    {
        self.register(None, Rc::new(RefCell::new(handler)))
    }

    /// Subscribe to frames tagged `event_type`.
    pub fn subscribe_to<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: FnMut(&Frame) -> Result<(), HandlerError> + 'static,
    {
        self.register(Some(event_type), Rc::new(RefCell::new(handler)))
    }

    fn register(&self, key: Option<EventType>, handler: Rc<RefCell<HandlerFn>>) -> Subscription {
        let id = self.registry.borrow_mut().insert(key, handler);
        Subscription {
            registry: Rc::downgrade(&self.registry),
            key,
            id,
            disposed: Cell::new(false),
        }
    }

    /// Deliver `frame` to its handlers.
    pub fn dispatch(&self, frame: &Frame) -> DispatchReport {
        let snapshot = self.registry.borrow().snapshot(frame.kind());
        let mut report = DispatchReport::default();

        for entry in snapshot {
            let Ok(mut handler) = entry.handler.try_borrow_mut() else {
                tracing::warn!(
                    handler = entry.id,
                    event_type = frame.event_type(),
                    "skipping re-entrant handler"
                );
                report.skipped += 1;
                continue;
            };

            match (&mut *handler)(frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(handler = entry.id, event_type = frame.event_type(), "{e}");
                    report.failed += 1;
                },
            }
        }

        report
    }

    /// Decode `text` and dispatch it.
    pub fn dispatch_text(&self, text: &str) -> Result<DispatchReport, ProtocolError> {
        let frame = Frame::decode(text)?;
        Ok(self.dispatch(&frame))
    }

    /// Remove every registration. Outstanding [`Subscription`]s become
    /// no-ops.
    pub fn clear(&self) {
        let mut registry = self.registry.borrow_mut();
        registry.general.clear();
        registry.keyed.clear();
    }

    /// Number of live registrations.
    pub fn handler_count(&self) -> usize {
        self.registry.borrow().len()
    }
}

/// Handle to one registration.
///
/// Dropping a `Subscription` leaves the handler registered; call
/// [`dispose`](Self::dispose) to remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    key: Option<EventType>,
    id: u64,
    disposed: Cell<bool>,
}

impl Subscription {
    /// Remove the handler. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().remove(self.key, self.id);
        }
    }

    /// Whether the handler is still registered.
    pub fn is_active(&self) -> bool {
        if self.disposed.get() {
            return false;
        }
        self.registry.upgrade().is_some_and(|registry| {
            let registry = registry.borrow();
            let entries = match self.key {
                None => Some(&registry.general),
                Some(event_type) => registry.keyed.get(&event_type),
            };
            entries.is_some_and(|entries| entries.iter().any(|entry| entry.id == self.id))
        })
    }
}
