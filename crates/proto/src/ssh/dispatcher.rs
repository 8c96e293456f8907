//! Inbound payload routing.
//!
//! Above the transport, services claim message number ranges by
//! [`MessageClass`]: user authentication owns 50-79, the connection
//! service 80-127. The dispatcher is a plain registry the embedder fills
//! in; nothing is discovered at runtime, and an unclaimed payload is
//! reported as such rather than dropped so the caller can answer with
//! UNIMPLEMENTED.

use std::collections::HashMap;
use std::sync::Arc;

use skiff_platform::SkiffResult;

use super::message::MessageClass;

/// A service handling one class of inbound payloads.
pub trait PayloadHandler: Send + Sync {
    /// Handles one payload, optionally producing a reply payload for the
    /// transport to send.
    fn handle(&self, msg_type: u8, payload: &[u8]) -> SkiffResult<Option<Vec<u8>>>;
}

/// What became of a dispatched payload.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler consumed it; the reply, if any, should be sent back.
    Handled(Option<Vec<u8>>),
    /// No handler claims this message class.
    Unhandled,
}

/// Message-class keyed handler registry.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageClass, Arc<dyn PayloadHandler>>,
}

impl Dispatcher {
    /// An empty dispatcher; every payload is unhandled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a message class. A later registration for the same class
    /// replaces the earlier one.
    pub fn register(&mut self, class: MessageClass, handler: Arc<dyn PayloadHandler>) {
        self.handlers.insert(class, handler);
    }

    /// True if some handler claims `class`.
    pub fn claims(&self, class: MessageClass) -> bool {
        self.handlers.contains_key(&class)
    }

    /// Routes one payload by the class of its leading message type byte.
    pub fn dispatch(&self, payload: &[u8]) -> SkiffResult<DispatchOutcome> {
        let msg_type = payload.first().copied().unwrap_or(0);
        match self.handlers.get(&MessageClass::of(msg_type)) {
            Some(handler) => Ok(DispatchOutcome::Handled(handler.handle(msg_type, payload)?)),
            None => Ok(DispatchOutcome::Unhandled),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let classes: Vec<_> = self.handlers.keys().collect();
        f.debug_struct("Dispatcher").field("classes", &classes).finish()
    }
}
