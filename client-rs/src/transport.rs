//! Seam between the client and a bus library
//!
//! A bus library registers named connections, attaches them to an event loop
//! and carries one-shot calls and subscriptions. Responses are handed back
//! through trampolines the client passes in with every call.

use crate::context::{Dispatch, DispatchSender, MainContext, SourceId};
use crate::error::{BusError, BUS_ERROR_GENERIC};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Opaque token the bus issues for every call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageToken(u64);

impl MessageToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trampoline for a one-shot call, consumed by the single response
pub type ReplyHandler = Box<dyn FnOnce(&str)>;

/// Trampoline for a subscription, invoked once per bus event
pub type SubscriptionHandler = Box<dyn FnMut(&str)>;

/// A call the bus refused synchronously
///
/// The unused trampoline comes back to the caller.
pub struct CallRejected<H> {
    pub error: BusError,
    pub handler: H,
}

impl<H> CallRejected<H> {
    pub fn new(error: BusError, handler: H) -> Self {
        Self { error, handler }
    }
}

impl<H> fmt::Debug for CallRejected<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// A bus library capable of registering service connections
pub trait Bus {
    /// Register `service_name` on the bus
    fn register(&self, service_name: &str, app_id: &str)
        -> Result<Box<dyn BusConnection>, BusError>;
}

/// A registered connection to the bus
pub trait BusConnection {
    /// The name this connection is registered under
    fn name(&self) -> &str;

    /// Attach the connection to an event loop; responses are delivered there
    fn attach(&mut self, context: &MainContext) -> Result<(), BusError>;

    /// Issue a call that expects exactly one response
    fn call_one_reply(
        &mut self,
        uri: &str,
        payload: &str,
        handler: ReplyHandler,
    ) -> Result<MessageToken, CallRejected<ReplyHandler>>;

    /// Issue a call that may produce any number of responses
    fn call(
        &mut self,
        uri: &str,
        payload: &str,
        handler: SubscriptionHandler,
    ) -> Result<MessageToken, CallRejected<SubscriptionHandler>>;

    /// Cancel the call identified by `token`
    fn cancel(&mut self, token: MessageToken) -> Result<(), BusError>;

    /// Remove the connection from the bus
    fn unregister(self: Box<Self>) -> Result<(), BusError>;
}

/// Where a bus posts responses for one attached connection
///
/// Cheap to clone and safe to move to other threads.
#[derive(Debug, Clone)]
pub struct ReplyEndpoint {
    source: SourceId,
    sender: DispatchSender,
}

impl ReplyEndpoint {
    /// Queue `payload` for the trampoline registered under `token`
    pub fn post(&self, token: MessageToken, payload: impl Into<String>) -> bool {
        self.sender.post(self.source, token, payload)
    }
}

enum Handler {
    OneShot(ReplyHandler),
    Subscription(Rc<RefCell<SubscriptionHandler>>),
}

enum Ready {
    Once(ReplyHandler),
    Repeat(Rc<RefCell<SubscriptionHandler>>),
}

struct Attachment {
    context: MainContext,
    source: SourceId,
}

#[derive(Default)]
struct TableInner {
    handlers: RefCell<HashMap<MessageToken, Handler>>,
    attachment: RefCell<Option<Attachment>>,
}

/// Per-connection table of trampolines
///
/// Bus implementations embed one of these: it attaches a source to the
/// event loop, stores each trampoline under its token and runs it when a
/// dispatch for that token arrives. One-shot trampolines leave the table
/// before they run. Dispatches for tokens no longer in the table are dropped.
#[derive(Clone, Default)]
pub struct HandlerTable {
    inner: Rc<TableInner>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a dispatch source on `context`
    pub fn attach(&self, context: &MainContext) -> Result<(), BusError> {
        if self.is_attached() {
            return Err(BusError::new(
                BUS_ERROR_GENERIC,
                "Connection is already attached to a mainloop",
                "LSGmainContextAttach",
            ));
        }

        let table: Weak<TableInner> = Rc::downgrade(&self.inner);
        let source = context.add_source(move |dispatch: Dispatch| {
            if let Some(inner) = table.upgrade() {
                HandlerTable { inner }.deliver(dispatch.token, &dispatch.payload);
            }
        });

        *self.inner.attachment.borrow_mut() = Some(Attachment {
            context: context.clone(),
            source,
        });
        Ok(())
    }

    /// Remove the dispatch source and release the context
    pub fn detach(&self) -> bool {
        match self.inner.attachment.borrow_mut().take() {
            Some(attachment) => attachment.context.remove_source(attachment.source),
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attachment.borrow().is_some()
    }

    /// Endpoint for posting responses, if attached
    pub fn endpoint(&self) -> Option<ReplyEndpoint> {
        self.inner
            .attachment
            .borrow()
            .as_ref()
            .map(|attachment| ReplyEndpoint {
                source: attachment.source,
                sender: attachment.context.sender(),
            })
    }

    pub fn insert_one_shot(&self, token: MessageToken, handler: ReplyHandler) {
        self.inner
            .handlers
            .borrow_mut()
            .insert(token, Handler::OneShot(handler));
    }

    pub fn insert_subscription(&self, token: MessageToken, handler: SubscriptionHandler) {
        self.inner
            .handlers
            .borrow_mut()
            .insert(token, Handler::Subscription(Rc::new(RefCell::new(handler))));
    }

    /// Drop the trampoline for `token`; returns whether one was present
    pub fn remove(&self, token: MessageToken) -> bool {
        self.inner.handlers.borrow_mut().remove(&token).is_some()
    }

    pub fn contains(&self, token: MessageToken) -> bool {
        self.inner.handlers.borrow().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every trampoline
    pub fn clear(&self) {
        let drained: Vec<Handler> = self
            .inner
            .handlers
            .borrow_mut()
            .drain()
            .map(|(_, handler)| handler)
            .collect();
        drop(drained);
    }

    /// Run the trampoline for `token` with `payload`
    ///
    /// The table is not borrowed while the trampoline runs, so it may issue
    /// or cancel calls on the same connection.
    pub fn deliver(&self, token: MessageToken, payload: &str) -> bool {
        let ready = {
            let mut handlers = self.inner.handlers.borrow_mut();
            match handlers.remove(&token) {
                Some(Handler::OneShot(handler)) => Some(Ready::Once(handler)),
                Some(Handler::Subscription(handler)) => {
                    let again = handler.clone();
                    handlers.insert(token, Handler::Subscription(handler));
                    Some(Ready::Repeat(again))
                }
                None => None,
            }
        };

        match ready {
            Some(Ready::Once(handler)) => {
                handler(payload);
                true
            }
            Some(Ready::Repeat(handler)) => match handler.try_borrow_mut() {
                Ok(mut handler) => {
                    (&mut **handler)(payload);
                    true
                }
                Err(_) => {
                    warn!(token = %token, "Subscription handler re-entered, dropping event");
                    false
                }
            },
            None => {
                trace!(token = %token, "No handler for token");
                false
            }
        }
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}
