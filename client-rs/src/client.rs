//! Luna service client implementation

use crate::config::ClientConfig;
use crate::context::MainContext;
use crate::error::{BusError, ClientError, Result};
use crate::transport::{Bus, BusConnection, MessageToken, ReplyHandler, SubscriptionHandler};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, error, info};

/// Callback for a one-shot call, consumed by its single response
pub type ResponseCallback = Box<dyn FnOnce(&str)>;

/// Callback for a subscription, invoked once per event
pub type EventCallback = Box<dyn FnMut(&str)>;

/// Callback slot shared between a subscription record and its trampoline
#[derive(Default)]
struct EventSlot {
    callback: RefCell<Option<EventCallback>>,
    cleared: Cell<bool>,
}

impl EventSlot {
    fn new(callback: EventCallback) -> Self {
        Self {
            callback: RefCell::new(Some(callback)),
            cleared: Cell::new(false),
        }
    }

    fn fire(&self, payload: &str) {
        if self.cleared.get() {
            return;
        }
        // Taken out while running so the callback may unsubscribe itself.
        let taken = self.callback.borrow_mut().take();
        if let Some(mut callback) = taken {
            callback(payload);
            if !self.cleared.get() {
                *self.callback.borrow_mut() = Some(callback);
            }
        }
    }

    fn clear(&self) {
        self.cleared.set(true);
        let callback = self.callback.borrow_mut().take();
        drop(callback);
    }

    fn is_live(&self) -> bool {
        !self.cleared.get()
    }
}

/// An active subscription
pub struct PendingCall {
    uri: String,
    payload: String,
    slot: Rc<EventSlot>,
}

impl PendingCall {
    /// The method this subscription was issued to
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The request payload the subscription was issued with
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Whether the callback can still be invoked
    pub fn is_live(&self) -> bool {
        self.slot.is_live()
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("uri", &self.uri)
            .field("payload", &self.payload)
            .field("live", &self.is_live())
            .finish()
    }
}

/// In-flight one-shot call, owned by its trampoline
struct OneShotCall {
    uri: String,
    callback: ResponseCallback,
    log_payloads: bool,
}

impl OneShotCall {
    fn complete(self, reply: &str) {
        if self.log_payloads {
            debug!(uri = %self.uri, payload = reply, "[RES]");
        }
        (self.callback)(reply);
    }
}

/// Client for a Luna-style service bus
///
/// Registers the process as a service, issues one-shot calls and manages
/// subscriptions. Responses arrive as callbacks on the [`MainContext`] the
/// connection is attached to, which must be driven by the thread that owns
/// the client.
pub struct ServiceBusClient {
    config: ClientConfig,
    connection: Option<Box<dyn BusConnection>>,
    context: Option<MainContext>,
    pending: HashMap<MessageToken, PendingCall>,
}

impl ServiceBusClient {
    /// Register on `bus`, attached to the calling thread's default context
    ///
    /// Registration failures are logged and leave the client inert: every
    /// operation then fails with [`ClientError::NotRegistered`].
    pub fn new(bus: &dyn Bus, config: ClientConfig) -> Self {
        Self::with_context(bus, config, &MainContext::thread_default())
    }

    /// Register on `bus`, attached to `context`
    pub fn with_context(bus: &dyn Bus, config: ClientConfig, context: &MainContext) -> Self {
        match Self::register_service(bus, &config, context) {
            Ok((connection, context)) => Self::from_parts(config, Some(connection), Some(context)),
            Err(_) => {
                info!(identity = %config.identity, "Failed to register service");
                Self::from_parts(config, None, None)
            }
        }
    }

    /// Register on `bus`, returning the registration error instead of an inert client
    pub fn register(bus: &dyn Bus, config: ClientConfig, context: &MainContext) -> Result<Self> {
        let (connection, context) = Self::register_service(bus, &config, context)?;
        Ok(Self::from_parts(config, Some(connection), Some(context)))
    }

    fn from_parts(
        config: ClientConfig,
        connection: Option<Box<dyn BusConnection>>,
        context: Option<MainContext>,
    ) -> Self {
        Self {
            config,
            connection,
            context,
            pending: HashMap::new(),
        }
    }

    /// Whether the client holds a live bus connection
    pub fn is_registered(&self) -> bool {
        self.connection.is_some()
    }

    /// Name the connection is registered under
    pub fn service_name(&self) -> Option<&str> {
        self.connection.as_deref().map(|connection| connection.name())
    }

    /// The context responses are delivered on
    pub fn context(&self) -> Option<&MainContext> {
        self.context.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fire-and-forget call
    pub fn call_async(&mut self, uri: &str, payload: &str) -> Result<()> {
        self.call_async_with(uri, payload, |_| {})
    }

    /// Issue a one-shot call
    ///
    /// On success `callback` runs exactly once, later, on the event loop. If
    /// the bus rejects the call, `callback` runs immediately with an empty
    /// payload and the submission error is returned.
    pub fn call_async_with<F>(&mut self, uri: &str, payload: &str, callback: F) -> Result<()>
    where
        F: FnOnce(&str) + 'static,
    {
        let log_payloads = self.config.log_payloads;
        let connection = self.connection.as_mut().ok_or(ClientError::NotRegistered)?;

        let call = OneShotCall {
            uri: uri.to_string(),
            callback: Box::new(callback),
            log_payloads,
        };
        let trampoline: ReplyHandler = Box::new(move |reply: &str| call.complete(reply));

        if log_payloads {
            debug!(uri, payload, "[REQ]");
        }

        match connection.call_one_reply(uri, payload, trampoline) {
            Ok(token) => {
                debug!(uri, token = %token, "Call submitted");
                Ok(())
            }
            Err(rejected) => {
                log_bus_error("Fail to call", &rejected.error);
                (rejected.handler)("");
                Err(ClientError::Submission {
                    uri: uri.to_string(),
                    source: rejected.error,
                })
            }
        }
    }

    /// Subscribe to `uri`
    ///
    /// `callback` runs once per event until [`unsubscribe`](Self::unsubscribe)
    /// is called with the returned token.
    pub fn subscribe<F>(&mut self, uri: &str, payload: &str, callback: F) -> Result<MessageToken>
    where
        F: FnMut(&str) + 'static,
    {
        let log_payloads = self.config.log_payloads;
        let connection = self.connection.as_mut().ok_or(ClientError::NotRegistered)?;

        let slot = Rc::new(EventSlot::new(Box::new(callback)));
        let trampoline: SubscriptionHandler = {
            let slot = slot.clone();
            let uri = uri.to_string();
            Box::new(move |reply: &str| {
                if log_payloads {
                    debug!(uri = %uri, payload = reply, "[SUB-RES]");
                }
                slot.fire(reply);
            })
        };

        match connection.call(uri, payload, trampoline) {
            Ok(token) => {
                debug!(uri, token = %token, "[SUB]");
                self.pending.insert(
                    token,
                    PendingCall {
                        uri: uri.to_string(),
                        payload: payload.to_string(),
                        slot,
                    },
                );
                Ok(token)
            }
            Err(rejected) => {
                info!(
                    uri,
                    payload,
                    error = %rejected.error.message,
                    "[SUB] subscribe failed"
                );
                Err(ClientError::Submission {
                    uri: uri.to_string(),
                    source: rejected.error,
                })
            }
        }
    }

    /// Cancel a subscription
    ///
    /// The local record is dropped even when the bus cannot confirm the
    /// cancellation. Succeeds whenever the bus confirms, including for tokens
    /// this client does not hold.
    pub fn unsubscribe(&mut self, token: MessageToken) -> Result<()> {
        let connection = self.connection.as_mut().ok_or(ClientError::NotRegistered)?;

        if let Err(e) = connection.cancel(token) {
            info!(token = %token, error = %e.message, "[UNSUB] cancel failed");
            if let Some(call) = self.pending.remove(&token) {
                call.slot.clear();
            }
            return Err(ClientError::Cancellation { token, source: e });
        }

        // Clear before erase: a dispatch racing with the erase must find no callback.
        if let Some(call) = self.pending.get(&token) {
            call.slot.clear();
        }
        self.pending.remove(&token);

        debug!(token = %token, "[UNSUB]");
        Ok(())
    }

    /// Number of active subscriptions
    pub fn subscription_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_subscribed(&self, token: MessageToken) -> bool {
        self.pending.contains_key(&token)
    }

    /// The record for an active subscription
    pub fn subscription(&self, token: MessageToken) -> Option<&PendingCall> {
        self.pending.get(&token)
    }

    /// Tokens of all active subscriptions
    pub fn subscription_tokens(&self) -> Vec<MessageToken> {
        let mut tokens: Vec<MessageToken> = self.pending.keys().copied().collect();
        tokens.sort();
        tokens
    }

    /// Remove the service from the bus and release the event loop
    ///
    /// The context reference is released even when the bus reports a
    /// failure. Active subscriptions are dropped.
    pub fn unregister_service(&mut self) -> Result<()> {
        let connection = self.connection.take().ok_or(ClientError::NotRegistered)?;

        for (_, call) in self.pending.drain() {
            call.slot.clear();
        }

        let result = connection.unregister();
        self.context = None;

        result.map_err(|e| {
            log_bus_error("Fail to unregister service", &e);
            ClientError::Unregister(e)
        })
    }

    fn register_service(
        bus: &dyn Bus,
        config: &ClientConfig,
        context: &MainContext,
    ) -> Result<(Box<dyn BusConnection>, MainContext)> {
        let service_name = config.service_name();

        let mut connection = bus
            .register(&service_name, config.effective_app_id())
            .map_err(|e| {
                log_bus_error("Fail to register to LS2", &e);
                ClientError::Registration(e)
            })?;

        let context = context.clone();
        if let Err(e) = connection.attach(&context) {
            log_bus_error("Fail to attach a service to a mainloop", &e);
            if let Err(unregister_err) = connection.unregister() {
                log_bus_error("Fail to unregister service", &unregister_err);
            }
            return Err(ClientError::Attach(e));
        }

        info!(service = %service_name, "Registered service");
        Ok((connection, context))
    }
}

impl Drop for ServiceBusClient {
    fn drop(&mut self) {
        if self.connection.is_some() {
            let _ = self.unregister_service();
        }
    }
}

impl std::fmt::Debug for ServiceBusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBusClient")
            .field("identity", &self.config.identity)
            .field("service_name", &self.service_name())
            .field("subscriptions", &self.pending.len())
            .finish()
    }
}

fn log_bus_error(message: &str, e: &BusError) {
    error!(
        error_code = e.code,
        function = e.function,
        file = e.file,
        line = e.line,
        "{} : {}",
        message,
        e.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_slot_fires_until_cleared() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let slot = EventSlot::new(Box::new(move |p: &str| sink.borrow_mut().push(p.to_string())));

        slot.fire("a");
        slot.fire("b");
        slot.clear();
        slot.fire("c");

        assert_eq!(*seen.borrow(), vec!["a".to_string(), "b".to_string()]);
        assert!(!slot.is_live());
    }

    #[test]
    fn test_event_slot_cleared_from_inside_callback() {
        let slot = Rc::new(EventSlot::default());
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let inner = Rc::downgrade(&slot);

        *slot.callback.borrow_mut() = Some(Box::new(move |_: &str| {
            counter.set(counter.get() + 1);
            if let Some(slot) = inner.upgrade() {
                slot.clear();
            }
        }));

        slot.fire("x");
        slot.fire("y");

        assert_eq!(count.get(), 1);
        assert!(slot.callback.borrow().is_none());
    }

    struct NoBus;

    impl Bus for NoBus {
        fn register(&self, _: &str, _: &str) -> std::result::Result<Box<dyn BusConnection>, BusError> {
            Err(BusError::new(-1, "transport unavailable", "LSRegister"))
        }
    }

    #[test]
    fn test_inert_client_rejects_everything() {
        let ctx = MainContext::new();
        let mut client = ServiceBusClient::with_context(&NoBus, ClientConfig::new("com.example.test"), &ctx);

        assert!(!client.is_registered());
        assert!(client.service_name().is_none());
        assert_eq!(ctx.ref_count(), 1);
        assert_eq!(client.call_async("luna://x/method", "{}"), Err(ClientError::NotRegistered));
        assert_eq!(
            client.subscribe("luna://x/watch", "{}", |_| {}),
            Err(ClientError::NotRegistered)
        );
        assert_eq!(client.unsubscribe(MessageToken::new(1)), Err(ClientError::NotRegistered));
        assert_eq!(client.unregister_service(), Err(ClientError::NotRegistered));
    }

    #[test]
    fn test_register_surfaces_error() {
        let ctx = MainContext::new();
        let err = ServiceBusClient::register(&NoBus, ClientConfig::new("com.example.test"), &ctx)
            .unwrap_err();
        assert!(matches!(err, ClientError::Registration(ref e) if e.function == "LSRegister"));
    }
}
