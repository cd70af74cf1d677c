//! In-process service bus
//!
//! Registers named connections, routes calls to service providers and
//! delivers responses on each caller's event loop. Any number of clients and
//! providers can share one [`LocalBus`].

mod connections;
mod provider;
mod router;

pub use connections::{ConnectionId, ConnectionInfo, ConnectionRegistry, RegistryError};
pub use provider::{MethodHandler, Request, Responder, ServiceProvider};
pub use router::{CallRouter, RoutedCall};

use crate::uri::ServiceUri;
use luna_service_client::{
    Bus, BusConnection, BusError, CallRejected, HandlerTable, MainContext, MessageToken,
    ReplyEndpoint, ReplyHandler, SubscriptionHandler,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The bus transport is unavailable
pub const ERROR_CODE_OFFLINE: i32 = -1001;
/// The service name failed validation
pub const ERROR_CODE_INVALID_NAME: i32 = -1002;
/// The service name is taken by another connection
pub const ERROR_CODE_DUPLICATE_NAME: i32 = -1003;
/// The call URI failed validation
pub const ERROR_CODE_INVALID_URI: i32 = -1004;
/// The connection has no event loop to deliver responses on
pub const ERROR_CODE_NOT_ATTACHED: i32 = -1005;
/// The token does not name a call of this connection
pub const ERROR_CODE_INVALID_TOKEN: i32 = -1006;

struct Hub {
    online: AtomicBool,
    connections: ConnectionRegistry,
    router: CallRouter,
}

impl Hub {
    #[track_caller]
    fn ensure_online(&self, function: &'static str) -> Result<(), BusError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::new(ERROR_CODE_OFFLINE, "Transport is offline", function))
        }
    }
}

/// Handle to an in-process bus
///
/// Cheaply cloneable; clones share the same bus.
#[derive(Clone)]
pub struct LocalBus {
    hub: Arc<Hub>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub {
                online: AtomicBool::new(true),
                connections: ConnectionRegistry::new(),
                router: CallRouter::new(),
            }),
        }
    }

    /// Take the transport up or down
    ///
    /// While offline, registration, calls, cancellation and unregistration
    /// all fail. Responses already queued are still delivered.
    pub fn set_online(&self, online: bool) {
        info!(online, "Bus transport state changed");
        self.hub.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.hub.online.load(Ordering::SeqCst)
    }

    /// Get or create the provider that answers calls to `service`
    pub fn provide(&self, service: &str) -> Arc<ServiceProvider> {
        self.hub.router.provide(service)
    }

    /// Stop answering calls to `service`
    pub fn withdraw(&self, service: &str) -> bool {
        self.hub.router.withdraw(service)
    }

    /// Whether a connection is registered under `service_name`
    pub fn is_registered(&self, service_name: &str) -> bool {
        self.hub.connections.find_by_name(service_name).is_some()
    }

    /// Names of all registered connections
    pub fn registered_names(&self) -> Vec<String> {
        self.hub.connections.names()
    }

    pub fn connection_count(&self) -> usize {
        self.hub.connections.count()
    }

    /// Number of live subscriptions across all connections
    pub fn subscription_count(&self) -> usize {
        self.hub.router.subscription_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for LocalBus {
    fn register(
        &self,
        service_name: &str,
        app_id: &str,
    ) -> Result<Box<dyn BusConnection>, BusError> {
        self.hub.ensure_online("LSRegister")?;

        let info = self
            .hub
            .connections
            .register(service_name, app_id)
            .map_err(|e| {
                let code = match e {
                    RegistryError::InvalidName(_) => ERROR_CODE_INVALID_NAME,
                    RegistryError::Duplicate(_) => ERROR_CODE_DUPLICATE_NAME,
                };
                BusError::new(code, e.to_string(), "LSRegister")
            })?;

        debug!(service = %info.service_name, connection = %info.id, "Connection registered");

        Ok(Box::new(LocalConnection {
            hub: self.hub.clone(),
            info,
            table: HandlerTable::new(),
            closed: false,
        }))
    }
}

/// A connection registered on a [`LocalBus`]
struct LocalConnection {
    hub: Arc<Hub>,
    info: Arc<ConnectionInfo>,
    table: HandlerTable,
    closed: bool,
}

impl LocalConnection {
    fn prepare(&self, uri: &str, function: &'static str) -> Result<(ServiceUri, ReplyEndpoint), BusError> {
        self.hub.ensure_online(function)?;

        let uri = ServiceUri::parse(uri).map_err(|e| {
            BusError::new(ERROR_CODE_INVALID_URI, format!("Invalid URI: {}", e), function)
        })?;

        let endpoint = self.table.endpoint().ok_or_else(|| {
            BusError::new(
                ERROR_CODE_NOT_ATTACHED,
                "Connection is not attached to a mainloop",
                function,
            )
        })?;

        Ok((uri, endpoint))
    }

    fn route(&self, uri: ServiceUri, payload: &str, token: MessageToken, endpoint: ReplyEndpoint, subscribe: bool) {
        self.hub.router.route(RoutedCall {
            connection: self.info.id,
            sender: self.info.service_name.clone(),
            uri,
            payload: payload.to_string(),
            token,
            endpoint,
            subscribe,
        });
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.table.detach();
        self.table.clear();
        let dropped = self.hub.router.drop_connection(self.info.id);
        self.hub.connections.remove(self.info.id);

        debug!(
            service = %self.info.service_name,
            connection = %self.info.id,
            subscriptions = dropped,
            "Connection removed"
        );
    }
}

impl BusConnection for LocalConnection {
    fn name(&self) -> &str {
        &self.info.service_name
    }

    fn attach(&mut self, context: &MainContext) -> Result<(), BusError> {
        self.table.attach(context)
    }

    fn call_one_reply(
        &mut self,
        uri: &str,
        payload: &str,
        handler: ReplyHandler,
    ) -> Result<MessageToken, CallRejected<ReplyHandler>> {
        let (uri, endpoint) = match self.prepare(uri, "LSCallOneReply") {
            Ok(prepared) => prepared,
            Err(e) => return Err(CallRejected::new(e, handler)),
        };

        let token = self.hub.router.next_token();
        self.table.insert_one_shot(token, handler);
        self.route(uri, payload, token, endpoint, false);
        Ok(token)
    }

    fn call(
        &mut self,
        uri: &str,
        payload: &str,
        handler: SubscriptionHandler,
    ) -> Result<MessageToken, CallRejected<SubscriptionHandler>> {
        let (uri, endpoint) = match self.prepare(uri, "LSCall") {
            Ok(prepared) => prepared,
            Err(e) => return Err(CallRejected::new(e, handler)),
        };

        let token = self.hub.router.next_token();
        self.table.insert_subscription(token, handler);
        self.route(uri, payload, token, endpoint, true);
        Ok(token)
    }

    fn cancel(&mut self, token: MessageToken) -> Result<(), BusError> {
        self.hub.ensure_online("LSCallCancel")?;

        let subscribed = self.hub.router.cancel(self.info.id, token);
        let pending = self.table.remove(token);
        if !subscribed && !pending {
            return Err(BusError::new(
                ERROR_CODE_INVALID_TOKEN,
                format!("Invalid message token: {}", token),
                "LSCallCancel",
            ));
        }
        Ok(())
    }

    fn unregister(mut self: Box<Self>) -> Result<(), BusError> {
        let online = self.hub.ensure_online("LSUnregister");
        self.teardown();
        if let Err(e) = &online {
            warn!(service = %self.info.service_name, error = %e, "Unregister while offline");
        }
        online
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.teardown();
    }
}
