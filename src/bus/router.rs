//! Call routing to service providers

use crate::bus::connections::ConnectionId;
use crate::bus::provider::{Request, Responder, ServiceProvider};
use crate::uri::ServiceUri;
use dashmap::DashMap;
use luna_service_client::{BusReply, MessageToken, ReplyEndpoint};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A call ready to be routed
pub struct RoutedCall {
    pub connection: ConnectionId,
    pub sender: String,
    pub uri: ServiceUri,
    pub payload: String,
    pub token: MessageToken,
    pub endpoint: ReplyEndpoint,
    pub subscribe: bool,
}

struct SubscriptionRecord {
    connection: ConnectionId,
    live: Arc<AtomicBool>,
}

/// Routes calls to providers and tracks live subscriptions
#[derive(Default)]
pub struct CallRouter {
    providers: DashMap<String, Arc<ServiceProvider>>,
    subscriptions: DashMap<MessageToken, SubscriptionRecord>,
    next_token: AtomicU64,
}

impl CallRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the provider for `service`
    pub fn provide(&self, service: &str) -> Arc<ServiceProvider> {
        self.providers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(ServiceProvider::new(service)))
            .clone()
    }

    /// Remove the provider for `service`
    pub fn withdraw(&self, service: &str) -> bool {
        self.providers.remove(service).is_some()
    }

    pub fn has_provider(&self, service: &str) -> bool {
        self.providers.contains_key(service)
    }

    /// Issue a fresh token; tokens are never reused
    pub fn next_token(&self) -> MessageToken {
        MessageToken::new(self.next_token.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Route a call to its provider
    ///
    /// Unknown services and methods are answered with an error reply. The
    /// handler runs on the calling thread; its responses are delivered later
    /// on the caller's event loop.
    pub fn route(&self, call: RoutedCall) {
        let live = Arc::new(AtomicBool::new(true));
        if call.subscribe {
            self.subscriptions.insert(
                call.token,
                SubscriptionRecord {
                    connection: call.connection,
                    live: live.clone(),
                },
            );
        }

        let responder = Responder::new(call.token, call.endpoint, live, !call.subscribe);

        // Clone out so no map guard is held while the handler runs.
        let provider = self.providers.get(call.uri.service()).map(|p| p.clone());
        let Some(provider) = provider else {
            debug!(uri = %call.uri, token = %call.token, "Service does not exist");
            responder.respond(BusReply::service_missing(call.uri.service()).to_payload());
            return;
        };

        let Some(handler) = provider.handler(call.uri.method()) else {
            debug!(uri = %call.uri, token = %call.token, "Unknown method");
            responder.respond(
                BusReply::method_missing(call.uri.method(), call.uri.service()).to_payload(),
            );
            return;
        };

        debug!(
            uri = %call.uri,
            token = %call.token,
            sender = %call.sender,
            subscribe = call.subscribe,
            "Routing call"
        );

        handler.handle(Request {
            sender: call.sender,
            method: call.uri.method().to_string(),
            payload: call.payload,
            subscribe: call.subscribe,
            responder,
        });
    }

    /// Cancel a subscription owned by `connection`
    pub fn cancel(&self, connection: ConnectionId, token: MessageToken) -> bool {
        match self
            .subscriptions
            .remove_if(&token, |_, record| record.connection == connection)
        {
            Some((_, record)) => {
                record.live.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Cancel every subscription owned by `connection`
    pub fn drop_connection(&self, connection: ConnectionId) -> usize {
        let mut dropped = 0;
        self.subscriptions.retain(|_, record| {
            if record.connection == connection {
                record.live.store(false, Ordering::SeqCst);
                dropped += 1;
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Get the number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luna_service_client::{HandlerTable, MainContext};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn attached() -> (MainContext, HandlerTable, ReplyEndpoint) {
        let ctx = MainContext::new();
        let table = HandlerTable::new();
        table.attach(&ctx).unwrap();
        let endpoint = table.endpoint().unwrap();
        (ctx, table, endpoint)
    }

    fn call(router: &CallRouter, uri: &str, endpoint: &ReplyEndpoint, subscribe: bool) -> MessageToken {
        let token = router.next_token();
        router.route(RoutedCall {
            connection: ConnectionId::new(1),
            sender: "com.example.caller".to_string(),
            uri: ServiceUri::parse(uri).unwrap(),
            payload: "{}".to_string(),
            token,
            endpoint: endpoint.clone(),
            subscribe,
        });
        token
    }

    #[test]
    fn test_missing_service_gets_error_reply() {
        let router = CallRouter::new();
        let (ctx, table, endpoint) = attached();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let token = router.next_token();
        let sink = seen.clone();
        table.insert_one_shot(token, Box::new(move |p: &str| sink.borrow_mut().push(p.to_string())));
        router.route(RoutedCall {
            connection: ConnectionId::new(1),
            sender: "com.example.caller".to_string(),
            uri: ServiceUri::parse("luna://com.example.gone/get").unwrap(),
            payload: "{}".to_string(),
            token,
            endpoint,
            subscribe: false,
        });

        assert_eq!(ctx.run_until_idle(), 1);
        let reply = BusReply::parse(&seen.borrow()[0]).unwrap();
        assert!(!reply.return_value);
        assert_eq!(router.subscription_count(), 0);
    }

    #[test]
    fn test_cancel_requires_owning_connection() {
        let router = CallRouter::new();
        router.provide("com.example.feed").method("/watch", |_req: Request| {});
        let (_ctx, _table, endpoint) = attached();

        let token = call(&router, "luna://com.example.feed/watch", &endpoint, true);
        assert_eq!(router.subscription_count(), 1);

        assert!(!router.cancel(ConnectionId::new(2), token));
        assert!(router.cancel(ConnectionId::new(1), token));
        assert!(!router.cancel(ConnectionId::new(1), token));
        assert_eq!(router.subscription_count(), 0);
    }

    #[test]
    fn test_drop_connection_deactivates_responders() {
        let router = CallRouter::new();
        let kept = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = kept.clone();
        router
            .provide("com.example.feed")
            .method("/watch", move |req: Request| sink.lock().push(req.responder));
        let (_ctx, _table, endpoint) = attached();

        call(&router, "luna://com.example.feed/watch", &endpoint, true);
        call(&router, "luna://com.example.feed/watch", &endpoint, true);

        assert_eq!(router.drop_connection(ConnectionId::new(1)), 2);
        assert!(kept.lock().iter().all(|r| !r.is_active()));
        assert!(router.withdraw("com.example.feed"));
        assert!(!router.has_provider("com.example.feed"));
    }

    #[test]
    fn test_tokens_are_unique() {
        let router = CallRouter::new();
        let a = router.next_token();
        let b = router.next_token();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
