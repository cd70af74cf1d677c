//! Service-side method handlers

use luna_service_client::{MessageToken, ReplyEndpoint};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handles calls to one method of a service
pub trait MethodHandler: Send + Sync {
    fn handle(&self, request: Request);
}

impl<F> MethodHandler for F
where
    F: Fn(Request) + Send + Sync,
{
    fn handle(&self, request: Request) {
        self(request)
    }
}

/// Sends responses back to the caller of one request
///
/// Cloneable and usable from any thread. A one-shot request accepts a single
/// response; a subscription accepts responses until the caller cancels it.
#[derive(Debug, Clone)]
pub struct Responder {
    token: MessageToken,
    endpoint: ReplyEndpoint,
    live: Arc<AtomicBool>,
    one_shot: bool,
}

impl Responder {
    pub(crate) fn new(
        token: MessageToken,
        endpoint: ReplyEndpoint,
        live: Arc<AtomicBool>,
        one_shot: bool,
    ) -> Self {
        Self {
            token,
            endpoint,
            live,
            one_shot,
        }
    }

    /// Token of the call being answered
    pub fn token(&self) -> MessageToken {
        self.token
    }

    /// Whether another response would be delivered
    pub fn is_active(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Send a response; false if the call is finished or cancelled
    pub fn respond(&self, payload: impl Into<String>) -> bool {
        let accepted = if self.one_shot {
            self.live.swap(false, Ordering::SeqCst)
        } else {
            self.live.load(Ordering::SeqCst)
        };

        accepted && self.endpoint.post(self.token, payload)
    }

    /// Serialize `value` and send it as a response
    pub fn respond_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(payload) => self.respond(payload),
            Err(_) => false,
        }
    }
}

/// A call delivered to a method handler
#[derive(Debug, Clone)]
pub struct Request {
    /// Registered name of the calling connection
    pub sender: String,
    /// Method path, e.g. "/getVolume"
    pub method: String,
    /// Raw request payload
    pub payload: String,
    /// Whether the caller accepts multiple responses
    pub subscribe: bool,
    pub responder: Responder,
}

impl Request {
    /// Deserialize the payload
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Shorthand for `self.responder.respond_json`
    pub fn reply<T: Serialize>(&self, value: &T) -> bool {
        self.responder.respond_json(value)
    }
}

/// Methods a service exposes on the bus
pub struct ServiceProvider {
    name: String,
    methods: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl ServiceProvider {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// The service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expose `handler` under `path` (e.g. "/getVolume"), replacing any previous one
    pub fn method<H>(&self, path: &str, handler: H) -> &Self
    where
        H: MethodHandler + 'static,
    {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        self.methods.write().insert(path, Arc::new(handler));
        self
    }

    /// Stop exposing `path`
    pub fn remove_method(&self, path: &str) -> bool {
        self.methods.write().remove(path).is_some()
    }

    pub fn has_method(&self, path: &str) -> bool {
        self.methods.read().contains_key(path)
    }

    /// Exposed method paths, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.methods.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub(crate) fn handler(&self, path: &str) -> Option<Arc<dyn MethodHandler>> {
        self.methods.read().get(path).cloned()
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("name", &self.name)
            .field("methods", &self.methods())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_paths_are_normalized() {
        let provider = ServiceProvider::new("com.example.svc");
        provider
            .method("getThing", |_req: Request| {})
            .method("/setThing", |_req: Request| {});

        assert_eq!(provider.methods(), vec!["/getThing".to_string(), "/setThing".to_string()]);
        assert!(provider.has_method("/getThing"));
        assert!(provider.handler("/setThing").is_some());
        assert!(provider.remove_method("/getThing"));
        assert!(!provider.has_method("/getThing"));
    }
}
