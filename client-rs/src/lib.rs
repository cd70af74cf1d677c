//! Luna Service Client
//!
//! An asynchronous call/subscribe client for a Luna-style service bus. The
//! client registers the process as a bus service, issues one-shot calls and
//! keeps a registry of live subscriptions. Every response is delivered on a
//! single-threaded [`MainContext`].
//!
//! # Example
//!
//! ```no_run
//! use luna_service_client::{Bus, ClientConfig, MainContext, ServiceBusClient};
//!
//! fn watch_volume(bus: &dyn Bus) {
//!     let context = MainContext::thread_default();
//!     let mut client = ServiceBusClient::with_context(bus, ClientConfig::new("com.example.app"), &context);
//!
//!     client
//!         .call_async_with("luna://com.webos.audio/getVolume", "{}", |payload| {
//!             println!("volume: {}", payload);
//!         })
//!         .ok();
//!
//!     let token = client
//!         .subscribe("luna://com.webos.audio/getVolume", r#"{"subscribe":true}"#, |payload| {
//!             println!("volume changed: {}", payload);
//!         })
//!         .expect("subscribe");
//!
//!     context.run_until_idle();
//!     client.unsubscribe(token).ok();
//! }
//! ```

mod client;
mod config;
mod context;
mod error;
mod messages;
mod transport;
mod uri;

pub use client::{EventCallback, PendingCall, ResponseCallback, ServiceBusClient};
pub use config::ClientConfig;
pub use context::{Dispatch, DispatchSender, MainContext, SourceId};
pub use error::{BusError, ClientError, Result, BUS_ERROR_GENERIC};
pub use messages::{BusReply, ERROR_CODE_UNKNOWN};
pub use transport::{
    Bus, BusConnection, CallRejected, HandlerTable, MessageToken, ReplyEndpoint, ReplyHandler,
    SubscriptionHandler,
};
pub use uri::{service_uri, service_uri_for_index, ServiceCategory};
