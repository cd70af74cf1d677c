//! Lunabus - in-process Luna-style service bus
//!
//! Implements the bus library the `luna-service-client` crate talks to:
//! named service registration, one-shot calls, subscriptions with
//! cancellation, and responses delivered on each caller's event loop.
//! A pair of platform services (audio, settings) ships with it.

pub mod bus;
pub mod services;
pub mod uri;

pub use bus::{LocalBus, MethodHandler, Request, Responder, ServiceProvider};
pub use services::{install_platform_services, PlatformServices};
pub use uri::{ServiceUri, UriError};
