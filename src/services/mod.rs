//! Built-in platform services
//!
//! Small stand-ins for the TV platform services the well-known URIs point
//! at. They give `luna-send` something to talk to and exercise the
//! subscription paths of the bus.

mod audio;
mod settings;

pub use audio::{AudioService, AUDIO_SERVICE};
pub use settings::{SettingsService, SETTINGS_SERVICE};

use crate::bus::{LocalBus, Responder};
use luna_service_client::BusReply;
use parking_lot::Mutex;
use serde::Serialize;

/// Services installed by [`install_platform_services`]
pub struct PlatformServices {
    pub audio: AudioService,
    pub settings: SettingsService,
}

/// Install the audio and settings services on `bus`
pub fn install_platform_services(bus: &LocalBus) -> PlatformServices {
    PlatformServices {
        audio: AudioService::install(bus),
        settings: SettingsService::install(bus),
    }
}

/// Subscribers of a service, each with a filter value
pub(crate) struct Subscribers<T> {
    list: Mutex<Vec<(Responder, T)>>,
}

impl<T> Subscribers<T> {
    pub(crate) fn new() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, responder: Responder, filter: T) {
        self.list.lock().push((responder, filter));
    }

    /// Send to every subscriber `select` accepts, dropping cancelled ones
    pub(crate) fn notify<F>(&self, mut select: F) -> usize
    where
        F: FnMut(&T) -> Option<String>,
    {
        let mut list = self.list.lock();
        list.retain(|(responder, _)| responder.is_active());

        let mut sent = 0;
        for (responder, filter) in list.iter() {
            if let Some(payload) = select(filter) {
                if responder.respond(payload) {
                    sent += 1;
                }
            }
        }
        sent
    }

    pub(crate) fn len(&self) -> usize {
        let mut list = self.list.lock();
        list.retain(|(responder, _)| responder.is_active());
        list.len()
    }
}

/// Reply with an error payload
pub(crate) fn reply_error(responder: &Responder, text: impl Into<String>) {
    responder.respond(BusReply::error(luna_service_client::ERROR_CODE_UNKNOWN, text).to_payload());
}

/// Serialize a reply, falling back to a bare failure
pub(crate) fn to_payload<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| BusReply::error(-1, "serialization failed").to_payload())
}
