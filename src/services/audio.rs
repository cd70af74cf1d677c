//! Audio service: volume and mute state

use super::{reply_error, to_payload, Subscribers};
use crate::bus::{LocalBus, Request};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const AUDIO_SERVICE: &str = "com.webos.audio";

const MAX_VOLUME: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AudioState {
    volume: u8,
    muted: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VolumeReply {
    return_value: bool,
    volume: u8,
    muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscribed: Option<bool>,
}

#[derive(Deserialize)]
struct SetVolumeParams {
    volume: i64,
}

#[derive(Deserialize)]
struct SetMutedParams {
    muted: bool,
}

struct Inner {
    state: Mutex<AudioState>,
    subscribers: Subscribers<()>,
}

impl Inner {
    fn reply(&self, subscribed: Option<bool>) -> String {
        let state = *self.state.lock();
        to_payload(&VolumeReply {
            return_value: true,
            volume: state.volume,
            muted: state.muted,
            subscribed,
        })
    }

    /// Apply `change`; notify subscribers if the state moved
    fn update(&self, change: impl FnOnce(&mut AudioState)) -> usize {
        let changed = {
            let mut state = self.state.lock();
            let before = *state;
            change(&mut state);
            *state != before
        };

        if !changed {
            return 0;
        }

        let payload = self.reply(None);
        let sent = self.subscribers.notify(|_| Some(payload.clone()));
        debug!(subscribers = sent, "Volume change notified");
        sent
    }
}

/// Handle to the installed audio service
#[derive(Clone)]
pub struct AudioService {
    inner: Arc<Inner>,
}

impl AudioService {
    /// Expose `/getVolume`, `/setVolume` and `/setMuted` on `bus`
    pub fn install(bus: &LocalBus) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(AudioState {
                volume: 10,
                muted: false,
            }),
            subscribers: Subscribers::new(),
        });

        let provider = bus.provide(AUDIO_SERVICE);

        let get = inner.clone();
        provider.method("/getVolume", move |request: Request| {
            if request.subscribe {
                request.responder.respond(get.reply(Some(true)));
                get.subscribers.add(request.responder, ());
            } else {
                request.responder.respond(get.reply(None));
            }
        });

        let set = inner.clone();
        provider.method("/setVolume", move |request: Request| {
            match request.params::<SetVolumeParams>() {
                Ok(params) => {
                    let volume = params.volume.clamp(0, MAX_VOLUME) as u8;
                    set.update(|state| state.volume = volume);
                    request.responder.respond(set.reply(None));
                }
                Err(e) => reply_error(&request.responder, format!("Invalid volume: {}", e)),
            }
        });

        let mute = inner.clone();
        provider.method("/setMuted", move |request: Request| {
            match request.params::<SetMutedParams>() {
                Ok(params) => {
                    mute.update(|state| state.muted = params.muted);
                    request.responder.respond(mute.reply(None));
                }
                Err(e) => reply_error(&request.responder, format!("Invalid muted flag: {}", e)),
            }
        });

        Self { inner }
    }

    pub fn volume(&self) -> u8 {
        self.inner.state.lock().volume
    }

    pub fn is_muted(&self) -> bool {
        self.inner.state.lock().muted
    }

    /// Change the volume from the service side, as a hardware key would
    pub fn set_volume(&self, volume: u8) -> usize {
        let volume = volume.min(MAX_VOLUME as u8);
        self.inner.update(|state| state.volume = volume)
    }

    /// Number of live volume subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}
