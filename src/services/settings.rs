//! Settings service: key/value system settings with change notifications

use super::{reply_error, to_payload, Subscribers};
use crate::bus::{LocalBus, Request};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const SETTINGS_SERVICE: &str = "com.webos.settingsservice";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsReply {
    return_value: bool,
    settings: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscribed: Option<bool>,
}

#[derive(Deserialize, Default)]
struct GetParams {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct SetParams {
    settings: Map<String, Value>,
}

struct Inner {
    values: RwLock<BTreeMap<String, Value>>,
    /// Each subscriber watches a set of keys; empty means every key
    subscribers: Subscribers<Vec<String>>,
}

impl Inner {
    fn select(&self, keys: &[String]) -> Map<String, Value> {
        let values = self.values.read();
        values
            .iter()
            .filter(|(k, _)| keys.is_empty() || keys.iter().any(|key| key == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn store(&self, changes: Map<String, Value>) -> usize {
        let mut changed = Map::new();
        {
            let mut values = self.values.write();
            for (key, value) in changes {
                if values.get(&key) != Some(&value) {
                    values.insert(key.clone(), value.clone());
                    changed.insert(key, value);
                }
            }
        }

        if changed.is_empty() {
            return 0;
        }

        let sent = self.subscribers.notify(|keys| {
            let settings: Map<String, Value> = changed
                .iter()
                .filter(|(k, _)| keys.is_empty() || keys.iter().any(|key| key == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if settings.is_empty() {
                return None;
            }
            Some(to_payload(&SettingsReply {
                return_value: true,
                settings,
                subscribed: None,
            }))
        });
        debug!(keys = changed.len(), subscribers = sent, "Settings change notified");
        sent
    }
}

/// Handle to the installed settings service
#[derive(Clone)]
pub struct SettingsService {
    inner: Arc<Inner>,
}

impl SettingsService {
    /// Expose `/getSystemSettings` and `/setSystemSettings` on `bus`
    pub fn install(bus: &LocalBus) -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert("pictureMode".to_string(), Value::from("normal"));
        defaults.insert("eyeComfortMode".to_string(), Value::from("off"));
        defaults.insert("smartSoundMode".to_string(), Value::from("off"));
        defaults.insert("localeInfo".to_string(), Value::from("en-US"));

        let inner = Arc::new(Inner {
            values: RwLock::new(defaults),
            subscribers: Subscribers::new(),
        });

        let provider = bus.provide(SETTINGS_SERVICE);

        let get = inner.clone();
        provider.method("/getSystemSettings", move |request: Request| {
            let params = if request.payload.trim().is_empty() {
                GetParams::default()
            } else {
                match request.params::<GetParams>() {
                    Ok(params) => params,
                    Err(e) => {
                        reply_error(&request.responder, format!("Invalid parameters: {}", e));
                        return;
                    }
                }
            };

            let reply = SettingsReply {
                return_value: true,
                settings: get.select(&params.keys),
                subscribed: request.subscribe.then_some(true),
            };
            request.responder.respond(to_payload(&reply));

            if request.subscribe {
                get.subscribers.add(request.responder, params.keys);
            }
        });

        let set = inner.clone();
        provider.method("/setSystemSettings", move |request: Request| {
            match request.params::<SetParams>() {
                Ok(params) => {
                    set.store(params.settings);
                    request
                        .responder
                        .respond(luna_service_client::BusReply::success().to_payload());
                }
                Err(e) => reply_error(&request.responder, format!("Invalid parameters: {}", e)),
            }
        });

        Self { inner }
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.values.read().get(key).cloned()
    }

    /// Change a setting from the service side
    pub fn set(&self, key: &str, value: Value) -> usize {
        let mut changes = Map::new();
        changes.insert(key.to_string(), value);
        self.inner.store(changes)
    }

    /// Number of live settings subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}
