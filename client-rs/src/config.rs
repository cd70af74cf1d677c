//! Configuration for the Luna service client

/// Configuration for registering a [`ServiceBusClient`](crate::ServiceBusClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service identity, e.g. "com.webos.app.browser"
    pub identity: String,

    /// Application id reported to the bus (defaults to the identity)
    pub app_id: Option<String>,

    /// Whether to append the process id to the registered service name
    pub unique_name: bool,

    /// Whether request and response payloads are written to the log
    pub log_payloads: bool,
}

impl ClientConfig {
    /// Create a new configuration for the given identity
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            app_id: None,
            unique_name: true,
            log_payloads: true,
        }
    }

    /// Report a different application id than the identity
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Register under the bare identity, without the process id suffix
    pub fn exact_name(mut self) -> Self {
        self.unique_name = false;
        self
    }

    /// Keep payload bodies out of the log
    pub fn quiet_payloads(mut self) -> Self {
        self.log_payloads = false;
        self
    }

    /// The name the service registers under on the bus
    ///
    /// Several instances of the same binary register side by side, so by
    /// default the name is suffixed with the process id.
    pub fn service_name(&self) -> String {
        if self.unique_name {
            format!("{}-{}", self.identity, std::process::id())
        } else {
            self.identity.clone()
        }
    }

    /// The application id reported to the bus
    pub fn effective_app_id(&self) -> &str {
        self.app_id.as_deref().unwrap_or(&self.identity)
    }
}
