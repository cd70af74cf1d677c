//! Registered connection bookkeeping

use crate::uri::{validate_service_name, UriError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Unique id of a connection on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid service name: {0}")]
    InvalidName(#[from] UriError),

    #[error("service name already registered: {0}")]
    Duplicate(String),
}

/// A registered connection
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    /// Name the connection is reachable under
    pub service_name: String,
    /// Application id supplied at registration
    pub app_id: String,
}

/// Tracks every registered connection by id and by name
#[derive(Default)]
pub struct ConnectionRegistry {
    by_id: DashMap<ConnectionId, Arc<ConnectionInfo>>,
    by_name: DashMap<String, ConnectionId>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection under `service_name`
    pub fn register(
        &self,
        service_name: &str,
        app_id: &str,
    ) -> Result<Arc<ConnectionInfo>, RegistryError> {
        validate_service_name(service_name)?;

        match self.by_name.entry(service_name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(service_name.to_string())),
            Entry::Vacant(slot) => {
                let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                let info = Arc::new(ConnectionInfo {
                    id,
                    service_name: service_name.to_string(),
                    app_id: app_id.to_string(),
                });
                slot.insert(id);
                self.by_id.insert(id, info.clone());
                Ok(info)
            }
        }
    }

    /// Remove a connection
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionInfo>> {
        let (_, info) = self.by_id.remove(&id)?;
        self.by_name.remove_if(&info.service_name, |_, owner| *owner == id);
        Some(info)
    }

    /// Get a connection by id
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionInfo>> {
        self.by_id.get(&id).map(|r| r.clone())
    }

    /// Get a connection by registered name
    pub fn find_by_name(&self, service_name: &str) -> Option<Arc<ConnectionInfo>> {
        let id = *self.by_name.get(service_name)?;
        self.get(id)
    }

    /// Get total connection count
    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// Names of all registered connections, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
