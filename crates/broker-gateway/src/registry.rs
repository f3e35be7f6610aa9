//! Session Registry
//!
//! Owns every live [`BrokerHandle`], keyed by (session, broker). The registry
//! is an ordinary value handed to whoever needs it; there is no process-wide
//! instance. Reads never create entries, and removal always runs the
//! handle's cleanup before the last reference is released.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use agent_core::SessionId;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::handle::{BrokerHandle, HandleKey};

#[derive(Default)]
pub struct SessionRegistry {
    handles: RwLock<HashMap<HandleKey, Arc<BrokerHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle for `key`, building it with `create` when absent.
    ///
    /// Concurrent callers for the same key all receive the same handle.
    pub async fn get_or_create<F, Fut>(&self, key: &HandleKey, create: F) -> Result<Arc<BrokerHandle>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BrokerHandle>>,
    {
        if let Some(handle) = self.get(key).await {
            return Ok(handle);
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(key) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(create().await?);
        handles.insert(key.clone(), Arc::clone(&handle));
        tracing::debug!(%key, "Broker handle created");
        Ok(handle)
    }

    pub async fn get(&self, key: &HandleKey) -> Option<Arc<BrokerHandle>> {
        self.handles.read().await.get(key).cloned()
    }

    /// Remove and clean up one handle. Returns whether it existed.
    pub async fn remove(&self, key: &HandleKey) -> bool {
        let removed = self.handles.write().await.remove(key);
        match removed {
            Some(handle) => {
                handle.cleanup().await;
                true
            }
            None => false,
        }
    }

    /// Remove every handle belonging to `session`
    pub async fn remove_all_for_session(&self, session: &SessionId) -> usize {
        let removed: Vec<Arc<BrokerHandle>> = {
            let mut handles = self.handles.write().await;
            let keys: Vec<HandleKey> = handles.keys().filter(|k| &k.session == session).cloned().collect();
            keys.iter().filter_map(|k| handles.remove(k)).collect()
        };
        for handle in &removed {
            handle.cleanup().await;
        }
        removed.len()
    }

    /// Shutdown sweep: clean up every handle
    pub async fn remove_all(&self) -> usize {
        let removed: Vec<Arc<BrokerHandle>> = self.handles.write().await.drain().map(|(_, h)| h).collect();
        for handle in &removed {
            handle.cleanup().await;
        }
        tracing::info!(count = removed.len(), "Released all broker handles");
        removed.len()
    }

    /// Handles belonging to `session`, ordered by broker name
    pub async fn brokers_for_session(&self, session: &SessionId) -> Vec<Arc<BrokerHandle>> {
        let mut handles: Vec<Arc<BrokerHandle>> = self
            .handles
            .read()
            .await
            .iter()
            .filter(|(k, _)| &k.session == session)
            .map(|(_, h)| Arc::clone(h))
            .collect();
        handles.sort_by(|a, b| a.key().broker.cmp(&b.key().broker));
        handles
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}
