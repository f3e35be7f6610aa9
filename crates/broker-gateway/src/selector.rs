//! Active-broker selection, persisted on the caller's session record.

use std::sync::Arc;

use agent_core::{Session, SessionId, SessionStore};

use crate::error::{BrokerError, Result};
use crate::handle::BrokerHandle;

pub struct ActiveBrokerSelector {
    store: Arc<dyn SessionStore>,
}

impl ActiveBrokerSelector {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    async fn session(&self, id: &SessionId) -> Result<Session> {
        Ok(self
            .store
            .load(id)
            .await?
            .unwrap_or_else(|| Session::with_id(id.clone())))
    }

    /// Route the session's chat requests to `handle`'s broker.
    ///
    /// Only authenticated handles can be selected.
    pub async fn select(&self, session: &SessionId, handle: &BrokerHandle) -> Result<()> {
        let state = handle.state().await;
        if !state.is_authenticated() {
            return Err(BrokerError::NotAuthenticated {
                broker: handle.key().broker.clone(),
                next_step: state.next_step().into(),
            });
        }

        let mut record = self.session(session).await?;
        record.set_active_broker(&handle.key().broker);
        self.store.save(&record).await?;
        tracing::info!(%session, broker = %handle.key().broker, "Active broker selected");
        Ok(())
    }

    pub async fn active(&self, session: &SessionId) -> Result<Option<String>> {
        Ok(self.store.load(session).await?.and_then(|s| s.active_broker))
    }

    /// Clear the selection if it points at `broker`. Returns whether it did.
    pub async fn clear_if(&self, session: &SessionId, broker: &str) -> Result<bool> {
        let Some(mut record) = self.store.load(session).await? else {
            return Ok(false);
        };
        if record.active_broker.as_deref() != Some(broker) {
            return Ok(false);
        }
        record.clear_active_broker();
        self.store.save(&record).await?;
        Ok(true)
    }

    /// Drop the session record together with its selection
    pub async fn forget(&self, session: &SessionId) -> Result<()> {
        self.store.delete(session).await?;
        Ok(())
    }
}
