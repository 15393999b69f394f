use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use solar_common::KEY_LEASE_TOKEN;

use crate::store::{StateStore, StoreError};

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("serial device is leased by another instance ({holder})")]
    Held { holder: String },

    #[error("lease expired before it could be refreshed")]
    Lost,

    #[error("lease was taken over by {holder}")]
    Hijacked { holder: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// TTL-bounded claim on the serial device, identified by a per-process token.
pub struct ResourceLease {
    store: Arc<dyn StateStore>,
    token: String,
    ttl: Duration,
}

impl ResourceLease {
    /// Claims the lease, failing when any token is already present.
    pub async fn acquire(store: Arc<dyn StateStore>, ttl: Duration) -> Result<Self, LeaseError> {
        let token = Uuid::new_v4().to_string();
        if !store.set_if_absent(KEY_LEASE_TOKEN, &token, ttl).await? {
            let holder = store
                .get(KEY_LEASE_TOKEN)
                .await?
                .unwrap_or_else(|| "an expired holder".to_string());
            return Err(LeaseError::Held { holder });
        }

        info!(token = %token, ttl_secs = ttl.as_secs(), "acquired serial device lease");
        Ok(Self { store, token, ttl })
    }

    /// Confirms ownership and extends the TTL. Must succeed before acting on a frame.
    pub async fn heartbeat(&self) -> Result<(), LeaseError> {
        match self
            .store
            .refresh_if_held(KEY_LEASE_TOKEN, &self.token, self.ttl)
            .await?
        {
            Some(holder) if holder == self.token => {
                debug!("lease refreshed");
                Ok(())
            }
            Some(holder) => Err(LeaseError::Hijacked { holder }),
            None => Err(LeaseError::Lost),
        }
    }

    /// Deletes the key only while it still carries our token.
    pub async fn release(self) -> Result<(), LeaseError> {
        if self
            .store
            .delete_if_held(KEY_LEASE_TOKEN, &self.token)
            .await?
        {
            info!(token = %self.token, "released serial device lease");
        } else {
            warn!(token = %self.token, "lease no longer ours at release");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("token", &self.token)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
