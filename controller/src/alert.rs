use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use solar_common::{alert_streak_key, config::AlertConfig, FailureKind};

use crate::{
    remote::Notifier,
    store::{StateStore, StoreError},
};

/// Escalates a failure once it has repeated `threshold` times within the streak TTL.
pub struct FailureStreaks {
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    threshold: u64,
    ttl: Duration,
}

impl FailureStreaks {
    pub fn new(store: Arc<dyn StateStore>, notifier: Arc<dyn Notifier>, config: &AlertConfig) -> Self {
        Self {
            store,
            notifier,
            threshold: u64::from(config.threshold.max(1)),
            ttl: Duration::from_secs(config.streak_ttl_secs.max(1)),
        }
    }

    /// Counts one occurrence; returns whether this one raised the alert.
    pub async fn record(&self, kind: FailureKind, message: &str) -> bool {
        let count = match self.store.increment(&alert_streak_key(kind.as_str()), self.ttl).await {
            Ok(count) => count,
            Err(err) => {
                // No counter, no streak: every occurrence alerts.
                warn!(%kind, "failure streak unavailable: {err}");
                self.notifier.alert(kind, message).await;
                return true;
            }
        };

        debug!(%kind, count, threshold = self.threshold, "failure recorded");
        if count == self.threshold {
            self.notifier
                .alert(kind, &format!("{message} ({count} times in a row)"))
                .await;
            return true;
        }
        false
    }

    pub async fn clear(&self, kind: FailureKind) -> Result<(), StoreError> {
        self.store.delete(&alert_streak_key(kind.as_str())).await?;
        Ok(())
    }
}
