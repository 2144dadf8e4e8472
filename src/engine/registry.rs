//! Subscription registry
//!
//! Maps active contract ids to their worker mailboxes. The map is shared
//! between the tick loop, sessions, and terminating workers; the lock is
//! held only for insert, remove, and a snapshot copy of the subscriber set.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use crate::products::ContractId;

use super::PriceEvent;

/// Registry of active subscriptions
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: Mutex<HashMap<ContractId, mpsc::Sender<PriceEvent>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription and deliver its priming tick
    ///
    /// The priming event is stamped and enqueued while the map lock is held,
    /// so no generator tick can slip in between with an older timestamp:
    /// every tick a subscriber observes after priming is stamped later.
    /// Returns true when an existing entry for the same id was replaced
    /// (dropping the old mailbox ends its worker).
    pub async fn subscribe(
        &self,
        id: ContractId,
        mailbox: mpsc::Sender<PriceEvent>,
        priming_price: f64,
    ) -> bool {
        let mut subscriptions = self.subscriptions.lock().await;
        let priming = PriceEvent {
            price: priming_price,
            timestamp: Utc::now(),
        };
        // Freshly created mailbox; cannot be full
        let _ = mailbox.try_send(priming);
        subscriptions.insert(id, mailbox).is_some()
    }

    /// Remove a subscription; idempotent
    pub async fn remove(&self, id: &ContractId) -> bool {
        self.subscriptions.lock().await.remove(id).is_some()
    }

    pub async fn contains(&self, id: &ContractId) -> bool {
        self.subscriptions.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.lock().await.is_empty()
    }

    /// Copy of the current subscriber set, taken atomically; subscribers
    /// added after the copy do not see the tick being delivered
    pub async fn snapshot(&self) -> Vec<(ContractId, mpsc::Sender<PriceEvent>)> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .map(|(id, mailbox)| (id.clone(), mailbox.clone()))
            .collect()
    }
}
