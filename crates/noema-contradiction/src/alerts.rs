//! In-process alert store with broadcast delivery.
//!
//! Alerts are kept for the life of the process and never removed; their
//! status only moves forward through the lifecycle.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use noema_core::{AlertEvent, AlertId, AlertStatus, ContradictionAlert, GroupId};

use crate::error::{ContradictionError, Result};

const DEFAULT_CAPACITY: usize = 256;

pub struct AlertStore {
    alerts: RwLock<HashMap<AlertId, ContradictionAlert>>,
    events: broadcast::Sender<AlertEvent>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how far a slow subscriber may lag before it
    /// starts missing events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            alerts: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    /// Store a new alert and notify subscribers.
    pub async fn publish(&self, alert: ContradictionAlert) -> AlertId {
        let id = alert.id;
        tracing::info!(
            alert_id = %id,
            group = %alert.group_id,
            severity = ?alert.severity,
            edges = alert.contradiction_edge_ids.len(),
            "Contradiction alert raised"
        );
        self.alerts.write().await.insert(id, alert.clone());
        // No subscribers is fine; the alert stays queryable.
        let _ = self.events.send(AlertEvent::Raised { alert });
        id
    }

    pub async fn get(&self, id: &AlertId) -> Option<ContradictionAlert> {
        self.alerts.read().await.get(id).cloned()
    }

    /// Alerts, oldest first, optionally filtered by group and status.
    pub async fn list(
        &self,
        group: Option<&GroupId>,
        status: Option<AlertStatus>,
    ) -> Vec<ContradictionAlert> {
        let alerts = self.alerts.read().await;
        let mut out: Vec<_> = alerts
            .values()
            .filter(|a| group.map_or(true, |g| &a.group_id == g))
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.timestamp);
        out
    }

    pub async fn acknowledge(&self, id: &AlertId) -> Result<ContradictionAlert> {
        self.transition(id, AlertStatus::Acknowledged).await
    }

    pub async fn resolve(&self, id: &AlertId) -> Result<ContradictionAlert> {
        self.transition(id, AlertStatus::Resolved).await
    }

    pub async fn ignore(&self, id: &AlertId) -> Result<ContradictionAlert> {
        self.transition(id, AlertStatus::Ignored).await
    }

    async fn transition(&self, id: &AlertId, next: AlertStatus) -> Result<ContradictionAlert> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .get_mut(id)
            .ok_or(ContradictionError::AlertNotFound(*id))?;
        let from = alert.transition(next)?;
        let updated = alert.clone();
        drop(alerts);

        tracing::debug!(alert_id = %id, %from, to = %next, "Alert status changed");
        let _ = self.events.send(AlertEvent::StatusChanged {
            alert_id: *id,
            group_id: updated.group_id.clone(),
            from,
            to: next,
        });
        Ok(updated)
    }
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}
