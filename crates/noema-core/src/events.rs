//! Contradiction alerts and the events published about them.
//!
//! Alerts are created by the contradiction engine inside a queued job and
//! delivered over a broadcast channel, so the producer of the job never
//! sees them directly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NoemaError;
use crate::types::{EdgeId, GroupId, NodeId};

/// Unique identifier for an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AlertId(pub Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Alert severity, derived from the number of contradiction edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// `>= 3` edges is high, `>= 2` medium, anything else low.
    pub fn from_edge_count(count: usize) -> Self {
        match count {
            c if c >= 3 => Self::High,
            2 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Alert lifecycle: `pending → acknowledged | resolved | ignored`,
/// `acknowledged → resolved | ignored`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
    Resolved,
    Ignored,
}

impl AlertStatus {
    pub fn can_transition_to(self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, next),
            (Pending, Acknowledged)
                | (Pending, Resolved)
                | (Pending, Ignored)
                | (Acknowledged, Resolved)
                | (Acknowledged, Ignored)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Ignored)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Ignored => "ignored",
        };
        f.write_str(s)
    }
}

/// A user-facing notice that new information conflicts with existing beliefs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContradictionAlert {
    pub id: AlertId,
    pub group_id: GroupId,
    pub message: String,
    /// Nodes introduced by the triggering episode.
    pub contradicting_node_ids: Vec<NodeId>,
    /// Existing nodes they conflict with.
    pub contradicted_node_ids: Vec<NodeId>,
    pub contradiction_edge_ids: Vec<EdgeId>,
    pub severity: Severity,
    pub status: AlertStatus,
    pub timestamp: DateTime<Utc>,
}

impl ContradictionAlert {
    pub fn new(
        group_id: GroupId,
        contradicting_node_ids: Vec<NodeId>,
        contradicted_node_ids: Vec<NodeId>,
        contradiction_edge_ids: Vec<EdgeId>,
    ) -> Self {
        let edges = contradiction_edge_ids.len();
        let message = if edges == 1 {
            "New information contradicts 1 existing belief".to_string()
        } else {
            format!("New information contradicts {edges} existing beliefs")
        };
        Self {
            id: AlertId::new(),
            group_id,
            message,
            contradicting_node_ids,
            contradicted_node_ids,
            contradiction_edge_ids,
            severity: Severity::from_edge_count(edges),
            status: AlertStatus::Pending,
            timestamp: Utc::now(),
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: AlertStatus) -> Result<AlertStatus, NoemaError> {
        if !self.status.can_transition_to(next) {
            return Err(NoemaError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let previous = self.status;
        self.status = next;
        Ok(previous)
    }
}

/// Events published on the alert channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AlertEvent {
    /// A new alert was raised.
    Raised { alert: ContradictionAlert },
    /// An alert moved through its lifecycle.
    StatusChanged {
        alert_id: AlertId,
        group_id: GroupId,
        from: AlertStatus,
        to: AlertStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert_with_edges(n: usize) -> ContradictionAlert {
        ContradictionAlert::new(
            GroupId::new("u1"),
            vec![NodeId::new()],
            (0..n).map(|_| NodeId::new()).collect(),
            (0..n).map(|_| EdgeId::new()).collect(),
        )
    }

    #[test]
    fn severity_follows_edge_count() {
        assert_eq!(alert_with_edges(1).severity, Severity::Low);
        assert_eq!(alert_with_edges(2).severity, Severity::Medium);
        assert_eq!(alert_with_edges(3).severity, Severity::High);
        assert_eq!(alert_with_edges(7).severity, Severity::High);
        assert_eq!(Severity::from_edge_count(0), Severity::Low);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut alert = alert_with_edges(1);
        assert_eq!(alert.status, AlertStatus::Pending);
        alert.transition(AlertStatus::Acknowledged).unwrap();
        alert.transition(AlertStatus::Resolved).unwrap();
        assert!(alert.status.is_terminal());

        let err = alert.transition(AlertStatus::Pending).unwrap_err();
        assert!(matches!(err, NoemaError::InvalidTransition { .. }));
    }

    #[test]
    fn acknowledged_cannot_return_to_pending() {
        assert!(!AlertStatus::Acknowledged.can_transition_to(AlertStatus::Pending));
        assert!(!AlertStatus::Ignored.can_transition_to(AlertStatus::Resolved));
    }

    #[test]
    fn event_payload_tags() {
        let event = AlertEvent::Raised {
            alert: alert_with_edges(2),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"Raised\""));
        assert!(json.contains("\"severity\":\"medium\""));
    }
}
