//! Connectivity classification.
//!
//! The host forwards what the platform reports (online flag, effective
//! connection type such as `"4g"` or `"slow-2g"`). The monitor keeps the
//! derived [`NetworkCondition`] and publishes the coarse
//! [`ConnectivityStatus`] on a `watch` channel.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;

use crate::sync::network::{NetworkCondition, NetworkSpeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectivityStatus {
    Online,
    Slow,
    Offline,
}

impl ConnectivityStatus {
    #[must_use]
    pub fn from_condition(condition: &NetworkCondition) -> Self {
        if !condition.online {
            Self::Offline
        } else if condition.speed == NetworkSpeed::Slow {
            Self::Slow
        } else {
            Self::Online
        }
    }

    /// Slow still counts as online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::Offline)
    }

    /// Gauge value (0=offline, 1=slow, 2=online)
    #[must_use]
    pub fn level(&self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Slow => 1,
            Self::Online => 2,
        }
    }
}

impl std::fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Slow => write!(f, "slow"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Speed tier for a platform effective connection type.
#[must_use]
pub fn speed_for_effective_type(effective_type: Option<&str>) -> NetworkSpeed {
    match effective_type.map(str::to_ascii_lowercase).as_deref() {
        Some("slow-2g") | Some("2g") => NetworkSpeed::Slow,
        Some("3g") => NetworkSpeed::Medium,
        Some("4g") | Some("5g") => NetworkSpeed::Fast,
        _ => NetworkSpeed::Unknown,
    }
}

/// A status change seen by [`ConnectivityMonitor::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: ConnectivityStatus,
    pub current: ConnectivityStatus,
}

impl Transition {
    #[must_use]
    pub fn came_online(&self) -> bool {
        !self.previous.is_online() && self.current.is_online()
    }
}

pub struct ConnectivityMonitor {
    condition: RwLock<NetworkCondition>,
    status_tx: watch::Sender<ConnectivityStatus>,
}

impl ConnectivityMonitor {
    /// Starts from an optimistic online condition of unknown speed.
    pub fn new() -> Self {
        let condition = NetworkCondition::default();
        let (status_tx, _) = watch::channel(ConnectivityStatus::from_condition(&condition));
        Self {
            condition: RwLock::new(condition),
            status_tx,
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectivityStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn condition(&self) -> NetworkCondition {
        *self.condition.read()
    }

    /// Condition for a platform report. Cost and connection type carry over
    /// from the last full condition.
    #[must_use]
    pub fn condition_for(&self, online: bool, effective_type: Option<&str>) -> NetworkCondition {
        let mut condition = self.condition();
        condition.online = online;
        condition.speed = speed_for_effective_type(effective_type);
        condition
    }

    /// Store a new condition. Returns the transition if the status changed.
    pub fn update(&self, condition: NetworkCondition) -> Option<Transition> {
        *self.condition.write() = condition;
        let current = ConnectivityStatus::from_condition(&condition);
        let previous = self.status_tx.send_replace(current);
        (previous != current).then_some(Transition { previous, current })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::network::{ConnectionType, NetworkCost};

    #[test]
    fn test_effective_type_mapping() {
        assert_eq!(speed_for_effective_type(Some("slow-2g")), NetworkSpeed::Slow);
        assert_eq!(speed_for_effective_type(Some("2g")), NetworkSpeed::Slow);
        assert_eq!(speed_for_effective_type(Some("3g")), NetworkSpeed::Medium);
        assert_eq!(speed_for_effective_type(Some("4G")), NetworkSpeed::Fast);
        assert_eq!(speed_for_effective_type(None), NetworkSpeed::Unknown);
        assert_eq!(speed_for_effective_type(Some("satellite")), NetworkSpeed::Unknown);
    }

    #[test]
    fn test_classification() {
        let monitor = ConnectivityMonitor::new();
        assert_eq!(monitor.status(), ConnectivityStatus::Online);

        let t = monitor.update(monitor.condition_for(true, Some("2g"))).unwrap();
        assert_eq!(t.previous, ConnectivityStatus::Online);
        assert_eq!(t.current, ConnectivityStatus::Slow);
        assert!(!t.came_online());

        let t = monitor.update(monitor.condition_for(false, None)).unwrap();
        assert_eq!(t.current, ConnectivityStatus::Offline);

        let t = monitor.update(monitor.condition_for(true, Some("4g"))).unwrap();
        assert!(t.came_online());
    }

    #[test]
    fn test_unchanged_status_is_not_a_transition() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.update(monitor.condition_for(true, Some("4g"))).is_none());
        assert!(monitor.update(monitor.condition_for(true, Some("3g"))).is_none());
        assert_eq!(monitor.condition().speed, NetworkSpeed::Medium);
    }

    #[test]
    fn test_report_keeps_cost_and_connection() {
        let monitor = ConnectivityMonitor::new();
        monitor.update(
            NetworkCondition::default()
                .with_cost(NetworkCost::Metered)
                .with_connection(ConnectionType::Cellular),
        );

        let condition = monitor.condition_for(true, Some("3g"));
        assert_eq!(condition.cost, NetworkCost::Metered);
        assert_eq!(condition.connection, ConnectionType::Cellular);
    }

    #[tokio::test]
    async fn test_watchers_see_changes() {
        let monitor = ConnectivityMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.update(NetworkCondition::offline());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectivityStatus::Offline);
    }
}
