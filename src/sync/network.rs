//! Network condition model.
//!
//! The sync engine does not probe the network itself; the host reports what
//! the platform tells it and the engine derives cadence, batch size and
//! admission limits from that.

use std::time::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkSpeed {
    Fast,
    Medium,
    Slow,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkCost {
    #[default]
    Free,
    Metered,
    Expensive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    Wifi,
    Ethernet,
    Cellular,
    #[default]
    Unknown,
}

/// Current network quality as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCondition {
    pub online: bool,
    pub speed: NetworkSpeed,
    pub cost: NetworkCost,
    pub connection: ConnectionType,
}

impl Default for NetworkCondition {
    fn default() -> Self {
        Self {
            online: true,
            speed: NetworkSpeed::Unknown,
            cost: NetworkCost::Free,
            connection: ConnectionType::Unknown,
        }
    }
}

impl NetworkCondition {
    #[must_use]
    pub fn offline() -> Self {
        Self { online: false, ..Self::default() }
    }

    #[must_use]
    pub fn with_speed(mut self, speed: NetworkSpeed) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost: NetworkCost) -> Self {
        self.cost = cost;
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionType) -> Self {
        self.connection = connection;
        self
    }

    /// Wired connections count as wifi for admission purposes.
    #[must_use]
    pub fn is_wifi(&self) -> bool {
        matches!(self.connection, ConnectionType::Wifi | ConnectionType::Ethernet)
    }

    /// Tick period: fast+free 10s, medium 30s, slow 60s.
    /// `None` means no opinion; the configured interval applies.
    #[must_use]
    pub fn sync_interval(&self) -> Option<Duration> {
        match (self.speed, self.cost) {
            (NetworkSpeed::Fast, NetworkCost::Free) => Some(Duration::from_secs(10)),
            (NetworkSpeed::Fast, _) | (NetworkSpeed::Medium, _) => Some(Duration::from_secs(30)),
            (NetworkSpeed::Slow, _) => Some(Duration::from_secs(60)),
            (NetworkSpeed::Unknown, _) => None,
        }
    }

    /// Target bytes per batch.
    #[must_use]
    pub fn optimal_batch_size(&self) -> usize {
        match self.speed {
            NetworkSpeed::Fast => 1024 * 1024,
            NetworkSpeed::Medium => 512 * 1024,
            NetworkSpeed::Slow => 128 * 1024,
            NetworkSpeed::Unknown => 256 * 1024,
        }
    }

    /// Largest batch admitted at the current cost tier.
    #[must_use]
    pub fn cost_cap_bytes(&self) -> usize {
        match self.cost {
            NetworkCost::Expensive => 64 * 1024,
            NetworkCost::Metered => 256 * 1024,
            NetworkCost::Free => 2 * 1024 * 1024,
        }
    }

    /// Rough throughput used for duration estimates.
    #[must_use]
    pub fn bytes_per_second(&self) -> f64 {
        match self.speed {
            NetworkSpeed::Fast => 1_000_000.0,
            NetworkSpeed::Medium => 250_000.0,
            NetworkSpeed::Slow => 50_000.0,
            NetworkSpeed::Unknown => 125_000.0,
        }
    }
}
