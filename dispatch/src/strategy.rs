// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Lane assignment strategies.

use std::fmt::Display;

/// How the dispatcher picks a worker lane for an incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Next lane is `(counter++) % N`.
    RoundRobin,
    /// Lane with the fewest processed frames, ties to the lowest id.
    LeastLoaded,
    /// First frame from an interface pins it to the then-least-loaded
    /// lane; later frames from that interface follow the pin. The only
    /// strategy that preserves per-interface order.
    Affinity,
}

impl Strategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::LeastLoaded => "least-loaded",
            Strategy::Affinity => "affinity",
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a strategy name.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown dispatch strategy '{0}' (expected round-robin, least-loaded or affinity)")]
pub struct StrategyParseError(pub String);

impl std::str::FromStr for Strategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Strategy::RoundRobin),
            "least-loaded" => Ok(Strategy::LeastLoaded),
            "affinity" => Ok(Strategy::Affinity),
            other => Err(StrategyParseError(other.to_owned())),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_names() {
        for strategy in [Strategy::RoundRobin, Strategy::LeastLoaded, Strategy::Affinity] {
            assert_eq!(strategy.as_str().parse::<Strategy>().unwrap(), strategy);
        }
        assert!("fanciest".parse::<Strategy>().is_err());
    }
}
