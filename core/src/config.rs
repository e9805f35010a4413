//! Timeout and commit-delay configuration. Plain, serde-backed, no file I/O
//! here — the demonstration binary is responsible for loading this from
//! TOML the same way the rest of this workspace loads its per-subsystem
//! config structs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Round;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Config {
    pub propose_base_ms: u64,
    pub propose_delta_ms: u64,
    pub prevote_base_ms: u64,
    pub prevote_delta_ms: u64,
    pub precommit_base_ms: u64,
    pub precommit_delta_ms: u64,
    /// Slack added after a commit before the next height's round zero starts,
    /// giving the block producer time to gather transactions.
    pub commit_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            propose_base_ms: 3000,
            propose_delta_ms: 500,
            prevote_base_ms: 1000,
            prevote_delta_ms: 500,
            precommit_base_ms: 1000,
            precommit_delta_ms: 500,
            commit_delay_ms: 1000,
        }
    }
}

impl Config {
    fn timeout_for(&self, base_ms: u64, delta_ms: u64, round: Round) -> Duration {
        let round_factor = round.0.max(0) as u64;
        Duration::from_millis(base_ms + delta_ms * round_factor)
    }

    pub fn propose_timeout(&self, round: Round) -> Duration {
        self.timeout_for(self.propose_base_ms, self.propose_delta_ms, round)
    }

    pub fn prevote_timeout(&self, round: Round) -> Duration {
        self.timeout_for(self.prevote_base_ms, self.prevote_delta_ms, round)
    }

    pub fn precommit_timeout(&self, round: Round) -> Duration {
        self.timeout_for(self.precommit_base_ms, self.precommit_delta_ms, round)
    }

    pub fn commit_delay(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.commit_delay_ms as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_grow_linearly_with_round() {
        let config = Config::default();
        let r0 = config.propose_timeout(Round(0));
        let r1 = config.propose_timeout(Round(1));
        let r5 = config.propose_timeout(Round(5));
        assert!(r1 > r0);
        assert!(r5 > r1);
        assert_eq!(r5 - r0, Duration::from_millis(500 * 5));
    }

    #[test]
    fn default_values_match_configured_base() {
        let config = Config {
            propose_base_ms: 3000,
            propose_delta_ms: 500,
            prevote_base_ms: 1000,
            prevote_delta_ms: 500,
            precommit_base_ms: 1000,
            precommit_delta_ms: 500,
            commit_delay_ms: 1000,
        };
        assert_eq!(config.propose_timeout(Round(0)), Duration::from_millis(3000));
        assert_eq!(config.prevote_timeout(Round(0)), Duration::from_millis(1000));
        assert_eq!(config.precommit_timeout(Round(2)), Duration::from_millis(2000));
    }
}
