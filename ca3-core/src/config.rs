//! CA3-relevant configuration surface. Loading here validates shape only;
//! decrypting stored secrets is left to the embedding application (the
//! `KeyStore` trait is the boundary).

use serde::{Deserialize, Serialize};

use crate::types::RosterEntry;

/// Self-identification and protocol knobs, plus the static roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub nodename: String,
    pub rpc_port: u16,

    /// Seconds; the retry driver's initial per-trip deadline budget.
    pub min_life_time_secs: f64,
    /// Seconds; the ceiling the retry driver expands `min_life_time_secs`
    /// towards, 1.5x per timeout.
    pub max_life_time_secs: f64,

    pub min_sign_nodes: u32,
    pub max_sign_nodes: u32,

    /// Outbound-failure threshold at which a peer becomes ineligible for
    /// random selection.
    pub abnormal_count_for_judging: u32,

    /// Governs whether genesis/parcel trips (empty `tx_ids`) universally
    /// conflict with any other empty-tx trip. Defaults to `true`, the
    /// stricter behavior.
    #[serde(default = "default_strict_empty_tx_conflict")]
    pub strict_empty_tx_conflict: bool,

    pub roster: Vec<RosterEntry>,
}

fn default_strict_empty_tx_conflict() -> bool {
    true
}

impl Config {
    /// Parses a TOML configuration document.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn min_life_time_ms(&self) -> u64 {
        (self.min_life_time_secs * 1000.0) as u64
    }

    pub fn max_life_time_ms(&self) -> u64 {
        (self.max_life_time_secs * 1000.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let doc = r#"
            nodename = "a"
            rpc_port = 9001
            min_life_time_secs = 1.0
            max_life_time_secs = 4.0
            min_sign_nodes = 2
            max_sign_nodes = 3
            abnormal_count_for_judging = 5

            [[roster]]
            nodename = "a"
            host = "127.0.0.1"
            rpc_port = 9001
            allow_outgoing = true
            abnormal_count = 0
        "#;
        let config = Config::from_toml_str(doc).unwrap();
        assert_eq!(config.nodename, "a");
        assert!(config.strict_empty_tx_conflict);
        assert_eq!(config.roster.len(), 1);
    }
}
