//! Node configuration.
//!
//! Loaded from a TOML file at startup; any missing or malformed field is
//! fatal and the node refuses to run.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::consensus::{Validator, ValidatorSet};
use crate::ledger::LedgerConfig;
use crate::p2p::P2pConfig;
use crate::types::Address;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    Boot,
    Validator,
    Sentry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposerSelection {
    #[default]
    RoundRobin,
    /// Accepted for forward compatibility; maps to the round-robin path.
    Weighted,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommonSection {
    pub port: u16,
    pub mode: NodeMode,
    pub network_id: String,
    #[serde(default)]
    pub block_producer: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerSection {
    /// Consumed by the REST collaborator; carried through unchanged.
    #[serde(default)]
    pub rest_port: u16,
    #[serde(default)]
    pub internal_rest_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2pSection {
    #[serde(default = "default_listen_address")]
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub boot_nodes: Vec<String>,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbSection {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletSection {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenesisSection {
    pub system_addresses: Vec<String>,
    pub system_balances: Vec<u64>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorEntry {
    pub address: String,
    pub public_key_hex: String,
    pub voting_power: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValidatorsSection {
    #[serde(default)]
    pub list: Vec<ValidatorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeSection {
    pub min_fee: u64,
    pub block_reward: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionSection {
    pub max_memo_size: usize,
    pub max_data_size: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConsensusSection {
    #[serde(default)]
    pub proposer_selection: ProposerSelection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub common: CommonSection,
    #[serde(default)]
    pub server: ServerSection,
    pub p2p: P2pSection,
    pub db: DbSection,
    pub wallet: WalletSection,
    pub genesis: GenesisSection,
    #[serde(default)]
    pub validators: ValidatorsSection,
    pub fee: FeeSection,
    pub transaction: TransactionSection,
    #[serde(default)]
    pub consensus: ConsensusSection,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.common.network_id.is_empty() {
            return Err(ConfigError::Invalid("common.network_id is empty".into()));
        }
        if self.p2p.port == 0 {
            return Err(ConfigError::Invalid("p2p.port is zero".into()));
        }
        if self.genesis.system_addresses.len() != self.genesis.system_balances.len() {
            return Err(ConfigError::Invalid(
                "genesis addresses and balances differ in length".into(),
            ));
        }
        if self.genesis.system_addresses.is_empty() {
            return Err(ConfigError::Invalid("genesis has no funded addresses".into()));
        }
        if self.genesis.system_balances.iter().any(|b| *b == 0) {
            return Err(ConfigError::Invalid("genesis balance of zero".into()));
        }
        self.genesis_addresses()?;
        self.validator_set()?;
        Ok(())
    }

    pub fn genesis_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.genesis
            .system_addresses
            .iter()
            .map(|s| {
                Address::from_str(s)
                    .map_err(|_| ConfigError::Invalid(format!("bad genesis address {s}")))
            })
            .collect()
    }

    /// The configured validator set. Entry addresses must match their
    /// public keys' derived addresses.
    pub fn validator_set(&self) -> Result<ValidatorSet, ConfigError> {
        let mut validators = Vec::with_capacity(self.validators.list.len());
        for entry in &self.validators.list {
            let address = Address::from_str(&entry.address)
                .map_err(|_| ConfigError::Invalid(format!("bad validator address {}", entry.address)))?;
            let public_key = hex::decode(&entry.public_key_hex).map_err(|_| {
                ConfigError::Invalid(format!("bad validator public key for {}", entry.address))
            })?;
            let derived = crate::crypto::address_of_public_key(&public_key).map_err(|_| {
                ConfigError::Invalid(format!("undecodable public key for {}", entry.address))
            })?;
            if derived != address {
                return Err(ConfigError::Invalid(format!(
                    "validator {} does not match its public key",
                    entry.address
                )));
            }
            if entry.voting_power == 0 {
                return Err(ConfigError::Invalid(format!(
                    "validator {} has zero voting power",
                    entry.address
                )));
            }
            validators.push(Validator {
                address,
                public_key,
                voting_power: entry.voting_power,
                active: true,
            });
        }
        Ok(ValidatorSet::new(validators))
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            min_fee: self.fee.min_fee,
            block_reward: self.fee.block_reward,
            max_memo_size: self.transaction.max_memo_size,
            max_data_size: self.transaction.max_data_size,
        }
    }

    pub fn p2p_config(&self) -> P2pConfig {
        P2pConfig {
            address: self.p2p.address.clone(),
            port: self.p2p.port,
            network_id: self.common.network_id.clone(),
            boot_nodes: self.p2p.boot_nodes.clone(),
        }
    }

    /// Whether this node builds and commits blocks (solo or as proposer).
    pub fn produces_blocks(&self) -> bool {
        self.common.block_producer || self.common.mode == NodeMode::Validator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(validators: &str) -> String {
        format!(
            r#"
[common]
port = 9000
mode = "validator"
network_id = "abcfe-test"
block_producer = true

[p2p]
port = 9001
boot_nodes = []

[db]
path = "/tmp/abcfe-test-db"

[wallet]
path = "/tmp/abcfe-test-key"

[genesis]
system_addresses = ["{addr}"]
system_balances = [1000000]
timestamp = 1700000000

{validators}

[fee]
min_fee = 10
block_reward = 50

[transaction]
max_memo_size = 256
max_data_size = 1024
"#,
            addr = "11".repeat(20),
            validators = validators,
        )
    }

    #[test]
    fn minimal_config_parses() {
        let cfg: Config = toml::from_str(&sample("")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.common.mode, NodeMode::Validator);
        assert!(cfg.produces_blocks());
        assert_eq!(cfg.ledger_config().min_fee, 10);
        assert!(cfg.validator_set().unwrap().is_empty());
    }

    #[test]
    fn validator_entry_must_match_its_key() {
        let kp = crate::crypto::KeyPair::generate();
        let good = format!(
            "[[validators.list]]\naddress = \"{}\"\npublic_key_hex = \"{}\"\nvoting_power = 10\n",
            kp.address(),
            hex::encode(kp.public_key_der()),
        );
        let cfg: Config = toml::from_str(&sample(&good)).unwrap();
        let set = cfg.validator_set().unwrap();
        assert_eq!(set.active_count(), 1);
        assert!(set.is_active(&kp.address()));

        let mismatched = format!(
            "[[validators.list]]\naddress = \"{}\"\npublic_key_hex = \"{}\"\nvoting_power = 10\n",
            "22".repeat(20),
            hex::encode(kp.public_key_der()),
        );
        let cfg: Config = toml::from_str(&sample(&mismatched)).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn genesis_length_mismatch_rejected() {
        let raw = sample("").replace("system_balances = [1000000]", "system_balances = []");
        let cfg: Config = toml::from_str(&raw).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn weighted_selection_accepted() {
        let raw = format!("{}\n[consensus]\nproposer_selection = \"weighted\"\n", sample(""));
        let cfg: Config = toml::from_str(&raw).unwrap();
        assert_eq!(cfg.consensus.proposer_selection, ProposerSelection::Weighted);
    }
}
