//! Node configuration.

use crate::Args;
use anyhow::{bail, Context, Result};
use hashweave_chain::PruningConfig;
use hashweave_consensus::block::Address;
use hashweave_consensus::{ChainParams, ChainParamsConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name, used in logs only.
    pub node_name: String,
    /// Network preset (mainnet, devnet).
    pub network: String,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Consensus parameter overrides, applied over the network preset.
    pub chain: ChainParamsConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Local block production.
    pub devnet: DevnetConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::default_for_network("devnet")
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Number of recent heights whose fork blocks are kept.
    /// -1 keeps all fork blocks.
    pub blocks_to_keep: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { blocks_to_keep: -1 }
    }
}

impl StorageConfig {
    pub fn pruning(&self) -> PruningConfig {
        match u32::try_from(self.blocks_to_keep) {
            Ok(keep) => PruningConfig::keep(keep),
            Err(_) => PruningConfig::default(),
        }
    }
}

/// Devnet block production.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevnetConfig {
    /// Blocks to mine on top of the current head after startup.
    pub mine_blocks: u64,
    /// Reward address as 40 hex characters. Zero address if unset.
    pub miner_address: Option<String>,
    /// Pause between produced blocks.
    pub block_interval_ms: u64,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            mine_blocks: 0,
            miner_address: None,
            block_interval_ms: 500,
        }
    }
}

impl DevnetConfig {
    pub fn miner(&self) -> Result<Address> {
        let Some(hex_address) = &self.miner_address else {
            return Ok(Address::ZERO);
        };
        let bytes = hex::decode(hex_address.trim_start_matches("0x"))
            .context("Miner address is not valid hex")?;
        let bytes: [u8; 20] = match bytes.try_into() {
            Ok(bytes) => bytes,
            Err(bytes) => bail!("Miner address must be 20 bytes, got {}", bytes.len()),
        };
        Ok(Address::new(bytes))
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            Self::parse(&content)?
        } else {
            Self::default_for_network(args.network.as_deref().unwrap_or("devnet"))
        };

        if let Some(ref network) = args.network {
            config.network = network.clone();
        }
        if let Some(ref data_dir) = args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(mine_blocks) = args.mine_blocks {
            config.devnet.mine_blocks = mine_blocks;
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        let data_dir = match network {
            "mainnet" => PathBuf::from(".hashweave"),
            other => PathBuf::from(format!(".hashweave-{}", other)),
        };

        Self {
            node_name: "hashweave-node".to_string(),
            network: network.to_string(),
            data_dir,
            chain: ChainParamsConfig::default(),
            storage: StorageConfig::default(),
            devnet: DevnetConfig::default(),
        }
    }

    /// Consensus parameters: the network preset with `[chain]` applied.
    pub fn chain_params(&self) -> Result<ChainParams> {
        let base = match self.network.as_str() {
            "mainnet" => ChainParams::mainnet(),
            "devnet" => ChainParams::devnet(),
            other => bail!("Unknown network '{}'", other),
        };
        Ok(ChainParams::from_config(base, &self.chain)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default_for_network("mainnet");
        assert_eq!(config.network, "mainnet");
        assert_eq!(config.chain_params().unwrap().difficulty_window, 120);
        assert!(!config.storage.pruning().is_enabled());
    }

    #[test]
    fn test_sections_override_preset() {
        let config = NodeConfig::parse(
            r#"
            network = "devnet"

            [chain]
            difficulty_window = 4
            transaction_validity_window = 30
            block_target_max_hex = "0x0fffff"

            [storage]
            blocks_to_keep = 100

            [devnet]
            mine_blocks = 3
            miner_address = "0101010101010101010101010101010101010101"
            "#,
        )
        .unwrap();

        let params = config.chain_params().unwrap();
        assert_eq!(params.difficulty_window, 4);
        assert_eq!(params.transaction_validity_window, 30);
        assert_eq!(params.nipopow_m, ChainParams::devnet().nipopow_m);
        assert_eq!(params.block_target_max(), &num_bigint::BigUint::from(0x0fffffu32));
        assert_eq!(config.storage.pruning(), PruningConfig::keep(100));
        assert_eq!(config.devnet.mine_blocks, 3);
        assert_eq!(config.devnet.miner().unwrap(), Address::new([1; 20]));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = NodeConfig::parse("[chain]\nnipopow_delta = 1.5\n").unwrap();
        let err = config.chain_params().unwrap_err();
        assert!(err.to_string().contains("nipopow_delta"));

        assert!(NodeConfig::parse("[chain]\nunknown = 1\n").is_err());
        assert!(NodeConfig::default_for_network("nowhere").chain_params().is_err());

        let mut config = NodeConfig::default();
        config.devnet.miner_address = Some("abcd".to_string());
        assert!(config.devnet.miner().is_err());
    }
}
