//! Network consensus parameters.
//!
//! - `ChainParams::mainnet()` for the production network
//! - `ChainParams::devnet()` for local mining and tests (easy target)
//! - `ChainParams::from_config()` for custom networks, layered over a preset

use crate::hash::Hash;
use crate::target::{difficulty_for, hash_to_target, pow2, target_height};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::Deserialize;
use std::fmt;

/// Error when constructing ChainParams from configuration.
#[derive(Debug, Clone)]
pub struct ChainParamsError {
    /// The field that is invalid.
    pub field: &'static str,
    /// Description of the error.
    pub message: String,
}

impl fmt::Display for ChainParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainParams error for '{}': {}", self.field, self.message)
    }
}

impl std::error::Error for ChainParamsError {}

/// Configuration overrides for ChainParams, loaded from TOML.
///
/// Every field is optional; unset fields keep the value of the preset the
/// overrides are applied to.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainParamsConfig {
    /// Target block interval in seconds.
    pub block_time_secs: Option<u64>,
    /// Maximum (easiest) target as a hex string, optional "0x" prefix.
    pub block_target_max_hex: Option<String>,
    /// Number of blocks in the retarget window.
    pub difficulty_window: Option<u32>,
    /// Maximum retarget adjustment per block.
    pub max_adjustment_factor: Option<u32>,
    /// Halve the distance of each adjustment from 1.
    pub dampen_retarget: Option<bool>,
    /// NIPoPoW minimum superchain length.
    pub nipopow_m: Option<u32>,
    /// NIPoPoW dense suffix length.
    pub nipopow_k: Option<u32>,
    /// NIPoPoW quality tolerance, strictly between 0 and 1.
    pub nipopow_delta: Option<f64>,
    /// Maximum serialized block size in bytes.
    pub block_size_max: Option<usize>,
    /// Allowed clock drift into the future, in seconds.
    pub timestamp_drift_max_secs: Option<u64>,
    /// Miner reward per block.
    pub block_reward: Option<u64>,
    /// Blocks, from its validity start height, in which a transaction may
    /// be included.
    pub transaction_validity_window: Option<u32>,
    /// Genesis block timestamp in seconds.
    pub genesis_timestamp: Option<u64>,
}

/// Network-specific consensus parameters.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Target block interval in seconds.
    pub block_time: u64,

    /// Easiest allowed target. Difficulty is measured relative to it.
    block_target_max: BigUint,

    /// Blocks spanned by the retarget window.
    pub difficulty_window: u32,

    /// Retarget adjustment is clamped to `[1/f, f]`.
    pub max_adjustment_factor: u32,

    pub dampen_retarget: bool,

    /// Minimum superchain length (m).
    pub nipopow_m: u32,

    /// Dense suffix length (k).
    pub nipopow_k: u32,

    /// Quality tolerance (δ).
    pub nipopow_delta: f64,

    pub block_size_max: usize,

    pub timestamp_drift_max: u64,

    pub block_reward: u64,

    /// A transaction is valid in blocks `start..start + window`.
    pub transaction_validity_window: u32,

    pub genesis_timestamp: u64,
}

impl ChainParams {
    /// Production network parameters.
    pub fn mainnet() -> Self {
        Self {
            block_time: 60,
            block_target_max: pow2(240),
            difficulty_window: 120,
            max_adjustment_factor: 2,
            dampen_retarget: true,
            nipopow_m: 240,
            nipopow_k: 120,
            nipopow_delta: 0.15,
            block_size_max: 100_000,
            timestamp_drift_max: 600,
            block_reward: 5_000,
            transaction_validity_window: 120,
            genesis_timestamp: 1_700_000_000,
        }
    }

    /// Local network with an easy target and short windows.
    pub fn devnet() -> Self {
        Self {
            block_target_max: pow2(252),
            difficulty_window: 10,
            nipopow_m: 5,
            nipopow_k: 6,
            ..Self::mainnet()
        }
    }

    /// Apply configuration overrides to `base`.
    ///
    /// Returns an error naming the offending field.
    pub fn from_config(
        base: ChainParams,
        config: &ChainParamsConfig,
    ) -> Result<Self, ChainParamsError> {
        let mut params = base;

        if let Some(hex) = &config.block_target_max_hex {
            params.block_target_max = parse_target_hex(hex)?;
        }
        if let Some(v) = config.block_time_secs {
            if v == 0 {
                return Err(invalid("block_time_secs", "must be positive"));
            }
            params.block_time = v;
        }
        if let Some(v) = config.difficulty_window {
            if v == 0 {
                return Err(invalid("difficulty_window", "must be positive"));
            }
            params.difficulty_window = v;
        }
        if let Some(v) = config.max_adjustment_factor {
            if v == 0 {
                return Err(invalid("max_adjustment_factor", "must be at least 1"));
            }
            params.max_adjustment_factor = v;
        }
        if let Some(v) = config.dampen_retarget {
            params.dampen_retarget = v;
        }
        if let Some(v) = config.nipopow_m {
            if v == 0 {
                return Err(invalid("nipopow_m", "must be positive"));
            }
            params.nipopow_m = v;
        }
        if let Some(v) = config.nipopow_k {
            if v == 0 {
                return Err(invalid("nipopow_k", "must be positive"));
            }
            params.nipopow_k = v;
        }
        if let Some(v) = config.nipopow_delta {
            if !(v > 0.0 && v < 1.0) {
                return Err(invalid("nipopow_delta", "must be strictly between 0 and 1"));
            }
            params.nipopow_delta = v;
        }
        if let Some(v) = config.block_size_max {
            params.block_size_max = v;
        }
        if let Some(v) = config.timestamp_drift_max_secs {
            params.timestamp_drift_max = v;
        }
        if let Some(v) = config.block_reward {
            params.block_reward = v;
        }
        if let Some(v) = config.transaction_validity_window {
            if v == 0 {
                return Err(invalid("transaction_validity_window", "must be positive"));
            }
            params.transaction_validity_window = v;
        }
        if let Some(v) = config.genesis_timestamp {
            params.genesis_timestamp = v;
        }

        Ok(params)
    }

    /// Builder-style override of the maximum target (tests, devnets).
    pub fn with_block_target_max(mut self, target: BigUint) -> Self {
        self.block_target_max = target;
        self
    }

    pub fn block_target_max(&self) -> &BigUint {
        &self.block_target_max
    }

    /// `1 <= target <= max`.
    pub fn is_valid_target(&self, target: &BigUint) -> bool {
        target >= &BigUint::one() && target <= &self.block_target_max
    }

    /// Number of bits by which `target` is harder than the maximum target.
    pub fn target_depth(&self, target: &BigUint) -> i32 {
        target_height(&self.block_target_max) as i32 - target_height(target) as i32
    }

    /// Depth of a block hash; the superchain level it belongs to.
    pub fn hash_depth(&self, hash: &Hash) -> i32 {
        self.target_depth(&hash_to_target(hash))
    }

    /// Difficulty of a target relative to the maximum target.
    pub fn difficulty(&self, target: &BigUint) -> BigUint {
        difficulty_for(&self.block_target_max, target)
    }

    /// Work actually done by a hash, `max / hash`.
    pub fn real_difficulty(&self, hash: &Hash) -> BigUint {
        let value = hash_to_target(hash);
        if value.is_zero() {
            return self.block_target_max.clone();
        }
        &self.block_target_max / value
    }
}

fn invalid(field: &'static str, message: &str) -> ChainParamsError {
    ChainParamsError {
        field,
        message: message.to_string(),
    }
}

fn parse_target_hex(raw: &str) -> Result<BigUint, ChainParamsError> {
    let cleaned = raw.trim();
    let cleaned = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(cleaned);

    let target = BigUint::parse_bytes(cleaned.as_bytes(), 16).ok_or_else(|| ChainParamsError {
        field: "block_target_max_hex",
        message: format!("invalid hex string: '{}'", raw),
    })?;

    if target.is_zero() {
        return Err(invalid("block_target_max_hex", "target cannot be zero"));
    }
    if target.bits() > 256 {
        return Err(invalid("block_target_max_hex", "target exceeds 256 bits"));
    }
    Ok(target)
}
