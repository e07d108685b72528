//! `config.json`: chain parameters, block source and parser tuning.

use std::fs;
use std::path::{Path, PathBuf};

use blockidx_script::DedupAddressType;
use serde::{Deserialize, Serialize};

use crate::error::ParserError;
use crate::write_file_atomic;

/// Bumped whenever the on-disk layout changes incompatibly.
pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    pub version: u32,
    pub chain: ChainConfig,
    pub parser: ParserConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ChainConfig {
    pub coin_name: String,
    pub data_directory: PathBuf,
    /// Witness programs are only recognized from this height on.
    pub segwit_activation_height: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ParserConfig {
    /// Positive: stop after this many blocks. Negative: stay this many blocks
    /// behind the tip. Zero: everything.
    pub max_block_num: i32,
    pub disk: DiskConfig,
    #[serde(default = "default_hash_index_cache")]
    pub hash_index_cache_size: usize,
    #[serde(default)]
    pub bloom: BloomConfig,
    /// Blocks of script-record undo history kept for reorgs.
    #[serde(default = "default_rollback_window")]
    pub rollback_window: u32,
    #[serde(default = "default_batch_tx_limit")]
    pub batch_tx_limit: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DiskConfig {
    pub coin_directory: PathBuf,
    pub magic: u32,
}

impl DiskConfig {
    pub fn blocks_dir(&self) -> PathBuf {
        self.coin_directory.join("blocks")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct BloomConfig {
    pub false_positive_rate: f64,
    pub pubkey_capacity: u64,
    pub scripthash_capacity: u64,
    pub multisig_capacity: u64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            false_positive_rate: 0.05,
            pubkey_capacity: 600_000_000,
            scripthash_capacity: 100_000_000,
            multisig_capacity: 100_000_000,
        }
    }
}

impl BloomConfig {
    /// Starting capacity of a deduplicated type's filter.
    pub fn capacity(&self, dedup: DedupAddressType) -> u64 {
        match dedup {
            DedupAddressType::Pubkey => self.pubkey_capacity,
            DedupAddressType::ScriptHash => self.scripthash_capacity,
            DedupAddressType::Multisig => self.multisig_capacity,
            _ => 0,
        }
    }
}

fn default_hash_index_cache() -> usize {
    20_000
}

fn default_rollback_window() -> u32 {
    100
}

fn default_batch_tx_limit() -> u32 {
    10_000_000
}

struct CoinParams {
    magic: u32,
    segwit_activation_height: u32,
    coin_dir_hint: &'static str,
}

fn coin_params(coin: &str) -> Option<CoinParams> {
    let params = match coin {
        "bitcoin" => CoinParams {
            magic: 0xd9b4_bef9,
            segwit_activation_height: 481_824,
            coin_dir_hint: "",
        },
        "bitcoin_testnet" => CoinParams {
            magic: 0x0709_110b,
            segwit_activation_height: 834_624,
            coin_dir_hint: "testnet3",
        },
        "bitcoin_regtest" => CoinParams {
            magic: 0xdab5_bffa,
            segwit_activation_height: 0,
            coin_dir_hint: "regtest",
        },
        "litecoin" => CoinParams {
            magic: 0xdbb6_c0fb,
            segwit_activation_height: 1_201_536,
            coin_dir_hint: "",
        },
        "litecoin_testnet" => CoinParams {
            magic: 0xf1c8_d2fd,
            segwit_activation_height: 0,
            coin_dir_hint: "testnet4",
        },
        _ => return None,
    };
    Some(params)
}

pub const SUPPORTED_COINS: &[&str] = &[
    "bitcoin",
    "bitcoin_testnet",
    "bitcoin_regtest",
    "litecoin",
    "litecoin_testnet",
];

impl Config {
    /// Builds the default configuration for a known coin. `magic` overrides
    /// the coin's block-file magic.
    pub fn for_coin(
        coin: &str,
        data_directory: PathBuf,
        coin_directory: PathBuf,
        magic: Option<u32>,
    ) -> Result<Self, ParserError> {
        let params = coin_params(coin).ok_or_else(|| {
            ParserError::Config(format!(
                "unknown coin '{coin}' (expected one of {})",
                SUPPORTED_COINS.join(", ")
            ))
        })?;
        let coin_directory = if params.coin_dir_hint.is_empty() {
            coin_directory
        } else {
            coin_directory.join(params.coin_dir_hint)
        };
        Ok(Self {
            version: CONFIG_VERSION,
            chain: ChainConfig {
                coin_name: coin.to_string(),
                data_directory,
                segwit_activation_height: params.segwit_activation_height,
            },
            parser: ParserConfig {
                max_block_num: 0,
                disk: DiskConfig {
                    coin_directory,
                    magic: magic.unwrap_or(params.magic),
                },
                hash_index_cache_size: default_hash_index_cache(),
                bloom: BloomConfig::default(),
                rollback_window: default_rollback_window(),
                batch_tx_limit: default_batch_tx_limit(),
            },
        })
    }

    pub fn load(path: &Path) -> Result<Self, ParserError> {
        let text = fs::read_to_string(path)
            .map_err(|err| ParserError::Config(format!("failed to read {}: {err}", path.display())))?;
        let raw: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| ParserError::Config(format!("invalid config {}: {err}", path.display())))?;
        let found = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ParserError::Config(format!("{} has no version field", path.display())))?;
        if found != u64::from(CONFIG_VERSION) {
            return Err(ParserError::VersionMismatch {
                found: found as u32,
                expected: CONFIG_VERSION,
            });
        }
        serde_json::from_value(raw)
            .map_err(|err| ParserError::Config(format!("invalid config {}: {err}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), ParserError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| ParserError::Config(err.to_string()))?;
        write_file_atomic(path, json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_mismatch_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let mut config = Config::for_coin(
            "bitcoin_regtest",
            dir.path().to_path_buf(),
            PathBuf::from("/coin"),
            None,
        )
        .expect("config");
        config.version = CONFIG_VERSION + 1;
        config.save(&path).expect("save");
        match Config::load(&path) {
            Err(ParserError::VersionMismatch { found, expected }) => {
                assert_eq!(found, CONFIG_VERSION + 1);
                assert_eq!(expected, CONFIG_VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn optional_parser_settings_take_defaults() {
        let json = r#"{
            "version": 1,
            "chain": {"coin_name": "bitcoin", "data_directory": "/data", "segwit_activation_height": 481824},
            "parser": {"max_block_num": -6, "disk": {"coin_directory": "/btc", "magic": 3652501241}}
        }"#;
        let config: Config = serde_json::from_str(json).expect("parse");
        assert_eq!(config.parser.hash_index_cache_size, 20_000);
        assert_eq!(config.parser.bloom, BloomConfig::default());
        assert_eq!(config.parser.disk.blocks_dir(), PathBuf::from("/btc/blocks"));
    }

    #[test]
    fn unknown_coin_is_a_config_error() {
        let err = Config::for_coin("dogecoin", PathBuf::new(), PathBuf::new(), None)
            .expect_err("unknown coin");
        assert!(matches!(err, ParserError::Config(_)));
    }
}
