/*
 * Configuration management for the AqyntSwap client core
 */

use crate::models::{AqyntError, Result};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_RPC_URL: &str = "https://dream-rpc.somnia.network/";
pub const DEFAULT_CHAIN_ID: u64 = 50312;
pub const ROUTER_ADDRESS: &str = "0x3396dABE6634054D109AeAb91DDE4f1d3f63dC6B";
pub const FACTORY_ADDRESS: &str = "0xfC9F7c3402422D596767306137Ac80cC67f7c870";
pub const MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub storage: StorageConfig,
    pub quote: QuoteConfig,
    pub reads: ReadConfig,
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub router: Address,
    pub factory: Address,
    pub multicall: Address,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WalletConfig {
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    pub account: Option<Address>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub custom_tokens_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuoteConfig {
    pub debounce_ms: u64,
    pub stale_secs: u64,
}

/// Freshness of cached balance and allowance reads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadConfig {
    pub stale_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
    /// Assumed USD price of the native-wrapped reference token.
    pub native_usd_price: Decimal,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                log_level: "info".to_string(),
            },
            chain: ChainConfig {
                rpc_url: DEFAULT_RPC_URL.to_string(),
                chain_id: DEFAULT_CHAIN_ID,
                router: parse_const(ROUTER_ADDRESS),
                factory: parse_const(FACTORY_ADDRESS),
                multicall: parse_const(MULTICALL3_ADDRESS),
            },
            wallet: WalletConfig::default(),
            storage: StorageConfig {
                custom_tokens_path: PathBuf::from("aqyntswap-tokens.json"),
            },
            quote: QuoteConfig {
                debounce_ms: 300,
                stale_secs: 10,
            },
            reads: ReadConfig { stale_secs: 15 },
            pricing: PricingConfig {
                native_usd_price: Decimal::from(1800),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|e| AqyntError::ConfigError(format!("Invalid port: {e}")))?,
                log_level: env::var("LOG_LEVEL").unwrap_or(defaults.server.log_level),
            },
            chain: ChainConfig {
                rpc_url: env::var("RPC_URL").unwrap_or(defaults.chain.rpc_url),
                chain_id: env_parse("CHAIN_ID", defaults.chain.chain_id)?,
                router: env_address("ROUTER_ADDRESS", defaults.chain.router)?,
                factory: env_address("FACTORY_ADDRESS", defaults.chain.factory)?,
                multicall: env_address("MULTICALL_ADDRESS", defaults.chain.multicall)?,
            },
            wallet: WalletConfig {
                private_key: env::var("WALLET_PRIVATE_KEY").ok().filter(|k| !k.trim().is_empty()),
                account: match env::var("WALLET_ADDRESS") {
                    Ok(raw) => Some(Address::from_str(raw.trim()).map_err(|e| {
                        AqyntError::ConfigError(format!("Invalid WALLET_ADDRESS: {e}"))
                    })?),
                    Err(_) => None,
                },
            },
            storage: StorageConfig {
                custom_tokens_path: env::var("CUSTOM_TOKENS_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.custom_tokens_path),
            },
            quote: QuoteConfig {
                debounce_ms: env_parse("QUOTE_DEBOUNCE_MS", defaults.quote.debounce_ms)?,
                stale_secs: env_parse("QUOTE_STALE_SECS", defaults.quote.stale_secs)?,
            },
            reads: ReadConfig {
                stale_secs: env_parse("READ_STALE_SECS", defaults.reads.stale_secs)?,
            },
            pricing: PricingConfig {
                native_usd_price: env_parse("NATIVE_USD_PRICE", defaults.pricing.native_usd_price)?,
            },
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AqyntError::ConfigError(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_address(key: &str, default: Address) -> Result<Address> {
    match env::var(key) {
        Ok(raw) => Address::from_str(raw.trim())
            .map_err(|e| AqyntError::ConfigError(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

// Only used for the compiled-in constants above.
fn parse_const(address: &str) -> Address {
    Address::from_str(address).unwrap_or_else(|_| Address::zero())
}
