/*
 * Token registry: default token table, user-added tokens and on-chain lookup
 */

mod store;

pub use store::{CustomTokenStore, CUSTOM_TOKENS_KEY};

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use tracing::{info, warn};
use crate::dex::DexLedger;
use crate::models::{AqyntError, Result};
use crate::utils::parse_address;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub name: String,
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    #[serde(default, rename = "logoURI", skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    #[serde(default, rename = "isNative", skip_serializing_if = "std::ops::Not::not")]
    pub is_native: bool,
}

// Identity is the address alone.
impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl Token {
    #[must_use]
    pub fn same_as(&self, address: Address) -> bool {
        self.address == address
    }
}

/// Compile-time description of a token in the default table.
#[derive(Debug, Clone, Copy)]
pub struct TokenSpec {
    pub name: &'static str,
    pub symbol: &'static str,
    pub address: &'static str,
    pub decimals: u8,
    pub logo_uri: &'static str,
}

impl TokenSpec {
    #[must_use]
    pub fn address(&self) -> Address {
        Address::from_str(self.address).unwrap_or_else(|_| Address::zero())
    }

    #[must_use]
    pub fn to_token(&self) -> Token {
        Token {
            name: self.name.to_string(),
            symbol: self.symbol.to_string(),
            address: self.address(),
            decimals: self.decimals,
            logo_uri: Some(self.logo_uri.to_string()),
            is_native: false,
        }
    }
}

pub const WSTT: TokenSpec = TokenSpec {
    name: "Somnia Test Token",
    symbol: "WSTT",
    address: "0xF22eF0085f6511f70b01a68F360dCc56261F768a",
    decimals: 18,
    logo_uri: "https://placehold.co/32x32/A06CD5/FFFFFF/png?text=WSTT",
};

pub const WETH: TokenSpec = TokenSpec {
    name: "Wrapped Ether",
    symbol: "WETH",
    address: "0xdd8f41bf80d0E47132423339ca06bC6413da96b5",
    decimals: 18,
    logo_uri: "https://placehold.co/32x32/7d7d7d/FFFFFF/png?text=WETH",
};

pub const USDT: TokenSpec = TokenSpec {
    name: "Tether USD",
    symbol: "USDT",
    address: "0xAe5b5C30003ef1F8eAE9E00e79c6CCa7D48E6e8A",
    decimals: 6,
    logo_uri: "https://placehold.co/32x32/26A17B/FFFFFF/png?text=USDT",
};

pub const USDC: TokenSpec = TokenSpec {
    name: "USD Coin",
    symbol: "USDC",
    address: "0x833A00575F39037403006A822C3fd7AD9abFF32C",
    decimals: 6,
    logo_uri: "https://placehold.co/32x32/2775CA/FFFFFF/png?text=USDC",
};

pub const WBTC: TokenSpec = TokenSpec {
    name: "Wrapped Bitcoin",
    symbol: "WBTC",
    address: "0xE3233Ee6E373Be04277a435facc262E7A9c46151",
    decimals: 8,
    logo_uri: "https://placehold.co/32x32/F7931A/FFFFFF/png?text=WBTC",
};

pub const DEFAULT_TOKENS: [TokenSpec; 5] = [WSTT, WETH, USDT, USDC, WBTC];

#[must_use]
pub fn placeholder_icon(symbol: &str) -> String {
    let text: String = symbol.chars().take(3).collect();
    format!("https://placehold.co/32x32/cccccc/000000/png?text={text}")
}

/// Metadata read from a token contract's ERC-20 surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

pub struct TokenRegistry {
    defaults: Vec<Token>,
    custom: Vec<Token>,
    store: Option<CustomTokenStore>,
}

impl TokenRegistry {
    /// Registry backed by a persisted custom token list.
    pub fn open(store: CustomTokenStore) -> Result<Self> {
        let custom = store.load()?;
        info!("Loaded {} custom tokens from {}", custom.len(), store.path().display());
        Ok(Self {
            defaults: DEFAULT_TOKENS.iter().map(TokenSpec::to_token).collect(),
            custom,
            store: Some(store),
        })
    }

    /// Registry whose custom tokens live only for the life of the process.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            defaults: DEFAULT_TOKENS.iter().map(TokenSpec::to_token).collect(),
            custom: Vec::new(),
            store: None,
        }
    }

    /// Default tokens first, then custom ones, one entry per address.
    #[must_use]
    pub fn all(&self) -> Vec<Token> {
        let mut seen = std::collections::HashSet::new();
        self.defaults
            .iter()
            .chain(self.custom.iter())
            .filter(|t| seen.insert(t.address))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn custom(&self) -> &[Token] {
        &self.custom
    }

    #[must_use]
    pub fn find(&self, address: Address) -> Option<Token> {
        self.defaults
            .iter()
            .chain(self.custom.iter())
            .find(|t| t.address == address)
            .cloned()
    }

    #[must_use]
    pub fn find_str(&self, address: &str) -> Option<Token> {
        parse_address(address).and_then(|a| self.find(a))
    }

    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Token> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.all();
        }
        let as_address = parse_address(&query);
        self.all()
            .into_iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&query)
                    || t.symbol.to_lowercase().contains(&query)
                    || as_address == Some(t.address)
            })
            .collect()
    }

    /// Resolves an address to a token, asking the chain when it is not known
    /// locally. Anything that does not answer name, symbol and decimals is
    /// rejected as not a fungible token.
    pub async fn lookup(&self, ledger: &dyn DexLedger, address: Address) -> Result<Token> {
        match self.find(address) {
            Some(token) => Ok(token),
            None => Self::fetch(ledger, address).await,
        }
    }

    /// On-chain half of `lookup`. Needs no registry, so callers can release
    /// their hold on it before the read.
    pub async fn fetch(ledger: &dyn DexLedger, address: Address) -> Result<Token> {
        let metadata = ledger.token_metadata(address).await.map_err(|e| {
            warn!("Token metadata lookup failed for {address:?}: {e}");
            AqyntError::InvalidToken(format!("{address:?} is not a valid token"))
        })?;

        if metadata.name.trim().is_empty() || metadata.symbol.trim().is_empty() {
            return Err(AqyntError::InvalidToken(format!("{address:?} is not a valid token")));
        }

        Ok(Token {
            logo_uri: Some(placeholder_icon(&metadata.symbol)),
            name: metadata.name,
            symbol: metadata.symbol,
            address,
            decimals: metadata.decimals,
            is_native: false,
        })
    }

    /// Appends a token to the custom list. Returns `false` when the address
    /// was already known.
    pub fn add_custom(&mut self, token: Token) -> Result<bool> {
        if self.find(token.address).is_some() {
            return Ok(false);
        }

        info!("Adding custom token {} at {:?}", token.symbol, token.address);
        self.custom.push(token);
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.custom) {
                self.custom.pop();
                return Err(e);
            }
        }
        Ok(true)
    }

    /// Token for pool display; unknown addresses get a generic stand-in.
    #[must_use]
    pub fn resolve_or_placeholder(&self, address: Address, slot: usize) -> Token {
        self.find(address).unwrap_or_else(|| Token {
            name: "Unknown".to_string(),
            symbol: format!("TKN{slot}"),
            address,
            decimals: 18,
            logo_uri: Some(placeholder_icon("TKN")),
            is_native: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_complete() {
        let registry = TokenRegistry::ephemeral();
        let symbols: Vec<String> = registry.all().into_iter().map(|t| t.symbol).collect();
        assert_eq!(symbols, vec!["WSTT", "WETH", "USDT", "USDC", "WBTC"]);
    }

    #[test]
    fn find_is_case_insensitive() {
        let registry = TokenRegistry::ephemeral();
        let upper = registry.find_str("0x833A00575F39037403006A822C3FD7AD9ABFF32C").unwrap();
        let lower = registry.find_str("0x833a00575f39037403006a822c3fd7ad9abff32c").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.symbol, "USDC");
    }

    #[test]
    fn search_matches_name_symbol_and_address() {
        let registry = TokenRegistry::ephemeral();
        assert_eq!(registry.search("usd").len(), 2);
        assert_eq!(registry.search("bitcoin")[0].symbol, "WBTC");
        assert_eq!(registry.search(&WETH.address.to_lowercase())[0].symbol, "WETH");
        assert_eq!(registry.search("").len(), 5);
    }

    #[test]
    fn add_custom_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let mut registry = TokenRegistry::open(CustomTokenStore::new(&path)).unwrap();

        let token = Token {
            name: "Aqynt".to_string(),
            symbol: "AQY".to_string(),
            address: Address::from_low_u64_be(0xA1),
            decimals: 18,
            logo_uri: Some(placeholder_icon("AQY")),
            is_native: false,
        };

        assert!(registry.add_custom(token.clone()).unwrap());
        assert!(!registry.add_custom(token.clone()).unwrap());

        let reopened = TokenRegistry::open(CustomTokenStore::new(&path)).unwrap();
        assert_eq!(reopened.custom(), &[token]);
    }

    #[test]
    fn default_tokens_are_never_added_twice() {
        let mut registry = TokenRegistry::ephemeral();
        assert!(!registry.add_custom(USDC.to_token()).unwrap());
        assert!(registry.custom().is_empty());
    }

    #[test]
    fn unknown_pool_tokens_get_placeholders() {
        let registry = TokenRegistry::ephemeral();
        let token = registry.resolve_or_placeholder(Address::from_low_u64_be(7), 1);
        assert_eq!(token.symbol, "TKN1");
        assert_eq!(token.decimals, 18);
    }

    #[test]
    fn placeholder_uses_symbol_prefix() {
        assert_eq!(placeholder_icon("DOGE"), "https://placehold.co/32x32/cccccc/000000/png?text=DOG");
    }
}
