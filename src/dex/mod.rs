/*
 * Ledger seam: the read and write surface of the router, factory, pair and
 * ERC-20 contracts this client depends on
 */

pub mod contracts;
mod ledger;

pub use ledger::EthersLedger;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use crate::models::{AqyntError, Result};
use crate::orchestrator::TransactionIntent;
use crate::tokens::TokenMetadata;

/// One pool as read in a single batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairDetails {
    pub pair: Address,
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    pub total_supply: U256,
    pub lp_balance: Option<U256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[async_trait]
pub trait DexLedger: Send + Sync {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;
    async fn decimals(&self, token: Address) -> Result<u8>;
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256>;
    /// Name, symbol and decimals in one batch; any missing field fails the read.
    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata>;
    async fn get_amounts_out(&self, amount_in: U256, path: &[Address]) -> Result<Vec<U256>>;
    async fn all_pairs_length(&self) -> Result<U256>;
    /// Pair addresses for indices `0..count`; `None` where that entry failed.
    async fn all_pairs(&self, count: u64) -> Result<Vec<Option<Address>>>;
    /// Pool details per pair, with the owner's LP balance when an owner is
    /// given; `None` where any call for that pair failed.
    async fn pair_details(&self, pairs: &[Address], owner: Option<Address>) -> Result<Vec<Option<PairDetails>>>;
    /// Account that signs writes, when one is configured.
    fn account(&self) -> Option<Address>;
    async fn submit(&self, intent: &TransactionIntent) -> Result<H256>;
    async fn wait_for_confirmation(&self, hash: H256) -> Result<ReceiptStatus>;
}

/// Maps a wallet or node error onto the write-failure taxonomy, telling a
/// rejected signature apart from every other failure.
#[must_use]
pub fn classify_write_error(message: impl Into<String>) -> AqyntError {
    let message = message.into();
    let lower = message.to_lowercase();
    let rejected = lower.contains("code: 4001")
        || lower.contains("user rejected")
        || lower.contains("user denied")
        || lower.contains("rejected the request");

    if rejected {
        AqyntError::UserRejected(message)
    } else {
        AqyntError::TransactionFailed(message)
    }
}
