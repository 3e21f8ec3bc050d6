/*
 * Balance and allowance reader
 */

use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, warn};
use crate::dex::DexLedger;
use crate::models::Result;
use crate::queries::{QueryKey, QueryStore};
use crate::tokens::Token;
use crate::utils::format_fixed;

const DISPLAY_PLACES: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceView {
    /// Token or owner unset, so nothing was asked.
    Disabled,
    /// The amount may be known but its decimals are not yet.
    Loading { amount: Option<U256> },
    Ready { amount: U256, decimals: u8 },
}

impl BalanceView {
    #[must_use]
    pub fn formatted(&self) -> String {
        match self {
            BalanceView::Ready { amount, decimals } => format_fixed(*amount, *decimals, DISPLAY_PLACES),
            _ => "0.0000".to_string(),
        }
    }

    #[must_use]
    pub fn amount(&self) -> Option<U256> {
        match self {
            BalanceView::Ready { amount, .. } => Some(*amount),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, BalanceView::Loading { .. })
    }
}

pub struct BalanceReader {
    ledger: Arc<dyn DexLedger>,
    queries: Arc<QueryStore>,
}

impl BalanceReader {
    pub fn new(ledger: Arc<dyn DexLedger>, queries: Arc<QueryStore>) -> Self {
        Self { ledger, queries }
    }

    pub async fn balance(&self, token: Option<&Token>, owner: Option<Address>) -> Result<BalanceView> {
        self.read_balance(token, owner, false).await
    }

    /// Same as `balance` but always asks the chain. Used right before a gate
    /// decides whether a write may go ahead.
    pub async fn live_balance(&self, token: Option<&Token>, owner: Option<Address>) -> Result<BalanceView> {
        self.read_balance(token, owner, true).await
    }

    async fn read_balance(&self, token: Option<&Token>, owner: Option<Address>, live: bool) -> Result<BalanceView> {
        let (Some(token), Some(owner)) = (token, owner) else {
            return Ok(BalanceView::Disabled);
        };

        let key = QueryKey::Balance { token: token.address, owner };
        let amount = match self.queries.get(&key).filter(|_| !live) {
            Some(cached) => cached,
            None => {
                let fresh = self.ledger.balance_of(token.address, owner).await?;
                self.queries.put(key, fresh);
                fresh
            }
        };

        match self.decimals(token.address).await {
            Some(decimals) => Ok(BalanceView::Ready { amount, decimals }),
            None => Ok(BalanceView::Loading { amount: Some(amount) }),
        }
    }

    /// Decimals as reported by the contract. `None` while unknown.
    pub async fn decimals(&self, token: Address) -> Option<u8> {
        if let Some(cached) = self.queries.decimals(token) {
            return Some(cached);
        }
        match self.ledger.decimals(token).await {
            Ok(decimals) => {
                self.queries.put_decimals(token, decimals);
                Some(decimals)
            }
            Err(e) => {
                warn!("decimals() failed for {:?}: {}", token, e);
                None
            }
        }
    }

    pub async fn allowance(
        &self,
        token: Option<Address>,
        owner: Option<Address>,
        spender: Address,
    ) -> Result<Option<U256>> {
        self.read_allowance(token, owner, spender, false).await
    }

    /// Allowance straight from the chain, refreshing the cached read.
    pub async fn live_allowance(
        &self,
        token: Option<Address>,
        owner: Option<Address>,
        spender: Address,
    ) -> Result<Option<U256>> {
        self.read_allowance(token, owner, spender, true).await
    }

    async fn read_allowance(
        &self,
        token: Option<Address>,
        owner: Option<Address>,
        spender: Address,
        live: bool,
    ) -> Result<Option<U256>> {
        let (Some(token), Some(owner)) = (token, owner) else {
            return Ok(None);
        };

        let key = QueryKey::Allowance { token, owner, spender };
        if let Some(cached) = self.queries.get(&key).filter(|_| !live) {
            return Ok(Some(cached));
        }

        let fresh = self.ledger.allowance(token, owner, spender).await?;
        debug!("Allowance of {:?} for {:?} on {:?}: {}", owner, spender, token, fresh);
        self.queries.put(key, fresh);
        Ok(Some(fresh))
    }
}
