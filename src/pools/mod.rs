/*
 * Pool discovery: factory enumeration and batched detail reads behind the
 * pools view
 */

mod valuation;

pub use valuation::{
    pool_share_percent, position_usd_value, remove_preview, Pricing, RemovePreview, NATIVE_REFERENCE,
    REMOVE_PRESETS, STABLE_REFERENCES,
};

use ethers::types::Address;
use std::sync::Arc;
use tracing::info;
use crate::dex::{DexLedger, PairDetails};
use crate::metrics::Metrics;
use crate::models::{AqyntError, Result};

/// One pool as observed in a single discovery pass. Never kept between
/// reads; the count and the details come from separate batches, so a pool
/// created in between shows up on the next pass.
pub type PoolSnapshot = PairDetails;

pub struct PoolDiscovery {
    ledger: Arc<dyn DexLedger>,
    metrics: Arc<Metrics>,
}

impl PoolDiscovery {
    pub fn new(ledger: Arc<dyn DexLedger>, metrics: Arc<Metrics>) -> Self {
        Self { ledger, metrics }
    }

    /// Every pool whose reads all succeeded, as of this call.
    pub async fn all_pools(&self) -> Result<Vec<PoolSnapshot>> {
        self.discover(None).await
    }

    /// Pools where `owner` holds LP tokens, as of this call.
    pub async fn user_pools(&self, owner: Address) -> Result<Vec<PoolSnapshot>> {
        self.discover(Some(owner)).await
    }

    /// Finds one pool by pair address, with `owner`'s LP balance.
    pub async fn pool(&self, pair: Address, owner: Option<Address>) -> Result<PoolSnapshot> {
        let details = self.ledger.pair_details(&[pair], owner).await?;
        details
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| AqyntError::ContractError(format!("Pool {pair:?} could not be read")))
    }

    async fn discover(&self, owner: Option<Address>) -> Result<Vec<PoolSnapshot>> {
        let length = self.ledger.all_pairs_length().await?;
        if length > u64::MAX.into() {
            return Err(AqyntError::CalculationError(format!("Pool count {length} out of range")));
        }
        let count = length.as_u64();

        let addresses = self.ledger.all_pairs(count).await?;
        let known: Vec<Address> = addresses.iter().flatten().copied().collect();
        let mut dropped = addresses.len() - known.len();

        let details = self.ledger.pair_details(&known, owner).await?;
        let mut pools: Vec<PoolSnapshot> = Vec::with_capacity(details.len());
        for entry in details {
            match entry {
                Some(pool) => pools.push(pool),
                None => dropped += 1,
            }
        }

        if owner.is_some() {
            pools.retain(|p| p.lp_balance.is_some_and(|lp| !lp.is_zero()));
        }
        if dropped > 0 {
            self.metrics.record_dropped_pools(dropped);
        }

        info!("Discovered {} pools of {} ({} dropped)", pools.len(), count, dropped);
        Ok(pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLedger;
    use crate::tokens::{USDC, WETH, WSTT};
    use ethers::types::U256;

    fn owner() -> Address {
        Address::from_low_u64_be(0xbeef)
    }

    struct Fixture {
        ledger: Arc<MockLedger>,
        metrics: Arc<Metrics>,
        pairs: Vec<Address>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MockLedger::new());
        let one = U256::exp10(18);
        let pairs = vec![
            ledger.add_pair(WSTT.address(), USDC.address(), one, U256::from(2_000_000u64), one),
            ledger.add_pair(WETH.address(), USDC.address(), one, U256::from(3_000_000_000u64), one),
            ledger.add_pair(WETH.address(), WSTT.address(), one, one, one),
        ];
        ledger.set_lp_balance(pairs[1], owner(), U256::from(5u64));
        Fixture {
            ledger,
            metrics: Arc::new(Metrics::new().unwrap()),
            pairs,
        }
    }

    fn discovery(f: &Fixture) -> PoolDiscovery {
        PoolDiscovery::new(f.ledger.clone(), f.metrics.clone())
    }

    #[tokio::test]
    async fn failed_entries_are_dropped_and_counted() {
        let f = fixture();
        f.ledger.fail_pair_index(0);
        f.ledger.fail_pair(f.pairs[2]);

        let pools = discovery(&f).all_pools().await.unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].pair, f.pairs[1]);
        assert_eq!(f.metrics.dropped_pools(), 2);
    }

    #[tokio::test]
    async fn user_pools_keep_positive_lp_only() {
        let f = fixture();
        let pools = discovery(&f).user_pools(owner()).await.unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].lp_balance, Some(U256::from(5u64)));
    }

    #[tokio::test]
    async fn every_read_sees_the_current_chain() {
        let f = fixture();
        let discovery = discovery(&f);
        assert_eq!(discovery.all_pools().await.unwrap().len(), 3);
        assert_eq!(discovery.user_pools(owner()).await.unwrap().len(), 1);

        let one = U256::exp10(18);
        let created = f.ledger.add_pair(USDC.address(), WSTT.address(), U256::from(4_000_000u64), one, one);
        f.ledger.set_lp_balance(f.pairs[0], owner(), U256::one());

        let pools = discovery.all_pools().await.unwrap();
        assert_eq!(pools.len(), 4);
        assert!(pools.iter().any(|p| p.pair == created));
        assert_eq!(discovery.user_pools(owner()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn single_pool_read_reports_failure() {
        let f = fixture();
        f.ledger.fail_pair(f.pairs[0]);
        let discovery = discovery(&f);
        assert!(discovery.pool(f.pairs[0], None).await.is_err());
        assert_eq!(discovery.pool(f.pairs[1], Some(owner())).await.unwrap().lp_balance, Some(U256::from(5u64)));
    }
}
