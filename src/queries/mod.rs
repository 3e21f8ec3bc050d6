/*
 * Keyed query cache with explicit invalidation and change notification
 */

use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Balance { token: Address, owner: Address },
    Allowance { token: Address, owner: Address, spender: Address },
}

/// Reasons cached reads go stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Allowance { token: Address, owner: Address },
    Balances { owner: Address },
    Pools,
    All,
}

impl Invalidation {
    fn matches(&self, key: &QueryKey) -> bool {
        match (self, key) {
            (Invalidation::All, _) => true,
            (Invalidation::Allowance { token, owner }, QueryKey::Allowance { token: t, owner: o, .. }) => {
                token == t && owner == o
            }
            (Invalidation::Balances { owner }, QueryKey::Balance { owner: o, .. }) => owner == o,
            _ => false,
        }
    }
}

/// How long a balance or allowance read is served from memory.
pub const DEFAULT_READ_STALE: Duration = Duration::from_secs(15);

pub struct QueryStore {
    stale_after: Duration,
    amounts: RwLock<HashMap<QueryKey, (Instant, U256)>>,
    // Token decimals never change, so they are never invalidated.
    decimals: RwLock<HashMap<Address, u8>>,
    events: broadcast::Sender<Invalidation>,
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_stale_after(DEFAULT_READ_STALE)
    }

    #[must_use]
    pub fn with_stale_after(stale_after: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            stale_after,
            amounts: RwLock::new(HashMap::new()),
            decimals: RwLock::new(HashMap::new()),
            events,
        }
    }

    #[must_use]
    pub fn get(&self, key: &QueryKey) -> Option<U256> {
        self.amounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|(at, _)| at.elapsed() < self.stale_after)
            .map(|(_, value)| *value)
    }

    /// Stores a fresh read. Expired entries are dropped on the way.
    pub fn put(&self, key: QueryKey, value: U256) {
        let mut amounts = self.amounts.write().unwrap_or_else(PoisonError::into_inner);
        amounts.retain(|_, (at, _)| at.elapsed() < self.stale_after);
        amounts.insert(key, (Instant::now(), value));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.amounts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn decimals(&self, token: Address) -> Option<u8> {
        self.decimals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&token)
            .copied()
    }

    pub fn put_decimals(&self, token: Address, decimals: u8) {
        self.decimals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, decimals);
    }

    /// Drops every cached read the invalidation covers and notifies
    /// subscribers. Returns how many entries were dropped.
    pub fn invalidate(&self, invalidation: Invalidation) -> usize {
        let removed = {
            let mut amounts = self.amounts.write().unwrap_or_else(PoisonError::into_inner);
            let before = amounts.len();
            amounts.retain(|key, _| !invalidation.matches(key));
            before - amounts.len()
        };

        debug!("Invalidated {:?}, dropped {} cached reads", invalidation, removed);
        // No subscribers is fine.
        let _ = self.events.send(invalidation);
        removed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn allowance_invalidation_is_scoped() {
        let store = QueryStore::new();
        let a = QueryKey::Allowance { token: addr(1), owner: addr(9), spender: addr(5) };
        let b = QueryKey::Allowance { token: addr(2), owner: addr(9), spender: addr(5) };
        let bal = QueryKey::Balance { token: addr(1), owner: addr(9) };
        store.put(a.clone(), U256::from(1u8));
        store.put(b.clone(), U256::from(2u8));
        store.put(bal.clone(), U256::from(3u8));

        assert_eq!(store.invalidate(Invalidation::Allowance { token: addr(1), owner: addr(9) }), 1);
        assert_eq!(store.get(&a), None);
        assert_eq!(store.get(&b), Some(U256::from(2u8)));
        assert_eq!(store.get(&bal), Some(U256::from(3u8)));
    }

    #[test]
    fn balances_invalidation_keeps_decimals() {
        let store = QueryStore::new();
        store.put(QueryKey::Balance { token: addr(1), owner: addr(9) }, U256::one());
        store.put_decimals(addr(1), 6);
        store.invalidate(Invalidation::Balances { owner: addr(9) });
        assert_eq!(store.get(&QueryKey::Balance { token: addr(1), owner: addr(9) }), None);
        assert_eq!(store.decimals(addr(1)), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn reads_expire_and_are_pruned() {
        let store = QueryStore::with_stale_after(Duration::from_secs(5));
        let first = QueryKey::Balance { token: addr(1), owner: addr(9) };
        store.put(first.clone(), U256::one());
        assert_eq!(store.get(&first), Some(U256::one()));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get(&first), None);

        store.put(QueryKey::Balance { token: addr(2), owner: addr(9) }, U256::one());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn subscribers_see_invalidations() {
        let store = QueryStore::new();
        let mut rx = store.subscribe();
        store.invalidate(Invalidation::Pools);
        let received = tokio_test::block_on(rx.recv());
        assert_eq!(received.unwrap(), Invalidation::Pools);
    }
}
