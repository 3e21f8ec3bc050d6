/*
 * Debounced quote engine over the router's getAmountsOut
 */

use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use crate::dex::DexLedger;
use crate::metrics::Metrics;
use crate::tokens::Token;
use crate::utils::{format_units, parse_units};

/// The exact input a quote was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    pub amount_in: String,
    pub token_in: Address,
    pub token_out: Address,
}

impl QuoteKey {
    #[must_use]
    pub fn new(amount_in: &str, token_in: Address, token_out: Address) -> Self {
        Self {
            amount_in: amount_in.trim().to_string(),
            token_in,
            token_out,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteOutcome {
    pub key: QuoteKey,
    /// Output in human units; `None` when no quote could be produced.
    pub amount_out: Option<String>,
    pub raw_amount_out: Option<U256>,
}

impl QuoteOutcome {
    fn empty(key: QuoteKey) -> Self {
        Self { key, amount_out: None, raw_amount_out: None }
    }
}

pub struct QuoteEngine {
    ledger: Arc<dyn DexLedger>,
    metrics: Arc<Metrics>,
    debounce: Duration,
    stale_after: Duration,
    generation: AtomicU64,
    cache: Mutex<HashMap<QuoteKey, (Instant, QuoteOutcome)>>,
}

impl QuoteEngine {
    pub fn new(ledger: Arc<dyn DexLedger>, metrics: Arc<Metrics>, debounce: Duration, stale_after: Duration) -> Self {
        Self {
            ledger,
            metrics,
            debounce,
            stale_after,
            generation: AtomicU64::new(0),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Debounced quote for interactive edits. Each call supersedes the calls
    /// before it; only a call still current after the quiet period reaches the
    /// router. Superseded calls return `None`.
    pub async fn quote(&self, amount_in: &str, token_in: &Token, token_out: &Token) -> Option<QuoteOutcome> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.debounce).await;

        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!("Quote for {} superseded", amount_in);
            return None;
        }
        Some(self.quote_now(amount_in, token_in, token_out).await)
    }

    /// Quote without debouncing. Never fails: anything that prevents a quote
    /// yields an empty outcome.
    pub async fn quote_now(&self, amount_in: &str, token_in: &Token, token_out: &Token) -> QuoteOutcome {
        self.fetch(amount_in, token_in, token_out, true).await
    }

    /// Always reads the router, for quotes a transaction minimum is derived
    /// from. The result still refreshes the cache.
    pub async fn quote_fresh(&self, amount_in: &str, token_in: &Token, token_out: &Token) -> QuoteOutcome {
        self.fetch(amount_in, token_in, token_out, false).await
    }

    async fn fetch(&self, amount_in: &str, token_in: &Token, token_out: &Token, use_cache: bool) -> QuoteOutcome {
        let key = QuoteKey::new(amount_in, token_in.address, token_out.address);

        if token_in == token_out {
            return QuoteOutcome::empty(key);
        }
        let raw_in = match parse_units(&key.amount_in, token_in.decimals) {
            Ok(v) if !v.is_zero() => v,
            _ => return QuoteOutcome::empty(key),
        };

        if let Some(hit) = self.cached(&key).filter(|_| use_cache) {
            self.metrics.record_quote("cached");
            return hit;
        }

        let path = [token_in.address, token_out.address];
        let outcome = match self.ledger.get_amounts_out(raw_in, &path).await {
            Ok(amounts) => match amounts.get(1) {
                Some(raw_out) => QuoteOutcome {
                    amount_out: Some(format_units(*raw_out, token_out.decimals)),
                    raw_amount_out: Some(*raw_out),
                    key: key.clone(),
                },
                None => QuoteOutcome::empty(key.clone()),
            },
            Err(e) => {
                warn!("No quote for {} {} -> {}: {}", key.amount_in, token_in.symbol, token_out.symbol, e);
                self.metrics.record_quote("failed");
                return QuoteOutcome::empty(key);
            }
        };

        self.metrics.record_quote("fetched");
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.retain(|_, (at, _)| at.elapsed() < self.stale_after);
        cache.insert(key, (Instant::now(), outcome.clone()));
        outcome
    }

    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn cached(&self, key: &QuoteKey) -> Option<QuoteOutcome> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(key)
            .filter(|(at, _)| at.elapsed() < self.stale_after)
            .map(|(_, outcome)| outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLedger;
    use crate::tokens::{USDC, WSTT};

    fn engine(ledger: Arc<MockLedger>) -> QuoteEngine {
        QuoteEngine::new(ledger, Arc::new(Metrics::new().unwrap()), Duration::from_millis(300), Duration::from_secs(10))
    }

    fn priced_ledger() -> Arc<MockLedger> {
        let ledger = Arc::new(MockLedger::new());
        // 1 WSTT (18 decimals) -> 2 USDC (6 decimals)
        ledger.set_rate(WSTT.address(), USDC.address(), U256::from(2_000_000u64), U256::exp10(18));
        ledger
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_issue_one_request_for_the_last_value() {
        let ledger = priced_ledger();
        let engine = Arc::new(engine(ledger.clone()));
        let (wstt, usdc) = (WSTT.to_token(), USDC.to_token());

        let mut handles = Vec::new();
        for amount in ["1", "12", "123"] {
            let engine = engine.clone();
            let (a, b) = (wstt.clone(), usdc.clone());
            handles.push(tokio::spawn(async move { engine.quote(amount, &a, &b).await }));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert!(results[0].is_none());
        assert!(results[1].is_none());
        let last = results[2].clone().unwrap();
        assert_eq!(last.key.amount_in, "123");
        assert_eq!(last.amount_out.as_deref(), Some("246"));

        let requests = ledger.quote_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, U256::from(123u64) * U256::exp10(18));
    }

    #[tokio::test(start_paused = true)]
    async fn identical_keys_hit_the_cache_until_stale() {
        let ledger = priced_ledger();
        let engine = engine(ledger.clone());
        let (wstt, usdc) = (WSTT.to_token(), USDC.to_token());

        engine.quote_now("1", &wstt, &usdc).await;
        engine.quote_now("1", &wstt, &usdc).await;
        assert_eq!(ledger.quote_requests().len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        engine.quote_now("1", &wstt, &usdc).await;
        assert_eq!(ledger.quote_requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_quotes_are_pruned_on_insert() {
        let ledger = priced_ledger();
        let engine = engine(ledger.clone());
        let (wstt, usdc) = (WSTT.to_token(), USDC.to_token());

        for n in 1..=50 {
            engine.quote_now(&n.to_string(), &wstt, &usdc).await;
        }
        assert_eq!(engine.cached_len(), 50);

        tokio::time::advance(Duration::from_secs(3600)).await;
        engine.quote_now("51", &wstt, &usdc).await;
        assert_eq!(engine.cached_len(), 1);
    }

    #[tokio::test]
    async fn fresh_quotes_skip_the_cache() {
        let ledger = priced_ledger();
        let engine = engine(ledger.clone());
        let (wstt, usdc) = (WSTT.to_token(), USDC.to_token());

        engine.quote_now("1", &wstt, &usdc).await;
        ledger.set_rate(WSTT.address(), USDC.address(), U256::from(1_000_000u64), U256::exp10(18));
        assert_eq!(engine.quote_now("1", &wstt, &usdc).await.amount_out.as_deref(), Some("2"));
        assert_eq!(engine.quote_fresh("1", &wstt, &usdc).await.amount_out.as_deref(), Some("1"));
        assert_eq!(ledger.quote_requests().len(), 2);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_router() {
        let ledger = priced_ledger();
        let engine = engine(ledger.clone());
        let (wstt, usdc) = (WSTT.to_token(), USDC.to_token());

        for amount in ["", "0", "abc", "-1"] {
            let outcome = engine.quote_now(amount, &wstt, &usdc).await;
            assert_eq!(outcome.amount_out, None);
        }
        assert_eq!(engine.quote_now("1", &wstt, &wstt).await.amount_out, None);
        assert!(ledger.quote_requests().is_empty());
    }

    #[tokio::test]
    async fn missing_path_yields_empty_output() {
        let ledger = Arc::new(MockLedger::new());
        let engine = engine(ledger.clone());
        let outcome = engine.quote_now("1", &WSTT.to_token(), &USDC.to_token()).await;
        assert_eq!(outcome.amount_out, None);
        assert_eq!(ledger.quote_requests().len(), 1);
    }
}
