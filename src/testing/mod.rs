/*
 * In-memory ledger for tests: scripted balances, allowances, router rates,
 * pools and transaction outcomes
 */

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use crate::dex::{classify_write_error, DexLedger, PairDetails, ReceiptStatus};
use crate::models::{AqyntError, Result};
use crate::orchestrator::TransactionIntent;
use crate::tokens::{TokenMetadata, DEFAULT_TOKENS};

#[derive(Debug, Clone)]
enum ScriptedSubmit {
    Reject,
    Fail(String),
}

#[derive(Default)]
struct State {
    balances: HashMap<(Address, Address), U256>,
    decimals: HashMap<Address, u8>,
    allowances: HashMap<(Address, Address, Address), U256>,
    metadata: HashMap<Address, TokenMetadata>,
    rates: HashMap<(Address, Address), (U256, U256)>,
    pairs: Vec<PairDetails>,
    lp_balances: HashMap<(Address, Address), U256>,
    failing_pairs: HashSet<Address>,
    failing_indices: HashSet<u64>,
    account: Option<Address>,
    next_submit: Option<ScriptedSubmit>,
    revert_next: bool,
    submit_delay: Option<Duration>,
    confirm_delay: Option<Duration>,
    metadata_delay: Option<Duration>,
    submitted: Vec<TransactionIntent>,
    quote_requests: Vec<(U256, Vec<Address>)>,
    pending: HashMap<H256, (TransactionIntent, ReceiptStatus)>,
    nonce: u64,
}

/// `DexLedger` backed by plain maps. Confirmed approvals set the allowance and
/// confirmed swaps or liquidity moves adjust balances, so follow-up reads see
/// the effect the chain would have produced.
pub struct MockLedger {
    state: Mutex<State>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// Empty ledger that knows the decimals of the default tokens.
    #[must_use]
    pub fn new() -> Self {
        let mut state = State::default();
        for spec in DEFAULT_TOKENS {
            state.decimals.insert(spec.address(), spec.decimals);
        }
        Self { state: Mutex::new(state) }
    }

    #[must_use]
    pub fn with_account(self, account: Address) -> Self {
        self.lock().account = Some(account);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_balance(&self, token: Address, owner: Address, amount: U256) {
        self.lock().balances.insert((token, owner), amount);
    }

    pub fn set_decimals(&self, token: Address, decimals: u8) {
        self.lock().decimals.insert(token, decimals);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.lock().allowances.insert((token, owner, spender), amount);
    }

    pub fn set_metadata(&self, token: Address, name: &str, symbol: &str, decimals: u8) {
        let mut state = self.lock();
        state.decimals.insert(token, decimals);
        state.metadata.insert(
            token,
            TokenMetadata {
                name: name.to_string(),
                symbol: symbol.to_string(),
                decimals,
            },
        );
    }

    /// Router quotes `amount_in * numerator / denominator` for `token_in -> token_out`.
    pub fn set_rate(&self, token_in: Address, token_out: Address, numerator: U256, denominator: U256) {
        self.lock().rates.insert((token_in, token_out), (numerator, denominator));
    }

    /// Registers a pool and returns its pair address.
    pub fn add_pair(&self, token0: Address, token1: Address, reserve0: U256, reserve1: U256, total_supply: U256) -> Address {
        let mut state = self.lock();
        let pair = Address::from_low_u64_be(0xa000 + state.pairs.len() as u64);
        state.pairs.push(PairDetails {
            pair,
            token0,
            token1,
            reserve0,
            reserve1,
            total_supply,
            lp_balance: None,
        });
        state.decimals.insert(pair, 18);
        pair
    }

    pub fn set_lp_balance(&self, pair: Address, owner: Address, amount: U256) {
        self.lock().lp_balances.insert((pair, owner), amount);
    }

    /// Detail reads for `pair` report failure.
    pub fn fail_pair(&self, pair: Address) {
        self.lock().failing_pairs.insert(pair);
    }

    /// The `allPairs(index)` read reports failure.
    pub fn fail_pair_index(&self, index: u64) {
        self.lock().failing_indices.insert(index);
    }

    pub fn reject_next_submit(&self) {
        self.lock().next_submit = Some(ScriptedSubmit::Reject);
    }

    pub fn fail_next_submit(&self, message: &str) {
        self.lock().next_submit = Some(ScriptedSubmit::Fail(message.to_string()));
    }

    /// The next submission hangs for `delay` before reaching the node.
    pub fn stall_next_submit(&self, delay: Duration) {
        self.lock().submit_delay = Some(delay);
    }

    /// The next receipt takes `delay` to arrive.
    pub fn stall_next_confirmation(&self, delay: Duration) {
        self.lock().confirm_delay = Some(delay);
    }

    /// The next token metadata read takes `delay` to answer.
    pub fn stall_next_metadata(&self, delay: Duration) {
        self.lock().metadata_delay = Some(delay);
    }

    /// The next submitted transaction is mined but reverts.
    pub fn revert_next(&self) {
        self.lock().revert_next = true;
    }

    #[must_use]
    pub fn submitted(&self) -> Vec<TransactionIntent> {
        self.lock().submitted.clone()
    }

    #[must_use]
    pub fn quote_requests(&self) -> Vec<(U256, Vec<Address>)> {
        self.lock().quote_requests.clone()
    }
}

fn debit(balances: &mut HashMap<(Address, Address), U256>, token: Address, owner: Address, amount: U256) {
    let entry = balances.entry((token, owner)).or_default();
    *entry = entry.saturating_sub(amount);
}

fn credit(balances: &mut HashMap<(Address, Address), U256>, token: Address, owner: Address, amount: U256) {
    let entry = balances.entry((token, owner)).or_default();
    *entry = entry.saturating_add(amount);
}

impl State {
    fn apply(&mut self, intent: &TransactionIntent) {
        let Some(account) = self.account else {
            return;
        };
        match intent {
            TransactionIntent::Approve { token, spender, amount } => {
                self.allowances.insert((*token, account, *spender), *amount);
            }
            TransactionIntent::Swap { path, amount_in, min_amount_out, to, .. } => {
                if let (Some(first), Some(last)) = (path.first(), path.last()) {
                    debit(&mut self.balances, *first, account, *amount_in);
                    credit(&mut self.balances, *last, *to, *min_amount_out);
                }
            }
            TransactionIntent::AddLiquidity { token_a, token_b, amount_a, amount_b, .. } => {
                debit(&mut self.balances, *token_a, account, *amount_a);
                debit(&mut self.balances, *token_b, account, *amount_b);
            }
            TransactionIntent::RemoveLiquidity { pair, liquidity, .. } => {
                let entry = self.lp_balances.entry((*pair, account)).or_default();
                *entry = entry.saturating_sub(*liquidity);
            }
        }
    }
}

#[async_trait]
impl DexLedger for MockLedger {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let state = self.lock();
        if let Some(lp) = state.lp_balances.get(&(token, owner)) {
            return Ok(*lp);
        }
        Ok(state.balances.get(&(token, owner)).copied().unwrap_or_default())
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        self.lock()
            .decimals
            .get(&token)
            .copied()
            .ok_or_else(|| AqyntError::ContractError(format!("decimals() reverted for {token:?}")))
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        Ok(self
            .lock()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        let delay = self.lock().metadata_delay.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.lock()
            .metadata
            .get(&token)
            .cloned()
            .ok_or_else(|| AqyntError::ContractError(format!("{token:?} did not answer name, symbol and decimals")))
    }

    async fn get_amounts_out(&self, amount_in: U256, path: &[Address]) -> Result<Vec<U256>> {
        let mut state = self.lock();
        state.quote_requests.push((amount_in, path.to_vec()));

        let (Some(first), Some(last)) = (path.first(), path.last()) else {
            return Err(AqyntError::ContractError("UniswapV2Library: INVALID_PATH".to_string()));
        };
        match state.rates.get(&(*first, *last)) {
            Some((numerator, denominator)) if !denominator.is_zero() => {
                Ok(vec![amount_in, amount_in * *numerator / *denominator])
            }
            _ => Err(AqyntError::ContractError(
                "execution reverted: UniswapV2Library: INSUFFICIENT_LIQUIDITY".to_string(),
            )),
        }
    }

    async fn all_pairs_length(&self) -> Result<U256> {
        Ok(U256::from(self.lock().pairs.len()))
    }

    async fn all_pairs(&self, count: u64) -> Result<Vec<Option<Address>>> {
        let state = self.lock();
        Ok((0..count)
            .map(|i| {
                if state.failing_indices.contains(&i) {
                    None
                } else {
                    state.pairs.get(i as usize).map(|p| p.pair)
                }
            })
            .collect())
    }

    async fn pair_details(&self, pairs: &[Address], owner: Option<Address>) -> Result<Vec<Option<PairDetails>>> {
        let state = self.lock();
        Ok(pairs
            .iter()
            .map(|address| {
                if state.failing_pairs.contains(address) {
                    return None;
                }
                let mut details = state.pairs.iter().find(|p| p.pair == *address)?.clone();
                details.lp_balance =
                    owner.map(|o| state.lp_balances.get(&(*address, o)).copied().unwrap_or_default());
                Some(details)
            })
            .collect())
    }

    fn account(&self) -> Option<Address> {
        self.lock().account
    }

    async fn submit(&self, intent: &TransactionIntent) -> Result<H256> {
        let delay = self.lock().submit_delay.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.account.is_none() {
            return Err(AqyntError::ConfigError("No wallet configured".to_string()));
        }
        state.submitted.push(intent.clone());

        match state.next_submit.take() {
            Some(ScriptedSubmit::Reject) => {
                return Err(classify_write_error(
                    "(code: 4001, message: User rejected the request., data: None)",
                ))
            }
            Some(ScriptedSubmit::Fail(message)) => return Err(classify_write_error(message)),
            None => {}
        }

        state.nonce += 1;
        let hash = H256::from_low_u64_be(state.nonce);
        let status = if std::mem::take(&mut state.revert_next) {
            ReceiptStatus::Reverted
        } else {
            ReceiptStatus::Success
        };
        state.pending.insert(hash, (intent.clone(), status));
        Ok(hash)
    }

    async fn wait_for_confirmation(&self, hash: H256) -> Result<ReceiptStatus> {
        let delay = self.lock().confirm_delay.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let (intent, status) = state
            .pending
            .remove(&hash)
            .ok_or_else(|| AqyntError::RpcError(format!("Unknown transaction {hash:?}")))?;
        if status == ReceiptStatus::Success {
            state.apply(&intent);
        }
        Ok(status)
    }
}
