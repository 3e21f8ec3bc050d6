/*
 * ethers-backed ledger: contract reads, Multicall3 batches and transaction
 * submission
 */

use async_trait::async_trait;
use ethers::{
    abi::Token as AbiToken,
    contract::Multicall,
    middleware::SignerMiddleware,
    providers::{Http, Middleware, PendingTransaction, Provider},
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, H256, U256, U64},
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::config::{ChainConfig, WalletConfig};
use crate::dex::contracts::{IUniswapV2Factory, IUniswapV2Pair, IUniswapV2Router02, IERC20};
use crate::dex::{classify_write_error, DexLedger, PairDetails, ReceiptStatus};
use crate::models::{AqyntError, Result};
use crate::orchestrator::TransactionIntent;
use crate::rpc::RpcClient;
use crate::tokens::TokenMetadata;

/// Calls per Multicall3 round trip.
const MAX_BATCH_CALLS: usize = 200;

type Signed = SignerMiddleware<Provider<Http>, LocalWallet>;
type RawResults = Vec<std::result::Result<AbiToken, Bytes>>;

pub struct EthersLedger {
    rpc: Arc<RpcClient>,
    router: Address,
    factory: Address,
    multicall: Address,
    signer: Option<Arc<Signed>>,
    account: Option<Address>,
}

impl EthersLedger {
    pub fn new(rpc: Arc<RpcClient>, chain: &ChainConfig, wallet: &WalletConfig) -> Result<Self> {
        let (signer, account) = match &wallet.private_key {
            Some(key) => {
                let wallet = LocalWallet::from_str(key.trim())
                    .map_err(|e| AqyntError::ConfigError(format!("Invalid wallet key: {e}")))?
                    .with_chain_id(rpc.chain_id());
                let address = wallet.address();
                let provider = (*rpc.provider()).clone();
                info!("Signing locally as {:?}", address);
                (Some(Arc::new(SignerMiddleware::new(provider, wallet))), Some(address))
            }
            None => {
                if let Some(account) = wallet.account {
                    info!("Sending through node-managed account {:?}", account);
                }
                (None, wallet.account)
            }
        };

        Ok(Self {
            rpc,
            router: chain.router,
            factory: chain.factory,
            multicall: chain.multicall,
            signer,
            account,
        })
    }

    fn erc20(&self, token: Address) -> IERC20<Provider<Http>> {
        IERC20::new(token, self.rpc.provider())
    }

    fn pair(&self, pair: Address) -> IUniswapV2Pair<Provider<Http>> {
        IUniswapV2Pair::new(pair, self.rpc.provider())
    }

    fn router(&self) -> IUniswapV2Router02<Provider<Http>> {
        IUniswapV2Router02::new(self.router, self.rpc.provider())
    }

    fn factory(&self) -> IUniswapV2Factory<Provider<Http>> {
        IUniswapV2Factory::new(self.factory, self.rpc.provider())
    }

    async fn new_multicall(&self) -> Result<Multicall<Provider<Http>>> {
        Multicall::new(self.rpc.provider(), Some(self.multicall))
            .await
            .map_err(|e| AqyntError::RpcError(format!("Failed to create multicall: {e}")))
    }

    async fn run_batch(multicall: &Multicall<Provider<Http>>) -> Result<RawResults> {
        multicall
            .call_raw()
            .await
            .map_err(|e| AqyntError::RpcError(format!("Multicall batch failed: {e}")))
    }

    fn build_transaction(&self, intent: &TransactionIntent) -> TypedTransaction {
        match intent {
            TransactionIntent::Approve { token, spender, amount } => {
                self.erc20(*token).approve(*spender, *amount).tx
            }
            TransactionIntent::Swap { path, amount_in, min_amount_out, to, deadline } => self
                .router()
                .swap_exact_tokens_for_tokens(*amount_in, *min_amount_out, path.clone(), *to, *deadline)
                .tx,
            TransactionIntent::AddLiquidity {
                token_a,
                token_b,
                amount_a,
                amount_b,
                amount_a_min,
                amount_b_min,
                to,
                deadline,
            } => self
                .router()
                .add_liquidity(*token_a, *token_b, *amount_a, *amount_b, *amount_a_min, *amount_b_min, *to, *deadline)
                .tx,
            TransactionIntent::RemoveLiquidity {
                token_a,
                token_b,
                liquidity,
                amount_a_min,
                amount_b_min,
                to,
                deadline,
                ..
            } => self
                .router()
                .remove_liquidity(*token_a, *token_b, *liquidity, *amount_a_min, *amount_b_min, *to, *deadline)
                .tx,
        }
    }
}

fn as_uint(token: &AbiToken) -> Option<U256> {
    match token {
        AbiToken::Uint(v) => Some(*v),
        _ => None,
    }
}

fn as_address(token: &AbiToken) -> Option<Address> {
    match token {
        AbiToken::Address(a) => Some(*a),
        _ => None,
    }
}

fn as_string(token: &AbiToken) -> Option<String> {
    match token {
        AbiToken::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn as_reserves(token: &AbiToken) -> Option<(U256, U256)> {
    match token {
        AbiToken::Tuple(values) if values.len() >= 2 => Some((as_uint(&values[0])?, as_uint(&values[1])?)),
        _ => None,
    }
}

fn decode_pair(pair: Address, entries: &[std::result::Result<AbiToken, Bytes>], with_owner: bool) -> Option<PairDetails> {
    let ok = |i: usize| entries.get(i).and_then(|r| r.as_ref().ok());

    let token0 = as_address(ok(0)?)?;
    let token1 = as_address(ok(1)?)?;
    let (reserve0, reserve1) = as_reserves(ok(2)?)?;
    let total_supply = as_uint(ok(3)?)?;
    let lp_balance = if with_owner { Some(as_uint(ok(4)?)?) } else { None };

    Some(PairDetails {
        pair,
        token0,
        token1,
        reserve0,
        reserve1,
        total_supply,
        lp_balance,
    })
}

#[async_trait]
impl DexLedger for EthersLedger {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        self.erc20(token)
            .balance_of(owner)
            .call()
            .await
            .map_err(|e| AqyntError::ContractError(format!("Failed to call balanceOf: {e}")))
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        self.erc20(token)
            .decimals()
            .call()
            .await
            .map_err(|e| AqyntError::ContractError(format!("Failed to call decimals: {e}")))
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        self.erc20(token)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| AqyntError::ContractError(format!("Failed to call allowance: {e}")))
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        let erc20 = self.erc20(token);
        let mut multicall = self.new_multicall().await?;
        multicall
            .add_call(erc20.name(), true)
            .add_call(erc20.symbol(), true)
            .add_call(erc20.decimals(), true);

        let results = Self::run_batch(&multicall).await?;
        let field = |i: usize| results.get(i).and_then(|r| r.as_ref().ok());

        let name = field(0).and_then(as_string);
        let symbol = field(1).and_then(as_string);
        let decimals = field(2)
            .and_then(as_uint)
            .filter(|d| *d <= U256::from(u8::MAX))
            .map(|d| d.low_u32() as u8);

        match (name, symbol, decimals) {
            (Some(name), Some(symbol), Some(decimals)) => Ok(TokenMetadata { name, symbol, decimals }),
            _ => Err(AqyntError::ContractError(format!(
                "{token:?} did not answer name, symbol and decimals"
            ))),
        }
    }

    async fn get_amounts_out(&self, amount_in: U256, path: &[Address]) -> Result<Vec<U256>> {
        self.router()
            .get_amounts_out(amount_in, path.to_vec())
            .call()
            .await
            .map_err(|e| AqyntError::ContractError(format!("Failed to call getAmountsOut: {e}")))
    }

    async fn all_pairs_length(&self) -> Result<U256> {
        self.factory()
            .all_pairs_length()
            .call()
            .await
            .map_err(|e| AqyntError::ContractError(format!("Failed to call allPairsLength: {e}")))
    }

    async fn all_pairs(&self, count: u64) -> Result<Vec<Option<Address>>> {
        let factory = self.factory();
        let indices: Vec<u64> = (0..count).collect();
        let mut pairs = Vec::with_capacity(indices.len());

        for chunk in indices.chunks(MAX_BATCH_CALLS) {
            let mut multicall = self.new_multicall().await?;
            for index in chunk {
                multicall.add_call(factory.all_pairs(U256::from(*index)), true);
            }
            let results = Self::run_batch(&multicall).await?;
            pairs.extend(results.iter().map(|r| r.as_ref().ok().and_then(as_address)));
        }

        debug!("Read {} pair addresses", pairs.len());
        Ok(pairs)
    }

    async fn pair_details(&self, pairs: &[Address], owner: Option<Address>) -> Result<Vec<Option<PairDetails>>> {
        let calls_per_pair = if owner.is_some() { 5 } else { 4 };
        let mut details = Vec::with_capacity(pairs.len());

        for chunk in pairs.chunks(MAX_BATCH_CALLS / calls_per_pair) {
            let mut multicall = self.new_multicall().await?;
            for address in chunk {
                let pair = self.pair(*address);
                multicall
                    .add_call(pair.token_0(), true)
                    .add_call(pair.token_1(), true)
                    .add_call(pair.get_reserves(), true)
                    .add_call(pair.total_supply(), true);
                if let Some(owner) = owner {
                    multicall.add_call(pair.balance_of(owner), true);
                }
            }

            let results = Self::run_batch(&multicall).await?;
            for (address, entries) in chunk.iter().zip(results.chunks(calls_per_pair)) {
                let decoded = decode_pair(*address, entries, owner.is_some());
                if decoded.is_none() {
                    debug!("Pool {:?} detail read failed, dropping", address);
                }
                details.push(decoded);
            }
        }

        Ok(details)
    }

    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn submit(&self, intent: &TransactionIntent) -> Result<H256> {
        let mut tx = self.build_transaction(intent);

        let hash = if let Some(signer) = &self.signer {
            let pending = signer
                .send_transaction(tx, None)
                .await
                .map_err(|e| classify_write_error(e.to_string()))?;
            *pending
        } else if let Some(account) = self.account {
            tx.set_from(account);
            let provider = self.rpc.provider();
            let pending = provider
                .send_transaction(tx, None)
                .await
                .map_err(|e| classify_write_error(e.to_string()))?;
            *pending
        } else {
            return Err(AqyntError::ConfigError(
                "No wallet configured: set WALLET_PRIVATE_KEY or WALLET_ADDRESS".to_string(),
            ));
        };

        info!("Submitted {} transaction {:?}", intent.kind(), hash);
        Ok(hash)
    }

    async fn wait_for_confirmation(&self, hash: H256) -> Result<ReceiptStatus> {
        let provider = self.rpc.provider();
        let receipt = PendingTransaction::new(hash, provider.as_ref())
            .confirmations(1)
            .await
            .map_err(|e| AqyntError::RpcError(format!("Failed waiting for {hash:?}: {e}")))?
            .ok_or_else(|| AqyntError::TransactionFailed(format!("{hash:?} was dropped before inclusion")))?;

        if receipt.status == Some(U64::from(1)) {
            Ok(ReceiptStatus::Success)
        } else {
            warn!("Transaction {:?} reverted", hash);
            Ok(ReceiptStatus::Reverted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(token: AbiToken) -> std::result::Result<AbiToken, Bytes> {
        Ok(token)
    }

    fn sample_entries() -> Vec<std::result::Result<AbiToken, Bytes>> {
        vec![
            ok(AbiToken::Address(Address::from_low_u64_be(1))),
            ok(AbiToken::Address(Address::from_low_u64_be(2))),
            ok(AbiToken::Tuple(vec![
                AbiToken::Uint(U256::from(10u64)),
                AbiToken::Uint(U256::from(20u64)),
                AbiToken::Uint(U256::from(1_700_000_000u64)),
            ])),
            ok(AbiToken::Uint(U256::from(14u64))),
            ok(AbiToken::Uint(U256::from(7u64))),
        ]
    }

    #[test]
    fn decodes_complete_pair_batch() {
        let details = decode_pair(Address::from_low_u64_be(9), &sample_entries(), true).unwrap();
        assert_eq!(details.reserve0, U256::from(10u64));
        assert_eq!(details.reserve1, U256::from(20u64));
        assert_eq!(details.total_supply, U256::from(14u64));
        assert_eq!(details.lp_balance, Some(U256::from(7u64)));
    }

    #[test]
    fn any_failed_entry_drops_the_pair() {
        let mut entries = sample_entries();
        entries[2] = Err(Bytes::default());
        assert!(decode_pair(Address::from_low_u64_be(9), &entries, true).is_none());
    }

    #[test]
    fn owner_balance_is_optional() {
        let entries = &sample_entries()[..4];
        let details = decode_pair(Address::from_low_u64_be(9), entries, false).unwrap();
        assert_eq!(details.lp_balance, None);
    }
}
