/*
 * DEX service that wires the registry, readers, quote engine, orchestrator
 * and pool discovery behind one set of operations
 */

use chrono::Utc;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use crate::{
    balances::{BalanceReader, BalanceView},
    config::Config,
    dex::{DexLedger, EthersLedger},
    form::{validate_deadline, FormState, DEFAULT_DEADLINE_MINUTES},
    metrics::Metrics,
    models::{
        AddLiquidityRequest, AddLiquidityView, AqyntError, ApproveRequest, BalanceResponse, GateReport,
        PoolSummary, PoolTab, PoolsResponse, PositionSummary, QuoteResponse, RemoveLiquidityRequest,
        RemoveLiquidityView, Result, SwapRequest, TxReport, ValidationError,
    },
    orchestrator::{
        add_liquidity_gate, add_liquidity_intent, approve_intent, remove_gate, remove_liquidity_intent, swap_gate,
        swap_intent, ActionGate, Orchestrator, TransactionIntent, TxPhase,
    },
    pools::{
        pool_share_percent, position_usd_value, remove_preview, PoolDiscovery, PoolSnapshot, Pricing, RemovePreview,
    },
    queries::{Invalidation, QueryStore},
    quote::QuoteEngine,
    rpc::RpcClient,
    tokens::{CustomTokenStore, Token, TokenRegistry},
    utils::{format_fixed, format_units, parse_address, unix_now},
};

const LP_DECIMALS: u8 = 18;
const PREVIEW_PLACES: u8 = 6;

pub struct DexService {
    config: Config,
    ledger: Arc<dyn DexLedger>,
    registry: RwLock<TokenRegistry>,
    queries: Arc<QueryStore>,
    balances: BalanceReader,
    quotes: QuoteEngine,
    orchestrator: Orchestrator,
    pools: PoolDiscovery,
    pricing: Pricing,
    metrics: Arc<Metrics>,
}

impl DexService {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing AqyntSwap service");

        let rpc = Arc::new(RpcClient::new(&config.chain.rpc_url, config.chain.chain_id).await?);
        info!("Connected to chain {}", rpc.chain_id());

        let ledger = Arc::new(EthersLedger::new(rpc, &config.chain, &config.wallet)?);
        let registry = TokenRegistry::open(CustomTokenStore::new(&config.storage.custom_tokens_path))?;
        info!("Token registry loaded with {} custom tokens", registry.custom().len());

        Self::with_ledger(config, ledger, registry)
    }

    /// Builds the service over any ledger implementation.
    pub fn with_ledger(config: Config, ledger: Arc<dyn DexLedger>, registry: TokenRegistry) -> Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let queries = Arc::new(QueryStore::with_stale_after(Duration::from_secs(config.reads.stale_secs)));

        Ok(Self {
            balances: BalanceReader::new(ledger.clone(), queries.clone()),
            quotes: QuoteEngine::new(
                ledger.clone(),
                metrics.clone(),
                Duration::from_millis(config.quote.debounce_ms),
                Duration::from_secs(config.quote.stale_secs),
            ),
            orchestrator: Orchestrator::new(ledger.clone(), queries.clone(), metrics.clone()),
            pools: PoolDiscovery::new(ledger.clone(), metrics.clone()),
            pricing: Pricing::new(config.pricing.native_usd_price),
            registry: RwLock::new(registry),
            ledger,
            queries,
            metrics,
            config,
        })
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[must_use]
    pub fn account(&self) -> Option<Address> {
        self.ledger.account()
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn router(&self) -> Address {
        self.config.chain.router
    }

    /// Known tokens first, then an on-chain metadata read.
    async fn resolve_token(&self, raw: &str) -> Result<Token> {
        let address =
            parse_address(raw).ok_or_else(|| AqyntError::InvalidToken(format!("{} is not an address", raw.trim())))?;
        let known = self.registry.read().await.find(address);
        match known {
            Some(token) => Ok(token),
            None => TokenRegistry::fetch(self.ledger.as_ref(), address).await,
        }
    }

    pub async fn tokens(&self, query: Option<&str>) -> Vec<Token> {
        self.registry.read().await.search(query.unwrap_or_default())
    }

    /// Looks a token up on chain and keeps it. Returns the token and whether
    /// it was newly added.
    pub async fn add_custom_token(&self, raw: &str) -> Result<(Token, bool)> {
        let token = self.resolve_token(raw).await?;
        let added = self.registry.write().await.add_custom(token.clone())?;
        Ok((token, added))
    }

    pub async fn balance(&self, token: &str, owner: Option<&str>) -> Result<BalanceResponse> {
        let token = self.resolve_token(token).await?;
        let owner = match owner {
            Some(raw) => Some(parse_address(raw).ok_or_else(|| {
                AqyntError::Validation(ValidationError::InvalidSettings(format!("{raw} is not an address")))
            })?),
            None => self.account(),
        };

        let view = self.balances.balance(Some(&token), owner).await?;
        let (raw, decimals) = match view {
            BalanceView::Ready { amount, decimals } => (Some(amount.to_string()), Some(decimals)),
            BalanceView::Loading { amount } => (amount.map(|a| a.to_string()), None),
            BalanceView::Disabled => (None, None),
        };

        Ok(BalanceResponse {
            token: token.address,
            owner,
            raw,
            decimals,
            formatted: view.formatted(),
            loading: view.is_loading(),
        })
    }

    pub async fn quote(&self, amount_in: &str, token_in: &str, token_out: &str) -> Result<QuoteResponse> {
        let token_in = self.resolve_token(token_in).await?;
        let token_out = self.resolve_token(token_out).await?;
        let outcome = self.quotes.quote_now(amount_in, &token_in, &token_out).await;

        let rate = outcome.amount_out.as_deref().and_then(|out| {
            let out = Decimal::from_str(out).ok()?;
            let input = Decimal::from_str(&outcome.key.amount_in).ok()?;
            out.checked_div(input)
        });

        Ok(QuoteResponse {
            amount_in: outcome.key.amount_in,
            token_in: token_in.address,
            token_out: token_out.address,
            amount_out: outcome.amount_out,
            rate,
        })
    }

    async fn pool_tokens(&self, pool: &PoolSnapshot) -> (Token, Token) {
        let registry = self.registry.read().await;
        (
            registry.resolve_or_placeholder(pool.token0, 0),
            registry.resolve_or_placeholder(pool.token1, 1),
        )
    }

    fn pool_value(&self, pool: &PoolSnapshot) -> Decimal {
        self.pricing.pool_usd_value(pool).unwrap_or_else(|e| {
            warn!("Could not value pool {:?}: {}", pool.pair, e);
            Decimal::ZERO
        })
    }

    async fn summarize(&self, pool: &PoolSnapshot) -> PoolSummary {
        let (token0, token1) = self.pool_tokens(pool).await;
        PoolSummary {
            pair_address: pool.pair,
            reserve0: format_units(pool.reserve0, token0.decimals),
            reserve1: format_units(pool.reserve1, token1.decimals),
            total_liquidity_usd: self.pool_value(pool),
            token0,
            token1,
        }
    }

    pub async fn all_pools(&self) -> Result<PoolsResponse> {
        let snapshots = self.pools.all_pools().await?;
        let mut pools = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            pools.push(self.summarize(snapshot).await);
        }

        Ok(PoolsResponse {
            timestamp_utc: Utc::now(),
            tab: PoolTab::AllPools,
            pools,
            positions: Vec::new(),
        })
    }

    pub async fn user_pools(&self, owner: Address) -> Result<PoolsResponse> {
        let snapshots = self.pools.user_pools(owner).await?;
        let mut positions = Vec::with_capacity(snapshots.len());

        for pool in &snapshots {
            let (token0, token1) = self.pool_tokens(pool).await;
            let lp = pool.lp_balance.unwrap_or_default();
            let share = pool_share_percent(lp, pool.total_supply);

            positions.push(PositionSummary {
                pair_address: pool.pair,
                lp_token_balance: format_units(lp, LP_DECIMALS),
                user_pool_share: share,
                user_liquidity_usd: position_usd_value(self.pool_value(pool), share),
                add_link: format!("/add?token0={:?}&token1={:?}", token0.address, token1.address),
                remove_link: format!("/remove?pair={:?}", pool.pair),
                token0,
                token1,
            });
        }

        Ok(PoolsResponse {
            timestamp_utc: Utc::now(),
            tab: PoolTab::YourPools,
            pools: Vec::new(),
            positions,
        })
    }

    /// Coming back to the pool list drops every cached balance and
    /// allowance read. Pool lists themselves are read fresh on each call.
    pub fn refresh_pools(&self) {
        self.queries.invalidate(Invalidation::All);
    }

    pub async fn add_liquidity_view(
        &self,
        token0: Option<&str>,
        token1: Option<&str>,
        owner: Option<Address>,
    ) -> Result<AddLiquidityView> {
        let mut form = FormState::default();
        {
            let registry = self.registry.read().await;
            form.apply_pair_params(token0, token1, &registry);
        }
        let owner = owner.or_else(|| self.account());
        let balance_in = self.balances.balance(Some(form.token_in()), owner).await?;
        let balance_out = self.balances.balance(Some(form.token_out()), owner).await?;

        Ok(AddLiquidityView {
            token_in: form.token_in().clone(),
            token_out: form.token_out().clone(),
            balance_in: balance_in.formatted(),
            balance_out: balance_out.formatted(),
            deadline_minutes: form.deadline_minutes(),
        })
    }

    pub async fn remove_view(&self, pair: &str, owner: Option<Address>, percentage: u32) -> Result<RemoveLiquidityView> {
        let pair = parse_address(pair).ok_or_else(|| AqyntError::InvalidToken(format!("{pair} is not a pool")))?;
        let owner = owner.or_else(|| self.account());
        let pool = self.pools.pool(pair, owner).await?;
        let (token0, token1) = self.pool_tokens(&pool).await;
        let lp = pool.lp_balance.unwrap_or_default();

        let (preview, gate) = match remove_preview(lp, percentage, (pool.reserve0, pool.reserve1), pool.total_supply) {
            Ok(preview) => {
                let allowance = self.balances.allowance(Some(pair), owner, self.router()).await?;
                let lp_token = lp_token(&pool, &token0, &token1);
                let gate = remove_gate(owner, &lp_token, percentage, preview.liquidity, allowance);
                (preview, gate)
            }
            Err(e) => (RemovePreview::default(), ActionGate::Invalid(e)),
        };

        Ok(RemoveLiquidityView {
            pair_address: pair,
            percentage,
            lp_balance: format_units(lp, LP_DECIMALS),
            liquidity_to_remove: format_units(preview.liquidity, LP_DECIMALS),
            amount0: format_fixed(preview.amount0, token0.decimals, PREVIEW_PLACES),
            amount1: format_fixed(preview.amount1, token1.decimals, PREVIEW_PLACES),
            gate: gate.to_report(),
            token0,
            token1,
        })
    }

    pub async fn swap(&self, request: &SwapRequest) -> Result<TxReport> {
        let account = self.account();
        let token_in = self.resolve_token(&request.token_in).await?;
        let token_out = self.resolve_token(&request.token_out).await?;

        let mut form = FormState::new(token_in, token_out);
        form.set_amount_in(request.amount_in.trim());
        if let Some(bps) = request.slippage_bps {
            form.set_slippage_bps(bps)?;
        }
        if let Some(minutes) = request.deadline_minutes {
            form.set_deadline_minutes(minutes)?;
        }

        let quote = self
            .quotes
            .quote_fresh(form.amount_in(), form.token_in(), form.token_out())
            .await;
        form.apply_quote(&quote);

        let balance_in = self.balances.live_balance(Some(form.token_in()), account).await?;
        let allowance_in = self
            .balances
            .live_allowance(Some(form.token_in().address), account, self.router())
            .await?;

        let gate = swap_gate(account, &form, &balance_in, allowance_in);
        let Some(recipient) = account.filter(|_| gate.is_ready()) else {
            return Ok(blocked("swap", &gate));
        };

        let intent = match swap_intent(&form, quote.raw_amount_out, recipient, unix_now()) {
            Ok(intent) => intent,
            Err(e) => return Ok(blocked("swap", &ActionGate::Invalid(e))),
        };
        self.run(&intent, Some(&mut form)).await
    }

    pub async fn add_liquidity(&self, request: &AddLiquidityRequest) -> Result<TxReport> {
        let account = self.account();
        let token_a = self.resolve_token(&request.token_a).await?;
        let token_b = self.resolve_token(&request.token_b).await?;

        let mut form = FormState::new(token_a, token_b);
        form.set_amount_in(request.amount_a.trim());
        form.set_amount_out(request.amount_b.trim());
        if let Some(minutes) = request.deadline_minutes {
            form.set_deadline_minutes(minutes)?;
        }

        let balance_a = self.balances.live_balance(Some(form.token_in()), account).await?;
        let balance_b = self.balances.live_balance(Some(form.token_out()), account).await?;
        let allowance_a = self
            .balances
            .live_allowance(Some(form.token_in().address), account, self.router())
            .await?;
        let allowance_b = self
            .balances
            .live_allowance(Some(form.token_out().address), account, self.router())
            .await?;

        let gate = add_liquidity_gate(account, &form, (&balance_a, &balance_b), (allowance_a, allowance_b));
        let Some(recipient) = account.filter(|_| gate.is_ready()) else {
            return Ok(blocked("add_liquidity", &gate));
        };

        let intent = add_liquidity_intent(&form, recipient, unix_now())?;
        self.run(&intent, Some(&mut form)).await
    }

    pub async fn remove_liquidity(&self, request: &RemoveLiquidityRequest) -> Result<TxReport> {
        let account = self.account();
        let pair = parse_address(&request.pair)
            .ok_or_else(|| AqyntError::InvalidToken(format!("{} is not a pool", request.pair)))?;
        let deadline_minutes = match request.deadline_minutes {
            Some(minutes) => {
                validate_deadline(minutes)?;
                minutes
            }
            None => DEFAULT_DEADLINE_MINUTES,
        };

        let pool = self.pools.pool(pair, account).await?;
        let (token0, token1) = self.pool_tokens(&pool).await;
        let lp = pool.lp_balance.unwrap_or_default();

        let preview = match remove_preview(lp, request.percentage, (pool.reserve0, pool.reserve1), pool.total_supply) {
            Ok(preview) => preview,
            Err(e) => return Ok(blocked("remove_liquidity", &ActionGate::Invalid(e))),
        };
        let allowance = self.balances.live_allowance(Some(pair), account, self.router()).await?;
        let gate = remove_gate(
            account,
            &lp_token(&pool, &token0, &token1),
            request.percentage,
            preview.liquidity,
            allowance,
        );
        let Some(recipient) = account.filter(|_| gate.is_ready()) else {
            return Ok(blocked("remove_liquidity", &gate));
        };

        let intent = remove_liquidity_intent(
            pool.pair,
            pool.token0,
            pool.token1,
            preview.liquidity,
            recipient,
            deadline_minutes,
            unix_now(),
        )?;
        self.run(&intent, None).await
    }

    /// Approves the router for `amount` raw units of `token`.
    pub async fn approve(&self, request: &ApproveRequest) -> Result<TxReport> {
        let token = parse_address(&request.token)
            .ok_or_else(|| AqyntError::InvalidToken(format!("{} is not an address", request.token)))?;
        let amount = U256::from_dec_str(request.amount.trim())
            .map_err(|_| ValidationError::InvalidAmount(request.amount.clone()))?;
        if amount.is_zero() {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if self.account().is_none() {
            return Ok(blocked("approve", &ActionGate::ConnectWallet));
        }

        let intent = approve_intent(token, self.router(), amount);
        self.run(&intent, None).await
    }

    async fn run(&self, intent: &TransactionIntent, form: Option<&mut FormState>) -> Result<TxReport> {
        let phase = self.orchestrator.execute(intent, form).await?;
        Ok(report(intent.kind(), &phase))
    }
}

/// The pool's share token as it appears in an approve gate.
fn lp_token(pool: &PoolSnapshot, token0: &Token, token1: &Token) -> Token {
    Token {
        name: format!("AqyntSwap {}/{} LP", token0.symbol, token1.symbol),
        symbol: "AQY-LP".to_string(),
        address: pool.pair,
        decimals: LP_DECIMALS,
        logo_uri: None,
        is_native: false,
    }
}

fn blocked(intent: &str, gate: &ActionGate) -> TxReport {
    let report: GateReport = gate.to_report();
    TxReport {
        intent: intent.to_string(),
        status: "blocked".to_string(),
        hash: None,
        message: Some(report.label.clone()),
        gate: Some(report),
    }
}

fn report(intent: &str, phase: &TxPhase) -> TxReport {
    let message = match phase {
        TxPhase::Failed(failure) => Some(failure.message.clone()),
        _ => None,
    };
    TxReport {
        intent: intent.to_string(),
        status: phase.name().to_string(),
        hash: phase.hash().map(|h| format!("{h:?}")),
        message,
        gate: None,
    }
}
