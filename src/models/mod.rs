/*
 * Error types and response models shared across the client core
 */

use chrono::{DateTime, Utc};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tokens::Token;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub token: Address,
    pub owner: Option<Address>,
    pub raw: Option<String>,
    pub decimals: Option<u8>,
    pub formatted: String,
    pub loading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub amount_in: String,
    pub token_in: Address,
    pub token_out: Address,
    /// Empty when the router has no path or the read failed.
    pub amount_out: Option<String>,
    pub rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummary {
    pub pair_address: Address,
    pub token0: Token,
    pub token1: Token,
    pub reserve0: String,
    pub reserve1: String,
    pub total_liquidity_usd: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub pair_address: Address,
    pub token0: Token,
    pub token1: Token,
    pub lp_token_balance: String,
    pub user_pool_share: Decimal,
    pub user_liquidity_usd: Decimal,
    pub add_link: String,
    pub remove_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsResponse {
    pub timestamp_utc: DateTime<Utc>,
    pub tab: PoolTab,
    pub pools: Vec<PoolSummary>,
    pub positions: Vec<PositionSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolTab {
    YourPools,
    AllPools,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub gate: String,
    pub label: String,
    pub approve_token: Option<Address>,
    pub approve_amount: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLiquidityView {
    pub token_in: Token,
    pub token_out: Token,
    pub balance_in: String,
    pub balance_out: String,
    pub deadline_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveLiquidityView {
    pub pair_address: Address,
    pub token0: Token,
    pub token1: Token,
    pub percentage: u32,
    pub lp_balance: String,
    pub liquidity_to_remove: String,
    pub amount0: String,
    pub amount1: String,
    pub gate: GateReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReport {
    pub intent: String,
    pub status: String,
    pub hash: Option<String>,
    pub message: Option<String>,
    /// Set when the request stopped at a gate instead of submitting.
    pub gate: Option<GateReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: String,
    pub slippage_bps: Option<u32>,
    pub deadline_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLiquidityRequest {
    pub token_a: String,
    pub token_b: String,
    pub amount_a: String,
    pub amount_b: String,
    pub deadline_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveLiquidityRequest {
    pub pair: String,
    pub percentage: u32,
    pub deadline_minutes: Option<u32>,
}

/// `amount` is in the token's raw units, as reported by an approve gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub token: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Tokens cannot be the same")]
    SameToken,

    #[error("Select a token")]
    MissingToken,

    #[error("Enter an amount")]
    MissingAmount,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Insufficient {0} balance")]
    InsufficientBalance(String),

    #[error("No quote available for this pair")]
    MissingQuote,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Percentage must be between 0 and 100, got {0}")]
    InvalidPercentage(u32),
}

#[derive(Debug, Error)]
pub enum AqyntError {
    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Contract interaction error: {0}")]
    ContractError(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not a valid token: {0}")]
    InvalidToken(String),

    #[error("Transaction rejected by user")]
    UserRejected(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Invalid transaction state transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AqyntError {
    /// Short form suitable for a one-line notification.
    #[must_use]
    pub fn short_message(&self) -> String {
        match self {
            AqyntError::UserRejected(_) => "Transaction rejected by user".to_string(),
            AqyntError::Validation(v) => v.to_string(),
            AqyntError::RpcError(m)
            | AqyntError::ContractError(m)
            | AqyntError::TransactionFailed(m) => first_line(m),
            other => first_line(&other.to_string()),
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, AqyntError::Validation(_) | AqyntError::InvalidToken(_))
    }
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

pub type Result<T> = std::result::Result<T, AqyntError>;
