/*
 * Transaction intents and their builders
 */

use ethers::types::{Address, U256};
use crate::form::FormState;
use crate::models::ValidationError;
use crate::utils::deadline_from;

pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionIntent {
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    Swap {
        path: Vec<Address>,
        amount_in: U256,
        min_amount_out: U256,
        to: Address,
        deadline: U256,
    },
    AddLiquidity {
        token_a: Address,
        token_b: Address,
        amount_a: U256,
        amount_b: U256,
        amount_a_min: U256,
        amount_b_min: U256,
        to: Address,
        deadline: U256,
    },
    RemoveLiquidity {
        pair: Address,
        token_a: Address,
        token_b: Address,
        liquidity: U256,
        amount_a_min: U256,
        amount_b_min: U256,
        to: Address,
        deadline: U256,
    },
}

/// Which tracker an intent runs under. Approvals get one tracker per token so
/// the two sides of an add-liquidity form can be approved independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentSlot {
    Approve(Address),
    Swap,
    AddLiquidity,
    RemoveLiquidity,
}

impl TransactionIntent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionIntent::Approve { .. } => "approve",
            TransactionIntent::Swap { .. } => "swap",
            TransactionIntent::AddLiquidity { .. } => "add_liquidity",
            TransactionIntent::RemoveLiquidity { .. } => "remove_liquidity",
        }
    }

    #[must_use]
    pub fn slot(&self) -> IntentSlot {
        match self {
            TransactionIntent::Approve { token, .. } => IntentSlot::Approve(*token),
            TransactionIntent::Swap { .. } => IntentSlot::Swap,
            TransactionIntent::AddLiquidity { .. } => IntentSlot::AddLiquidity,
            TransactionIntent::RemoveLiquidity { .. } => IntentSlot::RemoveLiquidity,
        }
    }

    /// Swaps and liquidity moves, as opposed to approvals.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        !matches!(self, TransactionIntent::Approve { .. })
    }

    /// Tokens whose allowance this intent consumes.
    #[must_use]
    pub fn spent_tokens(&self) -> Vec<Address> {
        match self {
            TransactionIntent::Approve { .. } => Vec::new(),
            TransactionIntent::Swap { path, .. } => path.first().copied().into_iter().collect(),
            TransactionIntent::AddLiquidity { token_a, token_b, .. } => vec![*token_a, *token_b],
            TransactionIntent::RemoveLiquidity { pair, .. } => vec![*pair],
        }
    }
}

/// `amount_out * (10000 - bps) / 10000`, floored. Slippage above 100% is
/// treated as 100%.
#[must_use]
pub fn min_amount_out(amount_out: U256, slippage_bps: u32) -> U256 {
    let keep = U256::from(BPS_DENOMINATOR - slippage_bps.min(BPS_DENOMINATOR));
    let denominator = U256::from(BPS_DENOMINATOR);
    match amount_out.checked_mul(keep) {
        Some(scaled) => scaled / denominator,
        None => amount_out / denominator * keep,
    }
}

#[must_use]
pub fn approve_intent(token: Address, spender: Address, amount: U256) -> TransactionIntent {
    TransactionIntent::Approve { token, spender, amount }
}

/// Exact-input swap along `[token_in, token_out]`. `quoted_out` is the
/// router quote in the output token's raw units.
pub fn swap_intent(
    form: &FormState,
    quoted_out: Option<U256>,
    recipient: Address,
    now_unix: i64,
) -> Result<TransactionIntent, ValidationError> {
    form.validate_pair()?;
    let amount_in = form.parsed_amount_in()?;
    let quoted_out = quoted_out.filter(|q| !q.is_zero()).ok_or(ValidationError::MissingQuote)?;

    Ok(TransactionIntent::Swap {
        path: vec![form.token_in().address, form.token_out().address],
        amount_in,
        min_amount_out: min_amount_out(quoted_out, form.slippage_bps()),
        to: recipient,
        deadline: deadline_from(now_unix, form.deadline_minutes()),
    })
}

/// Supply both sides of the form. Minimums are zero: the router accepts any
/// ratio the pool moves to before inclusion.
pub fn add_liquidity_intent(
    form: &FormState,
    recipient: Address,
    now_unix: i64,
) -> Result<TransactionIntent, ValidationError> {
    form.validate_pair()?;
    let amount_a = form.parsed_amount_in()?;
    let amount_b = form.parsed_amount_out()?;

    Ok(TransactionIntent::AddLiquidity {
        token_a: form.token_in().address,
        token_b: form.token_out().address,
        amount_a,
        amount_b,
        amount_a_min: U256::zero(),
        amount_b_min: U256::zero(),
        to: recipient,
        deadline: deadline_from(now_unix, form.deadline_minutes()),
    })
}

/// Burn `liquidity` LP tokens of `pair`. Minimums are zero, as for adds.
pub fn remove_liquidity_intent(
    pair: Address,
    token0: Address,
    token1: Address,
    liquidity: U256,
    recipient: Address,
    deadline_minutes: u32,
    now_unix: i64,
) -> Result<TransactionIntent, ValidationError> {
    if liquidity.is_zero() {
        return Err(ValidationError::NonPositiveAmount);
    }

    Ok(TransactionIntent::RemoveLiquidity {
        pair,
        token_a: token0,
        token_b: token1,
        liquidity,
        amount_a_min: U256::zero(),
        amount_b_min: U256::zero(),
        to: recipient,
        deadline: deadline_from(now_unix, deadline_minutes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{USDC, WSTT};

    #[test]
    fn minimum_output_floors() {
        assert_eq!(min_amount_out(U256::from(1_000_000u64), 50), U256::from(995_000u64));
        assert_eq!(min_amount_out(U256::from(999u64), 50), U256::from(994u64));
        assert_eq!(min_amount_out(U256::from(12_345u64), 0), U256::from(12_345u64));
        assert_eq!(min_amount_out(U256::from(12_345u64), 20_000), U256::zero());
    }

    #[test]
    fn minimum_output_survives_full_width_amounts() {
        let out = min_amount_out(U256::MAX, 100);
        assert!(out < U256::MAX);
        assert!(out > U256::MAX / 2);
    }

    #[test]
    fn swap_intent_uses_form_settings() {
        let mut form = FormState::default();
        form.set_amount_in("1.5");
        form.set_slippage_bps(100).unwrap();
        let to = Address::from_low_u64_be(7);

        let intent = swap_intent(&form, Some(U256::from(3_000_000u64)), to, 1_700_000_000).unwrap();
        match intent {
            TransactionIntent::Swap { path, amount_in, min_amount_out, deadline, .. } => {
                assert_eq!(path, vec![WSTT.address(), USDC.address()]);
                assert_eq!(amount_in, U256::from(15u64) * U256::exp10(17));
                assert_eq!(min_amount_out, U256::from(2_970_000u64));
                assert_eq!(deadline, U256::from(1_700_000_000u64 + 20 * 60));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn swap_without_quote_is_refused() {
        let mut form = FormState::default();
        form.set_amount_in("1");
        let to = Address::from_low_u64_be(7);
        assert_eq!(swap_intent(&form, None, to, 0), Err(ValidationError::MissingQuote));
        assert_eq!(swap_intent(&form, Some(U256::zero()), to, 0), Err(ValidationError::MissingQuote));
    }

    #[test]
    fn liquidity_minimums_are_zero() {
        let mut form = FormState::default();
        form.set_amount_in("1");
        form.set_amount_out("2");
        let intent = add_liquidity_intent(&form, Address::from_low_u64_be(7), 0).unwrap();
        assert!(matches!(
            intent,
            TransactionIntent::AddLiquidity { amount_a_min, amount_b_min, .. }
                if amount_a_min.is_zero() && amount_b_min.is_zero()
        ));
        assert_eq!(intent.spent_tokens(), vec![WSTT.address(), USDC.address()]);
    }

    #[test]
    fn removing_nothing_is_refused() {
        let a = Address::from_low_u64_be(1);
        let result = remove_liquidity_intent(a, a, a, U256::zero(), a, 20, 0);
        assert_eq!(result, Err(ValidationError::NonPositiveAmount));
    }
}
