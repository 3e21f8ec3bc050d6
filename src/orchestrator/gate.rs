/*
 * Action gates: what a form may do next given wallet, balances and allowances
 */

use ethers::types::{Address, U256};
use crate::balances::BalanceView;
use crate::form::FormState;
use crate::models::{GateReport, ValidationError};
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionGate {
    ConnectWallet,
    Invalid(ValidationError),
    /// An allowance needed for the decision is not known yet.
    Loading,
    Approve {
        token: Address,
        symbol: String,
        amount: U256,
    },
    Ready {
        action: &'static str,
    },
}

impl ActionGate {
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            ActionGate::ConnectWallet => "Connect Wallet".to_string(),
            ActionGate::Invalid(e) => e.to_string(),
            ActionGate::Loading => "Loading allowance...".to_string(),
            ActionGate::Approve { symbol, .. } => format!("Approve {symbol}"),
            ActionGate::Ready { action } => (*action).to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ActionGate::ConnectWallet => "connect_wallet",
            ActionGate::Invalid(_) => "invalid",
            ActionGate::Loading => "loading",
            ActionGate::Approve { .. } => "approve",
            ActionGate::Ready { .. } => "ready",
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, ActionGate::Ready { .. })
    }

    #[must_use]
    pub fn to_report(&self) -> GateReport {
        let (approve_token, approve_amount) = match self {
            ActionGate::Approve { token, amount, .. } => (Some(*token), Some(amount.to_string())),
            _ => (None, None),
        };
        GateReport {
            gate: self.name().to_string(),
            label: self.label(),
            approve_token,
            approve_amount,
        }
    }
}

/// Known balance below `amount`. An unknown balance never blocks.
fn insufficient(balance: &BalanceView, amount: U256) -> bool {
    balance.amount().is_some_and(|b| amount > b)
}

fn approval(token: &Token, allowance: U256, amount: U256) -> Option<ActionGate> {
    (allowance < amount).then(|| ActionGate::Approve {
        token: token.address,
        symbol: token.symbol.clone(),
        amount,
    })
}

macro_rules! gate_try {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return ActionGate::Invalid(e),
        }
    };
}

pub fn swap_gate(
    account: Option<Address>,
    form: &FormState,
    balance_in: &BalanceView,
    allowance_in: Option<U256>,
) -> ActionGate {
    if account.is_none() {
        return ActionGate::ConnectWallet;
    }
    gate_try!(form.validate_pair());
    let amount_in = gate_try!(form.parsed_amount_in());

    if insufficient(balance_in, amount_in) {
        return ActionGate::Invalid(ValidationError::InsufficientBalance(form.token_in().symbol.clone()));
    }
    let Some(allowance_in) = allowance_in else {
        return ActionGate::Loading;
    };
    if let Some(gate) = approval(form.token_in(), allowance_in, amount_in) {
        return gate;
    }
    ActionGate::Ready { action: "Swap" }
}

/// Both sides need their own approval; the input side is offered first.
pub fn add_liquidity_gate(
    account: Option<Address>,
    form: &FormState,
    balances: (&BalanceView, &BalanceView),
    allowances: (Option<U256>, Option<U256>),
) -> ActionGate {
    if account.is_none() {
        return ActionGate::ConnectWallet;
    }
    gate_try!(form.validate_pair());
    let amount_in = gate_try!(form.parsed_amount_in());
    let amount_out = gate_try!(form.parsed_amount_out());

    if insufficient(balances.0, amount_in) {
        return ActionGate::Invalid(ValidationError::InsufficientBalance(form.token_in().symbol.clone()));
    }
    if insufficient(balances.1, amount_out) {
        return ActionGate::Invalid(ValidationError::InsufficientBalance(form.token_out().symbol.clone()));
    }
    let (Some(allowance_in), Some(allowance_out)) = allowances else {
        return ActionGate::Loading;
    };
    if let Some(gate) = approval(form.token_in(), allowance_in, amount_in) {
        return gate;
    }
    if let Some(gate) = approval(form.token_out(), allowance_out, amount_out) {
        return gate;
    }
    ActionGate::Ready { action: "Supply" }
}

/// `lp_token` is the pool's own share token, approved to the router before
/// the burn.
pub fn remove_gate(
    account: Option<Address>,
    lp_token: &Token,
    percentage: u32,
    liquidity: U256,
    lp_allowance: Option<U256>,
) -> ActionGate {
    if account.is_none() {
        return ActionGate::ConnectWallet;
    }
    if percentage > 100 {
        return ActionGate::Invalid(ValidationError::InvalidPercentage(percentage));
    }
    if liquidity.is_zero() {
        return ActionGate::Invalid(ValidationError::NonPositiveAmount);
    }
    let Some(allowance) = lp_allowance else {
        return ActionGate::Loading;
    };
    if let Some(gate) = approval(lp_token, allowance, liquidity) {
        return gate;
    }
    ActionGate::Ready { action: "Remove" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{USDC, WSTT};

    fn account() -> Option<Address> {
        Some(Address::from_low_u64_be(7))
    }

    fn plenty() -> BalanceView {
        BalanceView::Ready { amount: U256::exp10(30), decimals: 18 }
    }

    fn swap_form(amount: &str) -> FormState {
        let mut form = FormState::new(USDC.to_token(), WSTT.to_token());
        form.set_amount_in(amount);
        form
    }

    #[test]
    fn approval_blocks_below_requested_amount() {
        // 100 USDC requested in raw units of the same decimals.
        let form = swap_form("0.0001");
        let gate = swap_gate(account(), &form, &plenty(), Some(U256::from(50u64)));
        assert_eq!(
            gate,
            ActionGate::Approve { token: USDC.address(), symbol: "USDC".to_string(), amount: U256::from(100u64) }
        );
        assert_eq!(gate.label(), "Approve USDC");

        let gate = swap_gate(account(), &form, &plenty(), Some(U256::from(150u64)));
        assert!(gate.is_ready());
        assert_eq!(gate.label(), "Swap");
    }

    #[test]
    fn gate_order_starts_with_wallet() {
        let form = FormState::default();
        assert_eq!(swap_gate(None, &form, &plenty(), None), ActionGate::ConnectWallet);
        assert_eq!(
            swap_gate(account(), &form, &plenty(), None),
            ActionGate::Invalid(ValidationError::MissingAmount)
        );
    }

    #[test]
    fn insufficient_balance_precedes_allowance() {
        let form = swap_form("2");
        let poor = BalanceView::Ready { amount: U256::from(1_000_000u64), decimals: 6 };
        let gate = swap_gate(account(), &form, &poor, None);
        assert_eq!(gate, ActionGate::Invalid(ValidationError::InsufficientBalance("USDC".to_string())));
        assert_eq!(gate.label(), "Insufficient USDC balance");
    }

    #[test]
    fn unknown_allowance_is_loading() {
        let form = swap_form("1");
        assert_eq!(swap_gate(account(), &form, &BalanceView::Disabled, None), ActionGate::Loading);
    }

    #[test]
    fn add_liquidity_approves_input_side_first() {
        let mut form = FormState::default();
        form.set_amount_in("1");
        form.set_amount_out("2");

        let gate = add_liquidity_gate(account(), &form, (&plenty(), &plenty()), (Some(U256::zero()), Some(U256::zero())));
        assert!(matches!(gate, ActionGate::Approve { token, .. } if token == WSTT.address()));

        let gate = add_liquidity_gate(account(), &form, (&plenty(), &plenty()), (Some(U256::MAX), Some(U256::zero())));
        assert!(matches!(gate, ActionGate::Approve { token, .. } if token == USDC.address()));

        let gate = add_liquidity_gate(account(), &form, (&plenty(), &plenty()), (Some(U256::MAX), Some(U256::MAX)));
        assert_eq!(gate.label(), "Supply");
    }

    #[test]
    fn remove_gate_checks_percentage_and_lp_allowance() {
        let lp = crate::tokens::Token {
            name: "AqyntSwap LP".to_string(),
            symbol: "ALP".to_string(),
            address: Address::from_low_u64_be(0xa000),
            decimals: 18,
            logo_uri: None,
            is_native: false,
        };
        assert_eq!(
            remove_gate(account(), &lp, 101, U256::one(), Some(U256::MAX)),
            ActionGate::Invalid(ValidationError::InvalidPercentage(101))
        );
        assert_eq!(
            remove_gate(account(), &lp, 0, U256::zero(), Some(U256::MAX)),
            ActionGate::Invalid(ValidationError::NonPositiveAmount)
        );
        let gate = remove_gate(account(), &lp, 50, U256::from(10u64), Some(U256::from(9u64)));
        assert_eq!(gate.to_report().approve_amount.as_deref(), Some("10"));
        assert!(remove_gate(account(), &lp, 50, U256::from(10u64), Some(U256::from(10u64))).is_ready());
    }
}
