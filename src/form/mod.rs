/*
 * Swap and liquidity form state
 */

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::models::ValidationError;
use crate::quote::{QuoteKey, QuoteOutcome};
use crate::tokens::{Token, TokenRegistry, USDC, WSTT};
use crate::utils::parse_units;

pub const DEFAULT_SLIPPAGE_BPS: u32 = 50;
pub const DEFAULT_DEADLINE_MINUTES: u32 = 20;
pub const SLIPPAGE_PRESETS_BPS: [u32; 3] = [10, 50, 100];
pub const MAX_SLIPPAGE_BPS: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    In,
    Out,
}

/// What to do when a token is picked that already sits on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    Switch,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormState {
    token_in: Token,
    token_out: Token,
    amount_in: String,
    amount_out: String,
    slippage_bps: u32,
    deadline_minutes: u32,
}

impl Default for FormState {
    fn default() -> Self {
        Self::new(WSTT.to_token(), USDC.to_token())
    }
}

impl FormState {
    #[must_use]
    pub fn new(token_in: Token, token_out: Token) -> Self {
        Self {
            token_in,
            token_out,
            amount_in: String::new(),
            amount_out: String::new(),
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            deadline_minutes: DEFAULT_DEADLINE_MINUTES,
        }
    }

    #[must_use]
    pub fn token_in(&self) -> &Token {
        &self.token_in
    }

    #[must_use]
    pub fn token_out(&self) -> &Token {
        &self.token_out
    }

    #[must_use]
    pub fn amount_in(&self) -> &str {
        &self.amount_in
    }

    #[must_use]
    pub fn amount_out(&self) -> &str {
        &self.amount_out
    }

    #[must_use]
    pub fn slippage_bps(&self) -> u32 {
        self.slippage_bps
    }

    #[must_use]
    pub fn deadline_minutes(&self) -> u32 {
        self.deadline_minutes
    }

    /// Puts `token` on `side`. Changing either token clears both amounts.
    pub fn select(&mut self, side: Side, token: Token, on_conflict: OnConflict) -> Result<(), ValidationError> {
        let (current, other) = match side {
            Side::In => (&self.token_in, &self.token_out),
            Side::Out => (&self.token_out, &self.token_in),
        };

        if token == *other {
            return match on_conflict {
                OnConflict::Switch => {
                    self.switch_tokens();
                    Ok(())
                }
                OnConflict::Reject => Err(ValidationError::SameToken),
            };
        }
        if token == *current {
            return Ok(());
        }

        match side {
            Side::In => self.token_in = token,
            Side::Out => self.token_out = token,
        }
        self.reset_amounts();
        Ok(())
    }

    pub fn switch_tokens(&mut self) {
        std::mem::swap(&mut self.token_in, &mut self.token_out);
        self.reset_amounts();
    }

    pub fn set_amount_in(&mut self, amount: impl Into<String>) {
        self.amount_in = amount.into();
    }

    pub fn set_amount_out(&mut self, amount: impl Into<String>) {
        self.amount_out = amount.into();
    }

    pub fn set_slippage_bps(&mut self, bps: u32) -> Result<(), ValidationError> {
        if bps > MAX_SLIPPAGE_BPS {
            return Err(ValidationError::InvalidSettings(format!(
                "slippage {bps} bps exceeds {MAX_SLIPPAGE_BPS} bps"
            )));
        }
        self.slippage_bps = bps;
        Ok(())
    }

    pub fn set_deadline_minutes(&mut self, minutes: u32) -> Result<(), ValidationError> {
        validate_deadline(minutes)?;
        self.deadline_minutes = minutes;
        Ok(())
    }

    pub fn reset_amounts(&mut self) {
        self.amount_in.clear();
        self.amount_out.clear();
    }

    /// Pre-selects tokens from `token0` / `token1` query parameters. Unknown
    /// addresses are ignored. Returns how many sides changed.
    pub fn apply_pair_params(&mut self, token0: Option<&str>, token1: Option<&str>, registry: &TokenRegistry) -> usize {
        let mut applied = 0;
        if let Some(token) = token0.and_then(|a| registry.find_str(a)) {
            self.token_in = token;
            applied += 1;
        }
        if let Some(token) = token1.and_then(|a| registry.find_str(a)) {
            self.token_out = token;
            applied += 1;
        }
        if applied > 0 {
            debug!("Applied {} token parameters: {}/{}", applied, self.token_in.symbol, self.token_out.symbol);
            self.reset_amounts();
        }
        applied
    }

    #[must_use]
    pub fn quote_key(&self) -> QuoteKey {
        QuoteKey::new(&self.amount_in, self.token_in.address, self.token_out.address)
    }

    /// Writes a quote into `amount_out` only if it was produced for exactly
    /// the current amount and token pair.
    pub fn apply_quote(&mut self, outcome: &QuoteOutcome) -> bool {
        if outcome.key != self.quote_key() {
            debug!("Ignoring stale quote for {:?}", outcome.key);
            return false;
        }
        self.amount_out = outcome.amount_out.clone().unwrap_or_default();
        true
    }

    pub fn validate_pair(&self) -> Result<(), ValidationError> {
        if self.token_in == self.token_out {
            return Err(ValidationError::SameToken);
        }
        Ok(())
    }

    pub fn parsed_amount_in(&self) -> Result<U256, ValidationError> {
        positive(&self.amount_in, self.token_in.decimals)
    }

    pub fn parsed_amount_out(&self) -> Result<U256, ValidationError> {
        positive(&self.amount_out, self.token_out.decimals)
    }
}

pub fn validate_deadline(minutes: u32) -> Result<(), ValidationError> {
    if minutes == 0 {
        return Err(ValidationError::InvalidSettings("deadline must be at least 1 minute".to_string()));
    }
    Ok(())
}

fn positive(amount: &str, decimals: u8) -> Result<U256, ValidationError> {
    let value = parse_units(amount, decimals)?;
    if value.is_zero() {
        return Err(ValidationError::NonPositiveAmount);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{USDT, WETH};

    #[test]
    fn defaults_match_swap_view() {
        let form = FormState::default();
        assert_eq!(form.token_in().symbol, "WSTT");
        assert_eq!(form.token_out().symbol, "USDC");
        assert_eq!(form.slippage_bps(), 50);
        assert_eq!(form.deadline_minutes(), 20);
        assert!(form.amount_in().is_empty());
    }

    #[test]
    fn selecting_other_side_switches_in_swap_mode() {
        let mut form = FormState::default();
        form.set_amount_in("1");
        form.select(Side::In, USDC.to_token(), OnConflict::Switch).unwrap();
        assert_eq!(form.token_in().symbol, "USDC");
        assert_eq!(form.token_out().symbol, "WSTT");
        assert!(form.amount_in().is_empty());
    }

    #[test]
    fn selecting_other_side_is_refused_in_liquidity_mode() {
        let mut form = FormState::default();
        let mut usdc = USDC.to_token();
        // Same token, differently cased source address.
        usdc.address = crate::utils::parse_address(&USDC.address.to_lowercase()).unwrap();
        assert_eq!(form.select(Side::In, usdc, OnConflict::Reject), Err(ValidationError::SameToken));
        assert_eq!(form.token_in().symbol, "WSTT");
    }

    #[test]
    fn changing_a_token_resets_amounts() {
        let mut form = FormState::default();
        form.set_amount_in("2");
        form.set_amount_out("3");
        form.select(Side::Out, USDT.to_token(), OnConflict::Reject).unwrap();
        assert!(form.amount_in().is_empty());
        assert!(form.amount_out().is_empty());
    }

    #[test]
    fn reselecting_the_same_token_keeps_amounts() {
        let mut form = FormState::default();
        form.set_amount_in("2");
        form.select(Side::In, WSTT.to_token(), OnConflict::Switch).unwrap();
        assert_eq!(form.amount_in(), "2");
    }

    #[test]
    fn settings_are_bounded() {
        let mut form = FormState::default();
        assert!(form.set_slippage_bps(100).is_ok());
        assert!(form.set_slippage_bps(MAX_SLIPPAGE_BPS + 1).is_err());
        assert_eq!(form.slippage_bps(), 100);
        assert!(form.set_deadline_minutes(0).is_err());
        assert!(form.set_deadline_minutes(5).is_ok());
    }

    #[test]
    fn pair_params_preselect_known_tokens() {
        let registry = TokenRegistry::ephemeral();
        let mut form = FormState::default();
        let applied = form.apply_pair_params(Some(&WETH.address.to_lowercase()), Some("0xnotanaddress"), &registry);
        assert_eq!(applied, 1);
        assert_eq!(form.token_in().symbol, "WETH");
        assert_eq!(form.token_out().symbol, "USDC");
    }

    #[test]
    fn stale_quotes_are_not_applied() {
        let mut form = FormState::default();
        form.set_amount_in("1");
        let stale = QuoteOutcome {
            key: QuoteKey::new("0.5", form.token_in().address, form.token_out().address),
            amount_out: Some("9".to_string()),
            raw_amount_out: None,
        };
        assert!(!form.apply_quote(&stale));
        assert!(form.amount_out().is_empty());

        let fresh = QuoteOutcome { key: form.quote_key(), amount_out: Some("2".to_string()), raw_amount_out: None };
        assert!(form.apply_quote(&fresh));
        assert_eq!(form.amount_out(), "2");
    }

    #[test]
    fn amounts_must_be_positive() {
        let mut form = FormState::default();
        form.set_amount_in("0");
        assert_eq!(form.parsed_amount_in(), Err(ValidationError::NonPositiveAmount));
        form.set_amount_in("");
        assert_eq!(form.parsed_amount_in(), Err(ValidationError::MissingAmount));
        form.set_amount_in("1.5");
        assert!(form.parsed_amount_in().is_ok());
    }
}
