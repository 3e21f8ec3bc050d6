/*
 * Pool valuation: USD estimate, pool share and remove-liquidity preview
 *
 * The USD figure is a heuristic, not an oracle. It assumes a reference token
 * holds half the pool's value and doubles its side.
 */

use ethers::types::{U256, U512};
use rust_decimal::Decimal;
use crate::dex::PairDetails;
use crate::models::{Result, ValidationError};
use crate::tokens::{TokenSpec, USDC, USDT, WSTT};
use crate::utils::units_to_decimal;

pub const STABLE_REFERENCES: [TokenSpec; 2] = [USDC, USDT];
pub const NATIVE_REFERENCE: TokenSpec = WSTT;
pub const REMOVE_PRESETS: [u32; 4] = [25, 50, 75, 100];

const SHARE_SCALE: u64 = 10_000;

/// `a * b / c` without intermediate overflow. Zero when `c` is zero.
fn mul_div(a: U256, b: U256, c: U256) -> U256 {
    if c.is_zero() {
        return U256::zero();
    }
    let wide = a.full_mul(b) / U512::from(c);
    U256::try_from(wide).unwrap_or(U256::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub native_usd_price: Decimal,
}

impl Pricing {
    #[must_use]
    pub fn new(native_usd_price: Decimal) -> Self {
        Self { native_usd_price }
    }

    /// Stable reference first (token0, then token1), then the native-wrapped
    /// reference at the assumed price, else zero.
    pub fn pool_usd_value(&self, pool: &PairDetails) -> Result<Decimal> {
        let sides = [(pool.token0, pool.reserve0), (pool.token1, pool.reserve1)];
        let two = Decimal::from(2);

        for (token, reserve) in sides {
            if let Some(stable) = STABLE_REFERENCES.iter().find(|s| s.address() == token) {
                return Ok(units_to_decimal(reserve, stable.decimals)? * two);
            }
        }
        for (token, reserve) in sides {
            if token == NATIVE_REFERENCE.address() {
                let amount = units_to_decimal(reserve, NATIVE_REFERENCE.decimals)?;
                return Ok(amount * self.native_usd_price * two);
            }
        }
        Ok(Decimal::ZERO)
    }
}

/// `floor(lp * 10000 / total) / 100`, in percent with two decimals. Zero for
/// an empty pool, never above 100.
#[must_use]
pub fn pool_share_percent(lp_balance: U256, total_supply: U256) -> Decimal {
    if total_supply.is_zero() {
        return Decimal::ZERO;
    }
    let bps = lp_balance.full_mul(U256::from(SHARE_SCALE)) / U512::from(total_supply);
    let bps = if bps > U512::from(SHARE_SCALE) { SHARE_SCALE } else { bps.low_u64() };
    Decimal::new(bps as i64, 2)
}

#[must_use]
pub fn position_usd_value(pool_usd: Decimal, share_percent: Decimal) -> Decimal {
    pool_usd * share_percent / Decimal::ONE_HUNDRED
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovePreview {
    pub liquidity: U256,
    pub amount0: U256,
    pub amount1: U256,
}

/// What burning `percentage` of `lp_balance` would pay out, in raw units.
pub fn remove_preview(
    lp_balance: U256,
    percentage: u32,
    reserves: (U256, U256),
    total_supply: U256,
) -> std::result::Result<RemovePreview, ValidationError> {
    if percentage > 100 {
        return Err(ValidationError::InvalidPercentage(percentage));
    }
    let liquidity = mul_div(lp_balance, U256::from(percentage), U256::from(100u64));

    Ok(RemovePreview {
        liquidity,
        amount0: mul_div(reserves.0, liquidity, total_supply),
        amount1: mul_div(reserves.1, liquidity, total_supply),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::WETH;
    use ethers::types::Address;
    use std::str::FromStr;

    fn pool(token0: Address, token1: Address, reserve0: U256, reserve1: U256) -> PairDetails {
        PairDetails {
            pair: Address::from_low_u64_be(0xa000),
            token0,
            token1,
            reserve0,
            reserve1,
            total_supply: U256::from(1_000u64),
            lp_balance: None,
        }
    }

    fn pricing() -> Pricing {
        Pricing::new(Decimal::from(1800))
    }

    #[test]
    fn stable_reference_wins_over_native() {
        // 500 USDC against 3 WSTT: priced off USDC even though WSTT sits first.
        let p = pool(WSTT.address(), USDC.address(), U256::from(3u64) * U256::exp10(18), U256::from(500_000_000u64));
        assert_eq!(pricing().pool_usd_value(&p).unwrap(), Decimal::from(1000));
    }

    #[test]
    fn native_reference_uses_assumed_price() {
        let p = pool(WETH.address(), WSTT.address(), U256::exp10(18), U256::from(5u64) * U256::exp10(17));
        assert_eq!(pricing().pool_usd_value(&p).unwrap(), Decimal::from(1800));
    }

    #[test]
    fn unreferenced_pool_is_zero() {
        let other = Address::from_low_u64_be(0x42);
        let p = pool(WETH.address(), other, U256::exp10(18), U256::exp10(18));
        assert_eq!(pricing().pool_usd_value(&p).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn share_truncates_to_two_places() {
        assert_eq!(pool_share_percent(U256::from(333u64), U256::from(1_000u64)), Decimal::from_str("33.30").unwrap());
        assert_eq!(pool_share_percent(U256::from(1u64), U256::from(3u64)), Decimal::from_str("33.33").unwrap());
        assert_eq!(pool_share_percent(U256::from(5u64), U256::zero()), Decimal::ZERO);
        assert_eq!(pool_share_percent(U256::from(2_000u64), U256::from(1_000u64)), Decimal::ONE_HUNDRED);
        assert_eq!(pool_share_percent(U256::MAX, U256::MAX), Decimal::ONE_HUNDRED);
    }

    #[test]
    fn position_value_scales_by_share() {
        let share = Decimal::from_str("33.30").unwrap();
        assert_eq!(position_usd_value(Decimal::from(1000), share), Decimal::from(333));
    }

    #[test]
    fn preview_is_linear_in_percentage() {
        let lp = U256::from(400u64);
        let total = U256::from(1_000u64);
        let reserves = (U256::from(5_000u64), U256::from(7_000u64));

        let none = remove_preview(lp, 0, reserves, total).unwrap();
        assert_eq!((none.liquidity, none.amount0, none.amount1), (U256::zero(), U256::zero(), U256::zero()));

        let all = remove_preview(lp, 100, reserves, total).unwrap();
        assert_eq!(all.liquidity, lp);
        assert_eq!(all.amount0, reserves.0 * lp / total);
        assert_eq!(all.amount1, U256::from(2_800u64));

        let half = remove_preview(lp, 50, reserves, total).unwrap();
        assert_eq!(half.amount0, U256::from(1_000u64));
    }

    #[test]
    fn preview_rejects_more_than_everything() {
        let err = remove_preview(U256::one(), 101, (U256::one(), U256::one()), U256::one()).unwrap_err();
        assert_eq!(err, ValidationError::InvalidPercentage(101));
    }
}
