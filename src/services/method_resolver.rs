//! Payment method resolution.
//!
//! Given fresh balances, allowances and an oracle quote, computes which
//! payment methods can settle a given content price right now, which need an
//! approval step, and which one to recommend by default.

use bigdecimal::BigDecimal;
use serde::Serialize;
use tracing::debug;

use crate::intent::PaymentMethod;

/// Point-in-time chain reads the resolver works from. Recomputed whenever
/// balances, allowances or the oracle quote refresh; never persisted.
#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub stable_balance: BigDecimal,
    pub stable_allowance: BigDecimal,
    pub native_balance: BigDecimal,
    /// Oracle price of one native token in settlement tokens; `None` while
    /// loading or when the oracle is unreachable.
    pub native_price_in_stable: Option<BigDecimal>,
}

/// Availability tag per method.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MethodAvailability {
    /// Affordable and executable as-is.
    Available,
    /// Balance does not cover the required amount.
    Insufficient,
    /// Not executable regardless of balance (no oracle quote, or the method
    /// does not apply in the current allowance state).
    Unavailable,
}

/// Affordability details for one method.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TokenAffordability {
    pub balance: BigDecimal,
    pub required_amount: BigDecimal,
    pub has_enough_balance: bool,
    /// Present for token-denominated methods only.
    pub allowance: Option<BigDecimal>,
    pub needs_approval: bool,
}

/// One method with its availability verdict.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MethodQuote {
    pub method: PaymentMethod,
    pub availability: MethodAvailability,
    pub affordability: TokenAffordability,
}

impl MethodQuote {
    pub fn is_available(&self) -> bool {
        self.availability == MethodAvailability::Available
    }
}

/// Full resolution: every method quoted, plus the recommended default.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MethodResolution {
    pub quotes: Vec<MethodQuote>,
    pub recommended: Option<PaymentMethod>,
}

impl MethodResolution {
    pub fn quote(&self, method: PaymentMethod) -> Option<&MethodQuote> {
        self.quotes.iter().find(|q| q.method == method)
    }
}

/// Computes method affordability from a balance snapshot.
#[derive(Debug, Clone)]
pub struct MethodResolver {
    slippage_bps: u32,
}

impl MethodResolver {
    pub fn new(slippage_bps: u32) -> Self {
        Self { slippage_bps }
    }

    /// Resolve every method against `price` (settlement-token units).
    pub fn resolve(&self, price: &BigDecimal, snapshot: &BalanceSnapshot) -> MethodResolution {
        let needs_approval = snapshot.stable_allowance < *price;

        let stable_direct = {
            let has_balance = snapshot.stable_balance >= *price;
            let availability = if !has_balance {
                MethodAvailability::Insufficient
            } else if needs_approval {
                // Balance is there but the marketplace cannot pull it yet;
                // the batched method covers this case.
                MethodAvailability::Unavailable
            } else {
                MethodAvailability::Available
            };
            MethodQuote {
                method: PaymentMethod::StableDirect,
                availability,
                affordability: TokenAffordability {
                    balance: snapshot.stable_balance.clone(),
                    required_amount: price.clone(),
                    has_enough_balance: has_balance,
                    allowance: Some(snapshot.stable_allowance.clone()),
                    needs_approval,
                },
            }
        };

        let batched = {
            let has_balance = snapshot.stable_balance >= *price;
            let availability = if !needs_approval {
                MethodAvailability::Unavailable
            } else if has_balance {
                MethodAvailability::Available
            } else {
                MethodAvailability::Insufficient
            };
            MethodQuote {
                method: PaymentMethod::BatchedApprovePay,
                availability,
                affordability: TokenAffordability {
                    balance: snapshot.stable_balance.clone(),
                    required_amount: price.clone(),
                    has_enough_balance: has_balance,
                    allowance: Some(snapshot.stable_allowance.clone()),
                    needs_approval,
                },
            }
        };

        let native_swap = match &snapshot.native_price_in_stable {
            Some(rate) if *rate > BigDecimal::from(0) => {
                let required = self.swap_amount_with_slippage(price, rate);
                let has_balance = snapshot.native_balance >= required;
                MethodQuote {
                    method: PaymentMethod::NativeSwap,
                    availability: if has_balance {
                        MethodAvailability::Available
                    } else {
                        MethodAvailability::Insufficient
                    },
                    affordability: TokenAffordability {
                        balance: snapshot.native_balance.clone(),
                        required_amount: required,
                        has_enough_balance: has_balance,
                        allowance: None,
                        needs_approval: false,
                    },
                }
            }
            _ => MethodQuote {
                method: PaymentMethod::NativeSwap,
                availability: MethodAvailability::Unavailable,
                affordability: TokenAffordability {
                    balance: snapshot.native_balance.clone(),
                    required_amount: BigDecimal::from(0),
                    has_enough_balance: false,
                    allowance: None,
                    needs_approval: false,
                },
            },
        };

        let quotes = vec![stable_direct, batched, native_swap];
        let recommended = recommend(&quotes);

        debug!(
            price = %price,
            recommended = ?recommended.map(|m| m.as_str()),
            "payment methods resolved"
        );

        MethodResolution { quotes, recommended }
    }

    /// Native amount needed to cover `price`, padded by the slippage buffer
    /// so quote drift between resolution and execution does not starve the
    /// swap.
    fn swap_amount_with_slippage(&self, price: &BigDecimal, rate: &BigDecimal) -> BigDecimal {
        let padded = price * BigDecimal::from(10_000u32 + self.slippage_bps);
        padded / (rate * BigDecimal::from(10_000u32))
    }

    pub fn slippage_bps(&self) -> u32 {
        self.slippage_bps
    }
}

/// Default method preference: an affordable no-swap method first, then the
/// affordable alternative holding the largest balance, then the settlement
/// asset as a top-up suggestion.
fn recommend(quotes: &[MethodQuote]) -> Option<PaymentMethod> {
    let affordable: Vec<&MethodQuote> = quotes.iter().filter(|q| q.is_available()).collect();

    if let Some(no_swap) = affordable.iter().find(|q| !q.method.is_swap_based()) {
        return Some(no_swap.method);
    }

    affordable
        .iter()
        .max_by(|a, b| a.affordability.balance.cmp(&b.affordability.balance))
        .map(|q| q.method)
        .or(Some(PaymentMethod::StableDirect))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(stable: i64, allowance: i64, native: i64, rate: Option<i64>) -> BalanceSnapshot {
        BalanceSnapshot {
            stable_balance: BigDecimal::from(stable),
            stable_allowance: BigDecimal::from(allowance),
            native_balance: BigDecimal::from(native),
            native_price_in_stable: rate.map(BigDecimal::from),
        }
    }

    fn resolver() -> MethodResolver {
        MethodResolver::new(200)
    }

    #[test]
    fn funded_and_approved_prefers_stable_direct() {
        let resolution = resolver().resolve(&BigDecimal::from(100), &snapshot(500, 500, 0, None));
        assert_eq!(resolution.recommended, Some(PaymentMethod::StableDirect));

        let direct = resolution.quote(PaymentMethod::StableDirect).unwrap();
        assert!(direct.is_available());
        assert!(!direct.affordability.needs_approval);

        // Batched is pointless when no approval is needed.
        let batched = resolution.quote(PaymentMethod::BatchedApprovePay).unwrap();
        assert_eq!(batched.availability, MethodAvailability::Unavailable);
    }

    #[test]
    fn missing_allowance_routes_to_batched() {
        let resolution = resolver().resolve(&BigDecimal::from(100), &snapshot(500, 0, 0, None));
        assert_eq!(resolution.recommended, Some(PaymentMethod::BatchedApprovePay));

        let direct = resolution.quote(PaymentMethod::StableDirect).unwrap();
        assert_eq!(direct.availability, MethodAvailability::Unavailable);
        assert!(direct.affordability.needs_approval);
    }

    #[test]
    fn swap_quote_carries_the_slippage_buffer() {
        // price 100 stable, rate 2 stable per native → 50 native + 2% = 51.
        let resolution =
            resolver().resolve(&BigDecimal::from(100), &snapshot(0, 0, 60, Some(2)));
        let swap = resolution.quote(PaymentMethod::NativeSwap).unwrap();
        assert!(swap.is_available());
        assert_eq!(swap.affordability.required_amount, BigDecimal::from(51));
        assert_eq!(resolution.recommended, Some(PaymentMethod::NativeSwap));
    }

    #[test]
    fn no_oracle_quote_disables_the_swap_method() {
        let resolution = resolver().resolve(&BigDecimal::from(100), &snapshot(0, 0, 1_000, None));
        let swap = resolution.quote(PaymentMethod::NativeSwap).unwrap();
        assert_eq!(swap.availability, MethodAvailability::Unavailable);
    }

    #[test]
    fn nothing_affordable_recommends_settlement_asset_for_topup() {
        let resolution = resolver().resolve(&BigDecimal::from(100), &snapshot(1, 0, 1, Some(2)));
        assert_eq!(resolution.recommended, Some(PaymentMethod::StableDirect));
        assert!(resolution.quotes.iter().all(|q| !q.is_available()));
    }

    #[test]
    fn exact_balance_is_enough() {
        let resolution = resolver().resolve(&BigDecimal::from(100), &snapshot(100, 100, 0, None));
        let direct = resolution.quote(PaymentMethod::StableDirect).unwrap();
        assert!(direct.is_available());
    }
}
