//! Per-symbol precision filters and boundary quantization
//!
//! Every price and quantity crossing the exchange boundary is projected
//! onto the symbol's grid here, with exact decimal arithmetic. The two
//! classic rejection modes ("precision over the maximum defined" and
//! "price not increased by tick size") are structurally impossible when
//! all submissions go through this module.

use super::models::RawSymbolFilter;
use super::ExchangeApi;
use crate::core::ExchangeError;
use dashmap::DashMap;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decimal quanta for one symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFilters {
    /// Price quantum
    pub tick_size: Decimal,
    /// Quantity quantum
    pub step_size: Decimal,
    /// Minimum order notional
    pub min_notional: Decimal,
    /// Decimals implied by the tick size
    pub price_decimals: u32,
    /// Decimals implied by the step size
    pub qty_decimals: u32,
}

impl SymbolFilters {
    pub fn new(tick_size: Decimal, step_size: Decimal, min_notional: Decimal) -> Self {
        Self {
            price_decimals: tick_size.normalize().scale(),
            qty_decimals: step_size.normalize().scale(),
            tick_size,
            step_size,
            min_notional,
        }
    }

    /// Round a price to the nearest tick, half away from zero.
    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        quantize(price, self.tick_size, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Round a quantity down to the step grid, so notional never exceeds
    /// the computed budget after rounding.
    pub fn quantize_qty(&self, qty: Decimal) -> Decimal {
        quantize(qty, self.step_size, RoundingStrategy::ToZero)
    }
}

fn quantize(value: Decimal, quantum: Decimal, strategy: RoundingStrategy) -> Decimal {
    if quantum.is_zero() {
        return value.normalize();
    }
    let steps = (value / quantum).round_dp_with_strategy(0, strategy);
    (steps * quantum).normalize()
}

/// Process-wide lazy cache of symbol filters.
///
/// Populated on first need per symbol and kept for the process lifetime;
/// a precision rejection from the exchange invalidates the entry so the
/// next call re-fetches.
pub struct FilterCache {
    api: Arc<dyn ExchangeApi>,
    cache: DashMap<String, SymbolFilters>,
}

impl FilterCache {
    pub fn new(api: Arc<dyn ExchangeApi>) -> Self {
        Self {
            api,
            cache: DashMap::new(),
        }
    }

    /// Cached filters for a symbol; fetches symbol metadata on miss.
    pub async fn get(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        if let Some(filters) = self.cache.get(symbol) {
            return Ok(filters.value().clone());
        }
        let info = self.api.symbol_info(symbol).await?;

        let mut tick_size = None;
        let mut step_size = None;
        let mut min_notional = Decimal::ZERO;
        for filter in &info.filters {
            match filter {
                RawSymbolFilter::Price { tick_size: t } => tick_size = Some(*t),
                RawSymbolFilter::LotSize { step_size: s } => step_size = Some(*s),
                RawSymbolFilter::MinNotional { notional } => min_notional = *notional,
                RawSymbolFilter::Other => {}
            }
        }
        let (Some(tick_size), Some(step_size)) = (tick_size, step_size) else {
            warn!(%symbol, "symbol metadata is missing price or lot filters");
            return Err(ExchangeError::Rejected {
                code: -1,
                message: format!("{symbol}: incomplete filter metadata"),
            });
        };

        let filters = SymbolFilters::new(tick_size, step_size, min_notional);
        debug!(%symbol, ?filters, "cached symbol filters");
        self.cache.insert(symbol.to_string(), filters.clone());
        Ok(filters)
    }

    /// Quantize a price on the symbol's tick grid.
    pub async fn quantize_price(
        &self,
        symbol: &str,
        price: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        Ok(self.get(symbol).await?.quantize_price(price))
    }

    /// Quantize a quantity down onto the symbol's step grid.
    pub async fn quantize_qty(
        &self,
        symbol: &str,
        qty: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        Ok(self.get(symbol).await?.quantize_qty(qty))
    }

    /// Drop a cached entry; used when the exchange rejects a submission
    /// with a precision error, which means the cached quanta are stale.
    pub fn invalidate(&self, symbol: &str) {
        if self.cache.remove(symbol).is_some() {
            warn!(%symbol, "invalidated stale symbol filters");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_filters() -> SymbolFilters {
        SymbolFilters::new(dec!(0.1), dec!(0.001), dec!(5))
    }

    #[test]
    fn price_rounds_half_up_on_tick_grid() {
        let f = btc_filters();
        assert_eq!(f.quantize_price(dec!(45000.04)), dec!(45000));
        assert_eq!(f.quantize_price(dec!(45000.05)), dec!(45000.1));
        assert_eq!(f.quantize_price(dec!(45000.0)), dec!(45000));
        assert_eq!(f.quantize_price(dec!(117991.93)), dec!(117991.9));
    }

    #[test]
    fn qty_rounds_down_on_step_grid() {
        let f = btc_filters();
        assert_eq!(f.quantize_qty(dec!(0.004444)), dec!(0.004));
        assert_eq!(f.quantize_qty(dec!(0.0049999)), dec!(0.004));
        assert_eq!(f.quantize_qty(dec!(0.001)), dec!(0.001));
        assert_eq!(f.quantize_qty(dec!(0.0009)), Decimal::ZERO);
    }

    #[test]
    fn decimals_derived_from_quanta() {
        let f = btc_filters();
        assert_eq!(f.price_decimals, 1);
        assert_eq!(f.qty_decimals, 3);
        let coarse = SymbolFilters::new(dec!(1), dec!(1), dec!(5));
        assert_eq!(coarse.price_decimals, 0);
    }

    #[test]
    fn value_already_on_grid_is_unchanged() {
        let f = btc_filters();
        assert_eq!(f.quantize_price(dec!(45000.1)), dec!(45000.1));
        assert_eq!(f.quantize_qty(dec!(0.025)), dec!(0.025));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_price() -> impl Strategy<Value = Decimal> {
            // prices up to ~200k with up to 8 decimals
            (1u64..200_000_0000u64).prop_map(|raw| Decimal::new(raw as i64, 4))
        }

        proptest! {
            #[test]
            fn quantize_price_is_idempotent(price in arb_price()) {
                let f = SymbolFilters::new(dec!(0.1), dec!(0.001), dec!(5));
                let once = f.quantize_price(price);
                prop_assert_eq!(f.quantize_price(once), once);
            }

            #[test]
            fn quantized_price_is_on_grid(price in arb_price()) {
                let f = SymbolFilters::new(dec!(0.1), dec!(0.001), dec!(5));
                let quantized = f.quantize_price(price);
                prop_assert!((quantized % f.tick_size).is_zero());
            }

            #[test]
            fn quantized_qty_never_rounds_up(qty in arb_price()) {
                let f = SymbolFilters::new(dec!(0.1), dec!(0.001), dec!(5));
                let quantized = f.quantize_qty(qty);
                prop_assert!(quantized <= qty);
                prop_assert!((quantized % f.step_size).is_zero());
            }
        }
    }
}
