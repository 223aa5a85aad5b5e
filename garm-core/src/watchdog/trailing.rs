//! Trailing-stop arithmetic ("80/80/50")
//!
//! At 80% of the way to the take-profit, close 80% of the position and
//! move the stop from the original loss level to +50% of the path. The
//! procedure itself lives in the watchdog loop; this module holds the
//! pure computations so they can be tested exactly.

use crate::core::SignalDirection;
use crate::exchange::SymbolFilters;
use rust_decimal::Decimal;

/// Trailing parameters, taken from one config snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingParams {
    /// Fraction of the path to TP at which trailing engages
    pub trigger_fraction: Decimal,
    /// Fraction of the position closed on engagement
    pub close_fraction: Decimal,
    /// Fraction of the path to TP where the new stop goes
    pub sl_fraction: Decimal,
}

/// The orders to submit when the trailing step engages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailingPlan {
    /// Quantity to market-close now, quantized down
    pub close_qty: Decimal,
    /// Remaining runner quantity
    pub remaining_qty: Decimal,
    /// New stop price for the runner, quantized
    pub new_stop_price: Decimal,
}

/// Fraction of the entry-to-target path that price has traveled.
///
/// Negative when price is on the losing side of entry; can exceed 1 when
/// price has overshot the target between polls.
pub fn traveled_fraction(
    direction: SignalDirection,
    entry: Decimal,
    target_distance: Decimal,
    mark: Decimal,
) -> Option<Decimal> {
    if target_distance.is_zero() {
        return None;
    }
    let traveled = match direction {
        SignalDirection::Long => mark - entry,
        SignalDirection::Short => entry - mark,
    };
    Some(traveled / target_distance)
}

/// Build the trailing step for a filled order, or `None` when the trigger
/// has not been reached or the quantized close quantity degenerates.
pub fn plan(
    params: &TrailingParams,
    direction: SignalDirection,
    entry: Decimal,
    take_profit: Decimal,
    position_size: Decimal,
    mark: Decimal,
    filters: &SymbolFilters,
) -> Option<TrailingPlan> {
    let distance = (take_profit - entry).abs();
    let fraction = traveled_fraction(direction, entry, distance, mark)?;
    if fraction < params.trigger_fraction {
        return None;
    }

    let close_qty = filters.quantize_qty(position_size * params.close_fraction);
    if close_qty.is_zero() || close_qty >= position_size {
        // nothing sensible to do with a dust-sized position
        return None;
    }
    let remaining_qty = position_size - close_qty;

    let offset = distance * params.sl_fraction;
    let new_stop_price = match direction {
        SignalDirection::Long => filters.quantize_price(entry + offset),
        SignalDirection::Short => filters.quantize_price(entry - offset),
    };

    Some(TrailingPlan {
        close_qty,
        remaining_qty,
        new_stop_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> TrailingParams {
        TrailingParams {
            trigger_fraction: dec!(0.80),
            close_fraction: dec!(0.80),
            sl_fraction: dec!(0.50),
        }
    }

    fn filters() -> SymbolFilters {
        SymbolFilters::new(dec!(0.1), dec!(0.001), dec!(5))
    }

    #[test]
    fn long_engages_exactly_at_trigger() {
        // E=45000, TP=47000, D=2000; mark 46600 is exactly 80%
        let plan = plan(
            &params(),
            SignalDirection::Long,
            dec!(45000),
            dec!(47000),
            dec!(0.01),
            dec!(46600),
            &filters(),
        )
        .unwrap();
        assert_eq!(plan.close_qty, dec!(0.008));
        assert_eq!(plan.remaining_qty, dec!(0.002));
        assert_eq!(plan.new_stop_price, dec!(46000));
    }

    #[test]
    fn long_does_not_engage_just_below_trigger() {
        let result = plan(
            &params(),
            SignalDirection::Long,
            dec!(45000),
            dec!(47000),
            dec!(0.01),
            dec!(46599.9),
            &filters(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn short_mirrors_the_computation() {
        // E=3000, TP=2800, D=200; mark 2840 is exactly 80%
        let plan = plan(
            &params(),
            SignalDirection::Short,
            dec!(3000),
            dec!(2800),
            dec!(0.5),
            dec!(2840),
            &filters(),
        )
        .unwrap();
        assert_eq!(plan.close_qty, dec!(0.4));
        assert_eq!(plan.remaining_qty, dec!(0.1));
        // new stop at E - 0.5*D = 2900
        assert_eq!(plan.new_stop_price, dec!(2900));
    }

    #[test]
    fn overshoot_beyond_target_still_engages() {
        let plan = plan(
            &params(),
            SignalDirection::Long,
            dec!(45000),
            dec!(47000),
            dec!(0.01),
            dec!(47100),
            &filters(),
        );
        assert!(plan.is_some());
    }

    #[test]
    fn losing_side_never_engages() {
        let fraction = traveled_fraction(
            SignalDirection::Long,
            dec!(45000),
            dec!(2000),
            dec!(44000),
        )
        .unwrap();
        assert!(fraction < Decimal::ZERO);
        assert!(plan(
            &params(),
            SignalDirection::Long,
            dec!(45000),
            dec!(47000),
            dec!(0.01),
            dec!(44000),
            &filters(),
        )
        .is_none());
    }

    #[test]
    fn dust_position_produces_no_plan() {
        // 80% of 0.001 quantizes to zero
        let result = plan(
            &params(),
            SignalDirection::Long,
            dec!(45000),
            dec!(47000),
            dec!(0.001),
            dec!(46600),
            &filters(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn zero_distance_is_degenerate() {
        assert!(traveled_fraction(
            SignalDirection::Long,
            dec!(45000),
            Decimal::ZERO,
            dec!(45000)
        )
        .is_none());
    }
}
