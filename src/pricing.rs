//! Pricing engine
//!
//! Pure, side-effect-free computations over value inputs. All money math is
//! fixed-point decimal with 2-decimal half-up rounding at the boundary.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::aggregates::hot_deal::DiscountType;
use crate::domain::value_objects::Money;
use crate::external::ShippingRate;

/// Line pricing: subtotal and compare-at discount.
///
/// The discount is `max(0, compare_at - unit_price) * quantity` when a
/// compare-at price above the unit price exists, else zero.
pub fn price_line(
    unit_price: Money,
    compare_at_price: Option<Money>,
    quantity: u32,
) -> (Money, Money) {
    let subtotal = unit_price.mul_qty(quantity);
    let discount = match compare_at_price {
        Some(compare_at) if compare_at > unit_price => {
            compare_at.sub_floor(unit_price).mul_qty(quantity)
        }
        _ => Money::ZERO,
    };
    (subtotal, discount)
}

/// Deal price for a promotional override, clamped to >= 0.
pub fn apply_hot_deal(
    original_price: Money,
    discount_type: DiscountType,
    discount_value: Decimal,
) -> Money {
    let original = original_price.amount();
    let discounted = match discount_type {
        DiscountType::Percentage => original * (Decimal::ONE - discount_value / Decimal::ONE_HUNDRED),
        DiscountType::Fixed => original - discount_value,
    };
    if discounted.is_sign_negative() {
        Money::ZERO
    } else {
        Money::new(discounted).round2()
    }
}

/// Display percentage `(original - deal) / original * 100`, rounded to
/// 4 decimal places; zero when the original price is zero.
pub fn deal_discount_percentage(original_price: Money, deal_price: Money) -> Decimal {
    let original = original_price.amount();
    if original.is_zero() || original.is_sign_negative() {
        return Decimal::ZERO;
    }
    let ratio = (original - deal_price.amount()) / original * Decimal::ONE_HUNDRED;
    ratio.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

/// Final order amount: item subtotals + shipping + tax - discount - coupon,
/// floored at zero.
pub fn rollup_order_total(
    item_subtotals: impl IntoIterator<Item = Money>,
    shipping: Money,
    tax: Money,
    discount: Money,
    coupon_discount: Money,
) -> Money {
    let items: Money = item_subtotals
        .into_iter()
        .fold(Money::ZERO, |acc, subtotal| acc.add(subtotal));
    items
        .add(shipping)
        .add(tax)
        .sub_floor(discount.add(coupon_discount))
        .round2()
}

/// Shipping cost and the gap remaining to free shipping for one location rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ShippingQuote {
    pub cost: Money,
    pub remaining_for_free_shipping: Money,
}

pub fn shipping_quote(rate: &ShippingRate, subtotal: Money) -> ShippingQuote {
    if subtotal >= rate.free_shipping_threshold {
        ShippingQuote { cost: Money::ZERO, remaining_for_free_shipping: Money::ZERO }
    } else {
        ShippingQuote {
            cost: rate.cost,
            remaining_for_free_shipping: rate.free_shipping_threshold.sub_floor(subtotal),
        }
    }
}
