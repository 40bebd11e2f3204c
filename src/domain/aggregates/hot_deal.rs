//! Hot deal aggregate
//!
//! A time-boxed promotional price override for a single product. The deal
//! price is derived from the product's current price whenever the deal is
//! created or repriced; it is never left stale relative to the inputs it was
//! computed from. At most one active deal may exist per product (enforced by
//! the store on create and update).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Money;
use crate::error::{CommerceError, Result};
use crate::pricing;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HotDeal {
    pub id: Uuid,
    pub product_id: Uuid,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    /// Product price snapshot at last reprice.
    pub original_price: Money,
    /// Derived from `original_price` and the discount inputs; always >= 0.
    pub deal_price: Money,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Deal stops applying once `sold_count` reaches this limit.
    pub stock_limit: Option<u32>,
    pub sold_count: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HotDeal {
    pub fn new(
        product_id: Uuid,
        discount_type: DiscountType,
        discount_value: Decimal,
        original_price: Money,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        stock_limit: Option<u32>,
    ) -> Result<Self> {
        if end_date <= start_date {
            return Err(CommerceError::ValidationFailed(
                "deal end date must be after start date".into(),
            ));
        }
        if discount_value.is_sign_negative() {
            return Err(CommerceError::ValidationFailed(
                "discount value must not be negative".into(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            product_id,
            discount_type,
            discount_value,
            original_price,
            deal_price: pricing::apply_hot_deal(original_price, discount_type, discount_value),
            start_date,
            end_date,
            stock_limit,
            sold_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Recompute `deal_price` against the product's current price.
    pub fn reprice(&mut self, current_price: Money) {
        self.original_price = current_price;
        self.deal_price =
            pricing::apply_hot_deal(current_price, self.discount_type, self.discount_value);
        self.updated_at = Utc::now();
    }

    /// "Currently active" = flagged active AND now within the window.
    pub fn is_currently_active(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now >= self.start_date && now <= self.end_date
    }

    /// Whether the deal still applies to new cart lines: currently active
    /// and its stock limit (if any) not yet exhausted.
    pub fn applies(&self, now: DateTime<Utc>) -> bool {
        self.is_currently_active(now)
            && self.stock_limit.map_or(true, |limit| self.sold_count < limit)
    }

    /// Display percentage, 4 decimal places.
    pub fn discount_percentage(&self) -> Decimal {
        pricing::deal_discount_percentage(self.original_price, self.deal_price)
    }

    pub fn record_sale(&mut self, quantity: u32) {
        self.sold_count = self.sold_count.saturating_add(quantity);
        self.updated_at = Utc::now();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }
}
