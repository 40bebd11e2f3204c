//! Cart aggregate
//!
//! A cart belongs to exactly one owner (customer, admin-on-behalf, or guest
//! session). A product appears at most once per cart; adding an existing
//! product accumulates its quantity. Totals are derived on read, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Money;
use crate::error::{CommerceError, Result};
use crate::pricing;

/// Cart owner discriminator. Exactly one identity is set by construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartOwner {
    Customer(Uuid),
    /// Admin building a cart on a customer's behalf.
    Admin(Uuid),
    /// Guest session key.
    Guest(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartType {
    Customer,
    Admin,
    Guest,
    Quote,
}

impl CartType {
    /// A Quote cart is customer-owned; the other types match their owner kind.
    pub fn matches_owner(self, owner: &CartOwner) -> bool {
        matches!(
            (self, owner),
            (CartType::Customer | CartType::Quote, CartOwner::Customer(_))
                | (CartType::Admin, CartOwner::Admin(_))
                | (CartType::Guest, CartOwner::Guest(_))
        )
    }
}

/// One product line in a cart. Price and compare-at price are snapshotted
/// from the catalog (or an active hot deal) at add time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub sku: String,
    pub image: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub compare_at_price: Option<Money>,
    /// Hot deal that produced `unit_price`, when one applied at snapshot time.
    pub deal_id: Option<Uuid>,
}

impl CartLine {
    pub fn subtotal(&self) -> Money {
        pricing::price_line(self.unit_price, self.compare_at_price, self.quantity).0
    }

    pub fn discount(&self) -> Money {
        pricing::price_line(self.unit_price, self.compare_at_price, self.quantity).1
    }
}

/// Derived cart totals, recomputed from lines on every read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub total_items: u32,
    pub total_unique_items: usize,
    pub total_amount: Money,
    pub total_discount: Money,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub owner: CartOwner,
    pub cart_type: CartType,
    pub active: bool,
    /// Wish-list-like persistence; saved carts are exempt from the
    /// abandoned-cart sweep.
    pub saved: bool,
    pub lines: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(owner: CartOwner, cart_type: CartType) -> Result<Self> {
        if !cart_type.matches_owner(&owner) {
            return Err(CommerceError::ValidationFailed(format!(
                "cart type {cart_type:?} does not match owner {owner:?}"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            owner,
            cart_type,
            active: true,
            saved: false,
            lines: vec![],
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn line(&self, product_id: Uuid) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Add a line; an existing line for the same product accumulates quantity.
    /// A resulting quantity of 0 removes the line.
    pub fn add_line(&mut self, line: CartLine) {
        if let Some(existing) = self.lines.iter_mut().find(|l| l.product_id == line.product_id) {
            existing.quantity = existing.quantity.saturating_add(line.quantity);
        } else if line.quantity > 0 {
            self.lines.push(line);
        }
        self.lines.retain(|l| l.quantity > 0);
        self.touch();
    }

    /// Absolute quantity set; 0 removes the line.
    pub fn set_quantity(&mut self, product_id: Uuid, quantity: u32) -> Result<()> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or_else(|| CommerceError::not_found("cart line", product_id))?;
        if quantity == 0 {
            self.lines.retain(|l| l.product_id != product_id);
        } else {
            line.quantity = quantity;
        }
        self.touch();
        Ok(())
    }

    pub fn remove_line(&mut self, product_id: Uuid) -> Result<()> {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        if self.lines.len() == before {
            return Err(CommerceError::not_found("cart line", product_id));
        }
        self.touch();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.touch();
    }

    /// Pure read; identical regardless of call order.
    pub fn totals(&self) -> CartTotals {
        let mut total_amount = Money::ZERO;
        let mut total_discount = Money::ZERO;
        let mut total_items = 0u32;
        for line in &self.lines {
            let (subtotal, discount) =
                pricing::price_line(line.unit_price, line.compare_at_price, line.quantity);
            total_amount = total_amount.add(subtotal);
            total_discount = total_discount.add(discount);
            total_items = total_items.saturating_add(line.quantity);
        }
        CartTotals {
            total_items,
            total_unique_items: self.lines.len(),
            total_amount: total_amount.round2(),
            total_discount: total_discount.round2(),
        }
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: Uuid, qty: u32, price_minor: i64, compare_minor: Option<i64>) -> CartLine {
        CartLine {
            product_id,
            name: "Widget".into(),
            sku: "W1".into(),
            image: None,
            quantity: qty,
            unit_price: Money::from_minor(price_minor),
            compare_at_price: compare_minor.map(Money::from_minor),
            deal_id: None,
        }
    }

    #[test]
    fn test_add_line_accumulates_by_product() {
        let p = Uuid::new_v4();
        let mut cart = Cart::new(CartOwner::Guest("sess-1".into()), CartType::Guest).unwrap();
        cart.add_line(line(p, 2, 1000, None));
        cart.add_line(line(p, 1, 1000, None));
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].quantity, 3);
    }

    #[test]
    fn test_zero_quantity_removes_line() {
        let p = Uuid::new_v4();
        let mut cart = Cart::new(CartOwner::Customer(Uuid::new_v4()), CartType::Customer).unwrap();
        cart.add_line(line(p, 2, 1000, None));
        cart.set_quantity(p, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_totals_are_derived() {
        let mut cart = Cart::new(CartOwner::Customer(Uuid::new_v4()), CartType::Customer).unwrap();
        cart.add_line(line(Uuid::new_v4(), 2, 1000, Some(1500)));
        cart.add_line(line(Uuid::new_v4(), 1, 2000, None));
        let totals = cart.totals();
        assert_eq!(totals.total_items, 3);
        assert_eq!(totals.total_unique_items, 2);
        assert_eq!(totals.total_amount, Money::from_major(40));
        assert_eq!(totals.total_discount, Money::from_major(10));
        // Idempotent read.
        assert_eq!(cart.totals(), totals);
    }

    #[test]
    fn test_type_must_match_owner() {
        let result = Cart::new(CartOwner::Guest("s".into()), CartType::Customer);
        assert!(matches!(result, Err(CommerceError::ValidationFailed(_))));
    }

    #[test]
    fn test_remove_missing_line_is_not_found() {
        let mut cart = Cart::new(CartOwner::Customer(Uuid::new_v4()), CartType::Customer).unwrap();
        assert!(matches!(
            cart.remove_line(Uuid::new_v4()),
            Err(CommerceError::NotFound { .. })
        ));
    }
}
