//! Arena-style entity storage
//!
//! Id-keyed in-memory tables with explicit foreign-key-style lookups; no
//! entity holds a live back-reference to another. Mutations go through
//! `with_*_mut` closures so a single write lock covers the whole change
//! (validate, mutate, append history) for one entity.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::aggregates::cart::{Cart, CartOwner};
use crate::domain::aggregates::hot_deal::HotDeal;
use crate::domain::aggregates::order::Order;
use crate::domain::aggregates::returns::{ReturnPolicy, ReturnRequest, ReturnStatus};
use crate::error::{CommerceError, Result};

#[derive(Debug, Default)]
pub struct Store {
    carts: RwLock<HashMap<Uuid, Cart>>,
    orders: RwLock<HashMap<Uuid, Order>>,
    returns: RwLock<HashMap<Uuid, ReturnRequest>>,
    deals: RwLock<HashMap<Uuid, HotDeal>>,
    policies: RwLock<HashMap<Uuid, ReturnPolicy>>,
    /// Reserved order/return numbers; reservation happens before insert so
    /// concurrent creation cannot mint duplicates.
    order_numbers: RwLock<HashSet<String>>,
    return_numbers: RwLock<HashSet<String>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // -- carts --------------------------------------------------------------

    pub fn insert_cart(&self, cart: Cart) {
        self.carts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cart.id, cart);
    }

    pub fn cart(&self, id: Uuid) -> Result<Cart> {
        self.carts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("cart", id))
    }

    pub fn with_cart_mut<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Cart) -> Result<T>,
    ) -> Result<T> {
        let mut carts = self.carts.write().unwrap_or_else(PoisonError::into_inner);
        let cart = carts
            .get_mut(&id)
            .ok_or_else(|| CommerceError::not_found("cart", id))?;
        f(cart)
    }

    pub fn remove_cart(&self, id: Uuid) -> Option<Cart> {
        self.carts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Active cart for the given owner, if any.
    pub fn find_active_cart(&self, owner: &CartOwner) -> Option<Cart> {
        self.carts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|c| c.active && &c.owner == owner)
            .cloned()
    }

    /// Hard-delete inactive, unsaved carts untouched since the cutoff.
    /// Row-independent; safe to run concurrently with live traffic.
    pub fn purge_abandoned_carts(&self, cutoff: DateTime<Utc>) -> usize {
        let mut carts = self.carts.write().unwrap_or_else(PoisonError::into_inner);
        let before = carts.len();
        carts.retain(|_, c| c.active || c.saved || c.updated_at >= cutoff);
        before - carts.len()
    }

    // -- orders -------------------------------------------------------------

    pub fn next_order_number(&self) -> String {
        let mut reserved = self
            .order_numbers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            let candidate = format!("ORD-{:08}", rand::random::<u32>());
            if reserved.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    pub fn insert_order(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        if orders.values().any(|o| o.order_number == order.order_number) {
            return Err(CommerceError::Conflict(format!(
                "duplicate order number {}",
                order.order_number
            )));
        }
        orders.insert(order.id, order);
        Ok(())
    }

    pub fn order(&self, id: Uuid) -> Result<Order> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("order", id))
    }

    pub fn with_order_mut<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Order) -> Result<T>,
    ) -> Result<T> {
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| CommerceError::not_found("order", id))?;
        f(order)
    }

    // -- returns ------------------------------------------------------------

    pub fn next_return_number(&self) -> String {
        let mut reserved = self
            .return_numbers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            let candidate = format!("RET-{:08}", rand::random::<u32>());
            if reserved.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Insert a return request, re-verifying under the returns write lock
    /// that each item's quantity still fits within the order item's remaining
    /// quantity (ordered minus quantities claimed by open or completed
    /// returns). Concurrent requests for the same order item serialize here.
    pub fn insert_return(&self, request: ReturnRequest, order: &Order) -> Result<()> {
        let mut returns = self.returns.write().unwrap_or_else(PoisonError::into_inner);
        for item in &request.items {
            let reserved: u32 = returns
                .values()
                .filter(|r| {
                    r.order_id == request.order_id
                        && !matches!(r.status, ReturnStatus::Rejected | ReturnStatus::Cancelled)
                })
                .map(|r| r.returned_quantity_for(item.order_item_id))
                .sum();
            let ordered = order.item(item.order_item_id).map_or(0, |i| i.quantity);
            if reserved.saturating_add(item.quantity) > ordered {
                return Err(CommerceError::Conflict(format!(
                    "return quantity for order item {} is no longer available",
                    item.order_item_id
                )));
            }
        }
        returns.insert(request.id, request);
        Ok(())
    }

    pub fn return_request(&self, id: Uuid) -> Result<ReturnRequest> {
        self.returns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("return request", id))
    }

    pub fn with_return_mut<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ReturnRequest) -> Result<T>,
    ) -> Result<T> {
        let mut returns = self.returns.write().unwrap_or_else(PoisonError::into_inner);
        let request = returns
            .get_mut(&id)
            .ok_or_else(|| CommerceError::not_found("return request", id))?;
        f(request)
    }

    pub fn returns_for_order(&self, order_id: Uuid) -> Vec<ReturnRequest> {
        self.returns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect()
    }

    // -- hot deals ----------------------------------------------------------

    fn deal_conflicts(deals: &HashMap<Uuid, HotDeal>, candidate: &HotDeal) -> bool {
        candidate.is_active
            && deals.values().any(|d| {
                d.id != candidate.id
                    && d.product_id == candidate.product_id
                    && d.is_active
                    && d.start_date <= candidate.end_date
                    && candidate.start_date <= d.end_date
            })
    }

    pub fn insert_deal(&self, deal: HotDeal) -> Result<()> {
        let mut deals = self.deals.write().unwrap_or_else(PoisonError::into_inner);
        if Self::deal_conflicts(&deals, &deal) {
            return Err(CommerceError::Conflict(format!(
                "product {} already has an active deal in that window",
                deal.product_id
            )));
        }
        deals.insert(deal.id, deal);
        Ok(())
    }

    /// Replace a deal; the one-active-deal-per-product invariant is
    /// re-checked on update, not just at creation.
    pub fn update_deal(&self, deal: HotDeal) -> Result<()> {
        let mut deals = self.deals.write().unwrap_or_else(PoisonError::into_inner);
        if !deals.contains_key(&deal.id) {
            return Err(CommerceError::not_found("hot deal", deal.id));
        }
        if Self::deal_conflicts(&deals, &deal) {
            return Err(CommerceError::Conflict(format!(
                "product {} already has an active deal in that window",
                deal.product_id
            )));
        }
        deals.insert(deal.id, deal);
        Ok(())
    }

    pub fn deal(&self, id: Uuid) -> Result<HotDeal> {
        self.deals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("hot deal", id))
    }

    pub fn deals(&self) -> Vec<HotDeal> {
        self.deals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Deal applying to new lines for a product right now, if any.
    pub fn active_deal_for(&self, product_id: Uuid, now: DateTime<Utc>) -> Option<HotDeal> {
        self.deals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|d| d.product_id == product_id && d.applies(now))
            .cloned()
    }

    pub fn with_deal_mut<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut HotDeal) -> Result<T>,
    ) -> Result<T> {
        let mut deals = self.deals.write().unwrap_or_else(PoisonError::into_inner);
        let deal = deals
            .get_mut(&id)
            .ok_or_else(|| CommerceError::not_found("hot deal", id))?;
        f(deal)
    }

    /// Deactivate deals whose window has closed. Row-independent.
    pub fn deactivate_expired_deals(&self, now: DateTime<Utc>) -> usize {
        let mut deals = self.deals.write().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        for deal in deals.values_mut() {
            if deal.is_active && deal.end_date < now {
                deal.deactivate();
                count += 1;
            }
        }
        count
    }

    // -- return policies ----------------------------------------------------

    pub fn insert_policy(&self, policy: ReturnPolicy) -> Result<()> {
        let mut policies = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        if policy.is_default
            && policy.is_active
            && policies
                .values()
                .any(|p| p.id != policy.id && p.is_default && p.is_active)
        {
            return Err(CommerceError::Conflict(
                "another active return policy is already marked default".into(),
            ));
        }
        policies.insert(policy.id, policy);
        Ok(())
    }

    pub fn default_policy(&self) -> Result<ReturnPolicy> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|p| p.is_default && p.is_active)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("return policy", "default"))
    }
}
