//! Return engine
//!
//! Computes return eligibility against a completed order, drives the return
//! state machine, and on refund pushes stock back through the inventory
//! ledger and the refunded amount onto the order's payment status.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::aggregates::order::{
    Actor, HistoryAction, OrderIdentity, OrderStatus, PaymentStatus,
};
use crate::domain::aggregates::returns::{
    RefundMethod, ReturnItem, ReturnPolicy, ReturnReason, ReturnRequest, ReturnShippingPayer,
    ReturnStatus,
};
use crate::domain::events::{DomainEvent, ReturnEvent};
use crate::domain::value_objects::Money;
use crate::error::{CommerceError, Result};
use crate::external::Notifier;
use crate::inventory::InventoryLedger;
use crate::store::Store;

const ORDER_NOT_RETURNABLE: &str = "Order not eligible for return";
const WINDOW_EXPIRED: &str = "Return window expired";

/// Order-level and per-item return eligibility.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<String>,
    pub items: Vec<ItemEligibility>,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct ItemEligibility {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub ordered_quantity: u32,
    /// Ordered quantity minus quantities in open or completed returns.
    pub remaining_quantity: u32,
    pub eligible: bool,
}

#[derive(Clone, Debug)]
pub struct NewReturn {
    pub order_id: Uuid,
    /// (order item id, quantity to return)
    pub items: Vec<(Uuid, u32)>,
    pub reason: ReturnReason,
    pub refund_method: RefundMethod,
    pub actor: Actor,
}

pub struct ReturnEngine {
    store: Arc<Store>,
    ledger: Arc<InventoryLedger>,
    notifier: Arc<dyn Notifier>,
}

impl ReturnEngine {
    pub fn new(store: Arc<Store>, ledger: Arc<InventoryLedger>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, ledger, notifier }
    }

    pub fn return_request(&self, id: Uuid) -> Result<ReturnRequest> {
        self.store.return_request(id)
    }

    /// The configured default policy, or the standard policy when none has
    /// been set up.
    pub fn policy(&self) -> ReturnPolicy {
        self.store.default_policy().unwrap_or_else(|_| ReturnPolicy::standard())
    }

    /// Eligible only while the order is SHIPPED or DELIVERED and inside the
    /// policy window. An item can never be more eligible than its order.
    pub fn compute_eligibility(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<Eligibility> {
        let order = self.store.order(order_id)?;
        let policy = self.policy();

        let order_reason = if !matches!(order.status, OrderStatus::Delivered | OrderStatus::Shipped)
        {
            Some(ORDER_NOT_RETURNABLE.to_string())
        } else if now > order.created_at + Duration::days(policy.return_window_days) {
            Some(WINDOW_EXPIRED.to_string())
        } else {
            None
        };
        let order_eligible = order_reason.is_none();

        let items = order
            .items
            .iter()
            .map(|item| {
                let already = self.reserved_quantity(order_id, item.id);
                let remaining = item.quantity.saturating_sub(already);
                ItemEligibility {
                    order_item_id: item.id,
                    product_id: item.product_id,
                    ordered_quantity: item.quantity,
                    remaining_quantity: remaining,
                    eligible: order_eligible && remaining > 0,
                }
            })
            .collect();

        Ok(Eligibility { eligible: order_eligible, reason: order_reason, items })
    }

    pub fn create_return_request(&self, new_return: NewReturn) -> Result<ReturnRequest> {
        let now = Utc::now();
        let eligibility = self.compute_eligibility(new_return.order_id, now)?;
        if !eligibility.eligible {
            return Err(CommerceError::PolicyViolation(
                eligibility.reason.unwrap_or_else(|| ORDER_NOT_RETURNABLE.to_string()),
            ));
        }
        if new_return.items.is_empty() {
            return Err(CommerceError::ValidationFailed("no items to return".into()));
        }

        let order = self.store.order(new_return.order_id)?;
        let policy = self.policy();

        if !policy.partial_returns_allowed {
            let full_return = eligibility.items.iter().all(|item| {
                new_return
                    .items
                    .iter()
                    .any(|(id, qty)| *id == item.order_item_id && *qty == item.remaining_quantity)
            });
            if !full_return {
                return Err(CommerceError::PolicyViolation(
                    "policy does not allow partial returns".into(),
                ));
            }
        }

        let mut items = Vec::with_capacity(new_return.items.len());
        for (order_item_id, quantity) in &new_return.items {
            if *quantity == 0 {
                return Err(CommerceError::ValidationFailed(
                    "return quantity must be positive".into(),
                ));
            }
            let order_item = order
                .item(*order_item_id)
                .ok_or_else(|| CommerceError::not_found("order item", order_item_id))?;
            let remaining = eligibility
                .items
                .iter()
                .find(|e| e.order_item_id == *order_item_id)
                .map(|e| e.remaining_quantity)
                .unwrap_or(0);
            if *quantity > remaining {
                return Err(CommerceError::ValidationFailed(format!(
                    "cannot return {} of {} ({} remaining)",
                    quantity, order_item.name, remaining
                )));
            }
            items.push(ReturnItem {
                order_item_id: *order_item_id,
                product_id: order_item.product_id,
                quantity: *quantity,
                unit_price: order_item.unit_price,
                refund_amount: order_item.unit_price.mul_qty(*quantity).round2(),
                condition: None,
                notes: None,
            });
        }

        let total_amount = items
            .iter()
            .fold(Money::ZERO, |acc, i| acc.add(i.refund_amount))
            .round2();
        let fee_free = order.total_amount >= policy.free_return_threshold;
        let restocking_fee = if fee_free {
            Money::ZERO
        } else {
            Money::new(
                total_amount.amount() * policy.restocking_fee_percent / Decimal::ONE_HUNDRED,
            )
            .round2()
        };
        let return_shipping_cost = if !fee_free
            && policy.return_shipping_payer == ReturnShippingPayer::Customer
        {
            policy.return_shipping_cost
        } else {
            Money::ZERO
        };
        let refund_amount = total_amount.sub_floor(restocking_fee.add(return_shipping_cost));

        let customer_id = match &order.identity {
            OrderIdentity::Customer { customer_id } => Some(*customer_id),
            OrderIdentity::Guest { .. } => None,
        };
        let mut request = ReturnRequest {
            id: Uuid::new_v4(),
            return_number: self.store.next_return_number(),
            order_id: order.id,
            customer_id,
            reason: new_return.reason,
            status: ReturnStatus::Requested,
            refund_method: new_return.refund_method,
            items,
            total_amount,
            restocking_fee,
            return_shipping_cost,
            refund_amount,
            history: vec![],
            created_at: now,
            updated_at: now,
        };
        request.history.push(crate::domain::aggregates::order::HistoryEntry::new(
            HistoryAction::StatusChanged,
            None,
            Some(ReturnStatus::Requested.to_string()),
            new_return.actor,
        ));

        self.store.insert_return(request.clone(), &order)?;
        tracing::info!(
            return_number = %request.return_number,
            refund = %request.refund_amount,
            "return requested"
        );
        self.notifier.notify(DomainEvent::Return(ReturnEvent::Requested {
            return_id: request.id,
            order_id: order.id,
            refund_amount: request.refund_amount,
        }));
        Ok(request)
    }

    pub fn change_status(
        &self,
        return_id: Uuid,
        to: ReturnStatus,
        actor: Actor,
    ) -> Result<ReturnRequest> {
        let (from, request) = self.store.with_return_mut(return_id, |request| {
            let from = request.status;
            request.change_status(to, actor)?;
            Ok((from, request.clone()))
        })?;
        self.notifier.notify(DomainEvent::Return(ReturnEvent::StatusChanged {
            return_id,
            from,
            to,
        }));
        Ok(request)
    }

    pub fn approve(&self, return_id: Uuid, actor: Actor) -> Result<ReturnRequest> {
        self.change_status(return_id, ReturnStatus::Approved, actor)
    }

    pub fn reject(&self, return_id: Uuid, actor: Actor) -> Result<ReturnRequest> {
        self.change_status(return_id, ReturnStatus::Rejected, actor)
    }

    pub fn cancel(&self, return_id: Uuid, actor: Actor) -> Result<ReturnRequest> {
        self.change_status(return_id, ReturnStatus::Cancelled, actor)
    }

    /// REFUND_PROCESSING -> REFUNDED: stock goes back per returned quantity,
    /// and the order's payment status becomes PARTIALLY_REFUNDED or REFUNDED
    /// depending on whether cumulative refunds cover the final amount.
    pub fn process_refund(&self, return_id: Uuid, actor: Actor) -> Result<ReturnRequest> {
        let request = self.store.return_request(return_id)?;
        if request.status != ReturnStatus::RefundProcessing {
            return Err(CommerceError::illegal_transition(
                "return",
                request.status,
                ReturnStatus::Refunded,
            ));
        }
        let order = self.store.order(request.order_id)?;

        let refunded_so_far = self
            .store
            .returns_for_order(order.id)
            .iter()
            .filter(|r| {
                r.id != request.id
                    && matches!(r.status, ReturnStatus::Refunded | ReturnStatus::Completed)
            })
            .fold(Money::ZERO, |acc, r| acc.add(r.refund_amount));
        let cumulative = refunded_so_far.add(request.refund_amount);
        let target = if cumulative >= order.final_amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        // Fail before any side effect if the order's payment state cannot
        // accept the refund.
        if !order.payment_status.can_transition(target) {
            return Err(CommerceError::illegal_transition(
                "payment",
                order.payment_status,
                target,
            ));
        }

        // The status is re-validated under the returns write lock, and the
        // ledger releases happen inside that same guarded mutation as the
        // REFUNDED write: a concurrent refund of the same return fails the
        // status check before any stock moves.
        let ledger = Arc::clone(&self.ledger);
        let request = self.store.with_return_mut(return_id, |request| {
            if request.status != ReturnStatus::RefundProcessing {
                return Err(CommerceError::illegal_transition(
                    "return",
                    request.status,
                    ReturnStatus::Refunded,
                ));
            }
            for item in &request.items {
                ledger.release(item.product_id, item.quantity)?;
            }
            request.change_status(ReturnStatus::Refunded, actor)?;
            Ok(request.clone())
        })?;
        self.store.with_order_mut(order.id, |order| {
            order.change_payment_status(target, actor)?;
            order.push_history(
                HistoryAction::RefundProcessed,
                None,
                Some(request.refund_amount.to_string()),
                actor,
            );
            Ok(())
        })?;

        tracing::info!(
            return_number = %request.return_number,
            refund = %request.refund_amount,
            payment_status = %target,
            "refund processed"
        );
        self.notifier.notify(DomainEvent::Return(ReturnEvent::RefundProcessed {
            return_id,
            order_id: order.id,
            refund_amount: request.refund_amount,
        }));
        Ok(request)
    }

    /// Quantity of an order item tied up in open or completed returns.
    /// Rejected and cancelled requests release their claim.
    fn reserved_quantity(&self, order_id: Uuid, order_item_id: Uuid) -> u32 {
        self.store
            .returns_for_order(order_id)
            .iter()
            .filter(|r| !matches!(r.status, ReturnStatus::Rejected | ReturnStatus::Cancelled))
            .map(|r| r.returned_quantity_for(order_item_id))
            .sum()
    }
}
