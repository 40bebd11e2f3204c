//! Order aggregate
//!
//! Orders are append-only: once created they are never deleted, and every
//! status or payment-status move goes through the transition tables below and
//! leaves a history entry behind. Order items are immutable snapshots of the
//! product at order time so later catalog edits never rewrite history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::value_objects::Money;
use crate::error::{CommerceError, Result};

/// Address snapshot copied into the order at creation time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub street1: String,
    pub street2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub zip: String,
    pub country: String,
    pub phone: Option<String>,
    /// Shipping-rate location key ("inside_city", "international", ...).
    pub location_type: String,
}

/// Who the order belongs to. Guest orders capture identity inline instead of
/// referencing a customer record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderIdentity {
    Customer { customer_id: Uuid },
    Guest { name: String, email: String },
}

/// Where the order came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSource {
    Webstore,
    Phone,
    AdminPanel,
    Pos,
    Marketplace,
    Api,
}

/// Explicit caller identity supplied to every mutating operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    Customer(Uuid),
    Staff(Uuid),
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer(id) => write!(f, "customer:{id}"),
            Self::Staff(id) => write!(f, "staff:{id}"),
            Self::System => write!(f, "system"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    OnHold,
    Cancelled,
    Refunded,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded | Self::Failed | Self::Delivered)
    }

    /// Transition table. Anything not listed is illegal.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed | Cancelled | OnHold | Failed)
                | (Confirmed, Processing | Cancelled | OnHold)
                | (Processing, Shipped | Cancelled | OnHold)
                | (Shipped, Delivered | Refunded)
                // ON_HOLD resumes to any of PENDING's targets.
                | (OnHold, Confirmed | Cancelled | OnHold | Failed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::OnHold => "ON_HOLD",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Paid,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    /// FAILED is terminal here; going back to PENDING is the distinct
    /// retry-payment action, not a bare transition.
    pub fn can_transition(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Pending, Processing | Failed | Cancelled)
                | (Processing, Paid | Failed)
                | (Paid, Refunded | PartiallyRefunded)
                | (PartiallyRefunded, Refunded | PartiallyRefunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
            Self::PartiallyRefunded => "PARTIALLY_REFUNDED",
        };
        f.write_str(s)
    }
}

/// Immutable snapshot of a product line at order time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub sku: String,
    pub image: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub compare_at_price: Option<Money>,
}

impl OrderItem {
    pub fn subtotal(&self) -> Money { self.unit_price.mul_qty(self.quantity) }

    pub fn discount(&self) -> Money {
        crate::pricing::price_line(self.unit_price, self.compare_at_price, self.quantity).1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    OrderCreated,
    StatusChanged,
    PaymentStatusChanged,
    NoteAdded,
    RefundProcessed,
    ItemAdded,
    ItemRemoved,
    AddressUpdated,
    ShippingUpdated,
}

/// Append-only audit entry. Never mutated or deleted once written.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        action: HistoryAction,
        old_value: Option<String>,
        new_value: Option<String>,
        actor: Actor,
    ) -> Self {
        Self { action, old_value, new_value, actor, at: Utc::now() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub identity: OrderIdentity,
    pub vendor_id: Option<Uuid>,
    /// Staff member who keyed in an admin/manual order.
    pub processed_by: Option<Uuid>,
    pub source: OrderSource,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItem>,
    pub shipping_amount: Money,
    pub tax_amount: Money,
    pub discount_amount: Money,
    pub coupon_discount: Money,
    /// Sum of item subtotals.
    pub total_amount: Money,
    /// total + shipping + tax - discount - coupon, floored at zero.
    pub final_amount: Money,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn change_status(&mut self, to: OrderStatus, actor: Actor) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(CommerceError::illegal_transition("order", self.status, to));
        }
        let old = self.status;
        self.status = to;
        self.push_history(
            HistoryAction::StatusChanged,
            Some(old.to_string()),
            Some(to.to_string()),
            actor,
        );
        Ok(())
    }

    pub fn change_payment_status(&mut self, to: PaymentStatus, actor: Actor) -> Result<()> {
        if !self.payment_status.can_transition(to) {
            return Err(CommerceError::illegal_transition("payment", self.payment_status, to));
        }
        let old = self.payment_status;
        self.payment_status = to;
        self.push_history(
            HistoryAction::PaymentStatusChanged,
            Some(old.to_string()),
            Some(to.to_string()),
            actor,
        );
        Ok(())
    }

    /// Distinct retry action: FAILED payments may be re-attempted, returning
    /// the payment to PENDING.
    pub fn retry_payment(&mut self, actor: Actor) -> Result<()> {
        if self.payment_status != PaymentStatus::Failed {
            return Err(CommerceError::illegal_transition(
                "payment",
                self.payment_status,
                PaymentStatus::Pending,
            ));
        }
        self.payment_status = PaymentStatus::Pending;
        self.push_history(
            HistoryAction::PaymentStatusChanged,
            Some(PaymentStatus::Failed.to_string()),
            Some(PaymentStatus::Pending.to_string()),
            actor,
        );
        Ok(())
    }

    pub fn add_note(&mut self, note: impl Into<String>, actor: Actor) {
        self.push_history(HistoryAction::NoteAdded, None, Some(note.into()), actor);
    }

    pub fn push_history(
        &mut self,
        action: HistoryAction,
        old_value: Option<String>,
        new_value: Option<String>,
        actor: Actor,
    ) {
        self.history.push(HistoryEntry::new(action, old_value, new_value, actor));
        self.updated_at = Utc::now();
    }
}
