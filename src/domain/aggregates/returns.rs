//! Return request aggregate and return policy
//!
//! Return requests are created only against shipped/delivered orders inside
//! the policy window, and move through their own state machine with the same
//! validate-then-append-history discipline as orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::aggregates::order::{Actor, HistoryAction, HistoryEntry};
use crate::domain::value_objects::Money;
use crate::error::{CommerceError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnReason {
    Defective,
    WrongItem,
    NotAsDescribed,
    DamagedInTransit,
    ChangedMind,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundMethod {
    OriginalPayment,
    StoreCredit,
    Exchange,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    #[default]
    Requested,
    Approved,
    Rejected,
    Cancelled,
    LabelGenerated,
    InTransit,
    Received,
    Inspecting,
    RefundProcessing,
    ExchangeInitiated,
    Refunded,
    Completed,
}

impl ReturnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Completed)
    }

    pub fn can_transition(self, to: ReturnStatus) -> bool {
        use ReturnStatus::*;
        matches!(
            (self, to),
            (Requested, Approved | Rejected | Cancelled)
                | (Approved, LabelGenerated | Cancelled)
                | (LabelGenerated, InTransit)
                | (InTransit, Received)
                | (Received, Inspecting)
                | (Inspecting, RefundProcessing | ExchangeInitiated | Rejected)
                | (RefundProcessing, Refunded)
                | (ExchangeInitiated, Completed)
                | (Refunded, Completed)
        )
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "REQUESTED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::LabelGenerated => "LABEL_GENERATED",
            Self::InTransit => "IN_TRANSIT",
            Self::Received => "RECEIVED",
            Self::Inspecting => "INSPECTING",
            Self::RefundProcessing => "REFUND_PROCESSING",
            Self::ExchangeInitiated => "EXCHANGE_INITIATED",
            Self::Refunded => "REFUNDED",
            Self::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// One returned line, referencing the originating order item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReturnItem {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price: Money,
    /// Gross refund for this line (unit price x quantity), before fees.
    pub refund_amount: Money,
    /// Set during inspection.
    pub condition: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub id: Uuid,
    pub return_number: String,
    pub order_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub reason: ReturnReason,
    pub status: ReturnStatus,
    pub refund_method: RefundMethod,
    pub items: Vec<ReturnItem>,
    /// Sum of gross line refunds.
    pub total_amount: Money,
    pub restocking_fee: Money,
    pub return_shipping_cost: Money,
    /// Net amount to refund: total - restocking fee - return shipping.
    pub refund_amount: Money,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReturnRequest {
    pub fn change_status(&mut self, to: ReturnStatus, actor: Actor) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(CommerceError::illegal_transition("return", self.status, to));
        }
        let old = self.status;
        self.status = to;
        self.history.push(HistoryEntry::new(
            HistoryAction::StatusChanged,
            Some(old.to_string()),
            Some(to.to_string()),
            actor,
        ));
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn returned_quantity_for(&self, order_item_id: Uuid) -> u32 {
        self.items
            .iter()
            .filter(|i| i.order_item_id == order_item_id)
            .map(|i| i.quantity)
            .sum()
    }
}

/// Who pays for shipping the items back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnShippingPayer {
    Customer,
    Merchant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReturnPolicy {
    pub id: Uuid,
    pub name: String,
    pub return_window_days: i64,
    pub refund_window_days: i64,
    /// Orders at or above this subtotal return free of fees.
    pub free_return_threshold: Money,
    pub restocking_fee_percent: Decimal,
    pub return_shipping_payer: ReturnShippingPayer,
    pub return_shipping_cost: Money,
    pub rma_required: bool,
    pub partial_returns_allowed: bool,
    pub original_packaging_required: bool,
    pub is_active: bool,
    pub is_default: bool,
}

impl ReturnPolicy {
    /// A sensible 30-day policy used when no policy has been configured.
    pub fn standard() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "Standard".into(),
            return_window_days: 30,
            refund_window_days: 14,
            free_return_threshold: Money::from_major(100),
            restocking_fee_percent: Decimal::new(10, 0),
            return_shipping_payer: ReturnShippingPayer::Customer,
            return_shipping_cost: Money::from_major(5),
            rma_required: false,
            partial_returns_allowed: true,
            original_packaging_required: false,
            is_active: true,
            is_default: true,
        }
    }
}
