//! Domain events
//!
//! Published fire-and-forget to the notification dispatcher after order and
//! return mutations. The engine never blocks on delivery.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::order::{OrderStatus, PaymentStatus};
use crate::domain::aggregates::returns::ReturnStatus;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Return(ReturnEvent),
    Inventory(InventoryEvent),
}

impl DomainEvent {
    /// NATS subject suffix for routing.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Created { .. }) => "orders.created",
            Self::Order(OrderEvent::StatusChanged { .. }) => "orders.status",
            Self::Order(OrderEvent::PaymentStatusChanged { .. }) => "orders.payment",
            Self::Return(ReturnEvent::Requested { .. }) => "returns.requested",
            Self::Return(ReturnEvent::StatusChanged { .. }) => "returns.status",
            Self::Return(ReturnEvent::RefundProcessed { .. }) => "returns.refunded",
            Self::Inventory(InventoryEvent::LowStock { .. }) => "inventory.low_stock",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: String, final_amount: Money },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    PaymentStatusChanged { order_id: Uuid, from: PaymentStatus, to: PaymentStatus },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReturnEvent {
    Requested { return_id: Uuid, order_id: Uuid, refund_amount: Money },
    StatusChanged { return_id: Uuid, from: ReturnStatus, to: ReturnStatus },
    RefundProcessed { return_id: Uuid, order_id: Uuid, refund_amount: Money },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InventoryEvent {
    LowStock { product_id: Uuid, stock: i64 },
}
