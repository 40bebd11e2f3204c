//! Aggregates module
pub mod cart;
pub mod hot_deal;
pub mod order;
pub mod returns;

pub use cart::{Cart, CartLine, CartOwner, CartTotals, CartType};
pub use hot_deal::{DiscountType, HotDeal};
pub use order::{
    Actor, Address, HistoryAction, HistoryEntry, Order, OrderIdentity, OrderItem, OrderSource,
    OrderStatus, PaymentStatus,
};
pub use returns::{
    RefundMethod, ReturnItem, ReturnPolicy, ReturnReason, ReturnRequest, ReturnShippingPayer,
    ReturnStatus,
};
