//! Commerce transaction engine
//!
//! Turns a shopping cart into a priced, stock-checked, stateful order and
//! supports partial returns/refunds against it.
//!
//! ## Components
//! - Pricing: pure line/deal/rollup/shipping computations
//! - Inventory ledger: serialized per-product stock commit/release
//! - Cart service: owner-scoped carts with snapshot pricing and merge
//! - Order engine: creation, status/payment state machines, audit history
//! - Return engine: eligibility, return state machine, refunds

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod external;
pub mod inventory;
pub mod pricing;
pub mod store;
pub mod sweep;

pub use error::{CommerceError, Result};
