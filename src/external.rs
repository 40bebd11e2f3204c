//! External collaborator contracts
//!
//! The engine consumes the catalog, address book, shipping-rate table,
//! coupon resolver, and notification dispatcher through these narrow traits.
//! In-memory implementations back the default service wiring and tests; the
//! notifier has a NATS-backed implementation when a broker is configured.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::order::Address;
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::Money;
use crate::error::{CommerceError, Result};

/// Read-only product snapshot used for cart-line and order-item pricing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub image: Option<String>,
    pub price: Money,
    pub compare_at_price: Option<Money>,
    pub stock: i64,
    pub low_stock_threshold: Option<u32>,
    pub backorder_allowed: bool,
}

pub trait ProductCatalog: Send + Sync {
    fn get_product(&self, id: Uuid) -> Result<ProductSnapshot>;
}

/// Flat cost plus free-shipping threshold for one location type.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShippingRate {
    pub cost: Money,
    pub free_shipping_threshold: Money,
}

pub trait ShippingRates: Send + Sync {
    fn get_rate(&self, location_type: &str) -> Result<ShippingRate>;
}

/// Opaque coupon resolution: code + subtotal in, non-negative discount out.
pub trait CouponResolver: Send + Sync {
    fn resolve(&self, code: &str, order_subtotal: Money) -> Result<Money>;
}

pub trait AddressBook: Send + Sync {
    fn get_address(&self, id: Uuid) -> Result<Address>;
}

/// Fire-and-forget notification dispatch. Implementations must not block the
/// calling operation on delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: DomainEvent);
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<Uuid, ProductSnapshot>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, product: ProductSnapshot) {
        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product.id, product);
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn get_product(&self, id: Uuid) -> Result<ProductSnapshot> {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("product", id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryShippingRates {
    rates: RwLock<HashMap<String, ShippingRate>>,
}

impl InMemoryShippingRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rate(&self, location_type: impl Into<String>, rate: ShippingRate) {
        self.rates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location_type.into(), rate);
    }
}

impl ShippingRates for InMemoryShippingRates {
    fn get_rate(&self, location_type: &str) -> Result<ShippingRate> {
        self.rates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location_type)
            .copied()
            .ok_or_else(|| CommerceError::not_found("shipping rate", location_type))
    }
}

/// Flat-amount coupon with an optional minimum subtotal.
#[derive(Clone, Copy, Debug)]
pub struct CouponRule {
    pub discount: Money,
    pub min_subtotal: Money,
}

#[derive(Debug, Default)]
pub struct InMemoryCoupons {
    coupons: RwLock<HashMap<String, CouponRule>>,
}

impl InMemoryCoupons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_coupon(&self, code: impl Into<String>, rule: CouponRule) {
        self.coupons
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code.into(), rule);
    }
}

impl CouponResolver for InMemoryCoupons {
    fn resolve(&self, code: &str, order_subtotal: Money) -> Result<Money> {
        let rule = self
            .coupons
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .copied()
            .ok_or_else(|| CommerceError::ValidationFailed(format!("invalid coupon: {code}")))?;
        if order_subtotal < rule.min_subtotal {
            return Err(CommerceError::ValidationFailed(format!(
                "coupon {code} requires a subtotal of at least {}",
                rule.min_subtotal
            )));
        }
        Ok(rule.discount)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAddressBook {
    addresses: RwLock<HashMap<Uuid, Address>>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, id: Uuid, address: Address) {
        self.addresses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, address);
    }
}

impl AddressBook for InMemoryAddressBook {
    fn get_address(&self, id: Uuid) -> Result<Address> {
        self.addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("address", id))
    }
}

/// Logs events instead of dispatching them. Default when no broker is set.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: DomainEvent) {
        tracing::info!(subject = event.subject(), ?event, "domain event");
    }
}

/// Publishes events to NATS. The publish is spawned so the request path
/// never waits on the broker; a failed publish is logged and dropped.
pub struct NatsNotifier {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, subject_prefix: impl Into<String>) -> Self {
        Self { client, subject_prefix: subject_prefix.into() }
    }
}

impl Notifier for NatsNotifier {
    fn notify(&self, event: DomainEvent) {
        let subject = format!("{}.{}", self.subject_prefix, event.subject());
        let payload = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(%subject, error = %err, "failed to serialize event");
                return;
            }
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client.publish(subject.clone(), payload.into()).await {
                tracing::warn!(%subject, error = %err, "event publish failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coupon_minimum_subtotal() {
        let coupons = InMemoryCoupons::new();
        coupons.set_coupon(
            "SAVE5",
            CouponRule { discount: Money::from_major(5), min_subtotal: Money::from_major(25) },
        );
        assert!(coupons.resolve("SAVE5", Money::from_major(20)).is_err());
        assert_eq!(
            coupons.resolve("SAVE5", Money::from_major(30)).unwrap(),
            Money::from_major(5)
        );
        assert!(coupons.resolve("NOPE", Money::from_major(100)).is_err());
    }

    #[test]
    fn test_catalog_roundtrip() {
        let catalog = InMemoryCatalog::new();
        let id = Uuid::new_v4();
        catalog.upsert(ProductSnapshot {
            id,
            name: "Widget".into(),
            sku: "W1".into(),
            image: None,
            price: Money::from_major(10),
            compare_at_price: None,
            stock: 5,
            low_stock_threshold: None,
            backorder_allowed: false,
        });
        assert_eq!(catalog.get_product(id).unwrap().sku, "W1");
        assert!(catalog.get_product(Uuid::new_v4()).is_err());
    }
}
