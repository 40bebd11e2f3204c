//! Order engine
//!
//! Turns a priced cart (or a direct item list for admin/guest/manual flows)
//! into an order: stock is checked and committed per line all-or-nothing, the
//! monetary snapshot is computed once at creation, and every later mutation
//! goes through the status state machines with an audit history entry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::aggregates::order::{
    Actor, Address, HistoryAction, Order, OrderIdentity, OrderItem, OrderSource, OrderStatus,
    PaymentStatus,
};
use crate::domain::aggregates::returns::ReturnStatus;
use crate::domain::events::{DomainEvent, InventoryEvent, OrderEvent};
use crate::domain::value_objects::Money;
use crate::error::{CommerceError, Result};
use crate::external::{AddressBook, CouponResolver, Notifier, ProductCatalog, ShippingRates};
use crate::inventory::InventoryLedger;
use crate::pricing;
use crate::store::Store;

#[derive(Clone, Debug)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

/// Source of the order's lines.
#[derive(Clone, Debug)]
pub enum OrderLines {
    /// Checkout of an existing cart; the cart is deactivated on success.
    Cart(Uuid),
    /// Direct item list (admin panel, phone, POS, API).
    Items(Vec<NewOrderLine>),
}

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub identity: OrderIdentity,
    pub source: OrderSource,
    pub lines: OrderLines,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Option<Uuid>,
    pub use_shipping_as_billing: Option<bool>,
    pub coupon_code: Option<String>,
    /// Computed by the external tax collaborator; zero when untaxed.
    pub tax_amount: Money,
    pub vendor_id: Option<Uuid>,
    pub processed_by: Option<Uuid>,
    pub actor: Actor,
}

pub struct OrderEngine {
    store: Arc<Store>,
    ledger: Arc<InventoryLedger>,
    catalog: Arc<dyn ProductCatalog>,
    rates: Arc<dyn ShippingRates>,
    coupons: Arc<dyn CouponResolver>,
    addresses: Arc<dyn AddressBook>,
    notifier: Arc<dyn Notifier>,
}

impl OrderEngine {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<InventoryLedger>,
        catalog: Arc<dyn ProductCatalog>,
        rates: Arc<dyn ShippingRates>,
        coupons: Arc<dyn CouponResolver>,
        addresses: Arc<dyn AddressBook>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { store, ledger, catalog, rates, coupons, addresses, notifier }
    }

    pub fn order(&self, id: Uuid) -> Result<Order> {
        self.store.order(id)
    }

    pub fn create_order(&self, new_order: NewOrder) -> Result<Order> {
        let (items, deal_sales, source_cart) = self.resolve_lines(&new_order.lines)?;
        if items.is_empty() {
            return Err(CommerceError::ValidationFailed("order has no items".into()));
        }
        if new_order.processed_by.is_none()
            && matches!(new_order.source, OrderSource::AdminPanel | OrderSource::Phone)
        {
            return Err(CommerceError::ValidationFailed(
                "admin/manual orders must record who processed them".into(),
            ));
        }

        // Pre-check availability so checkout failures can name every
        // offending line, not just the first.
        let mut unavailable = Vec::new();
        for item in &items {
            let ok = self
                .ledger
                .check_availability(item.product_id, item.quantity)
                .unwrap_or(false);
            if !ok {
                unavailable.push(format!("{} (x{})", item.name, item.quantity));
            }
        }
        if !unavailable.is_empty() {
            return Err(CommerceError::ValidationFailed(format!(
                "unavailable lines: {}",
                unavailable.join(", ")
            )));
        }

        // Monetary snapshot.
        let total_amount = items
            .iter()
            .fold(Money::ZERO, |acc, i| acc.add(i.subtotal()))
            .round2();
        let discount_amount = items
            .iter()
            .fold(Money::ZERO, |acc, i| acc.add(i.discount()))
            .round2();
        let shipping_address = self.addresses.get_address(new_order.shipping_address_id)?;
        let billing_address = self.resolve_billing(&new_order, &shipping_address)?;
        let rate = self.rates.get_rate(&shipping_address.location_type)?;
        let shipping_amount = pricing::shipping_quote(&rate, total_amount).cost;
        let coupon_discount = match &new_order.coupon_code {
            Some(code) => self.coupons.resolve(code, total_amount)?,
            None => Money::ZERO,
        };
        let final_amount = pricing::rollup_order_total(
            items.iter().map(OrderItem::subtotal),
            shipping_amount,
            new_order.tax_amount,
            discount_amount,
            coupon_discount,
        );

        // Stock commit: all lines or none.
        let commits: Vec<(Uuid, u32)> =
            items.iter().map(|i| (i.product_id, i.quantity)).collect();
        self.ledger.commit_all(&commits)?;

        let order_number = self.store.next_order_number();
        let now = Utc::now();
        let mut order = Order {
            id: Uuid::new_v4(),
            order_number: order_number.clone(),
            identity: new_order.identity,
            vendor_id: new_order.vendor_id,
            processed_by: new_order.processed_by,
            source: new_order.source,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            items,
            shipping_amount,
            tax_amount: new_order.tax_amount,
            discount_amount,
            coupon_discount,
            total_amount,
            final_amount,
            shipping_address,
            billing_address,
            history: vec![],
            created_at: now,
            updated_at: now,
        };
        order.push_history(
            HistoryAction::OrderCreated,
            None,
            Some(order_number.clone()),
            new_order.actor,
        );

        if let Err(err) = self.store.insert_order(order.clone()) {
            // Undo the stock commit; the order never existed.
            for (product_id, quantity) in &commits {
                if let Err(release_err) = self.ledger.release(*product_id, *quantity) {
                    tracing::error!(%product_id, error = %release_err, "rollback release failed");
                }
            }
            return Err(err);
        }

        // Post-insert effects: deactivate the source cart, count deal sales,
        // fire notifications.
        if let Some(cart_id) = source_cart {
            let deactivated = self.store.with_cart_mut(cart_id, |cart| {
                cart.active = false;
                Ok(())
            });
            if let Err(err) = deactivated {
                tracing::warn!(%cart_id, error = %err, "failed to deactivate checked-out cart");
            }
        }
        for (deal_id, quantity) in deal_sales {
            let recorded = self.store.with_deal_mut(deal_id, |deal| {
                deal.record_sale(quantity);
                Ok(())
            });
            if let Err(err) = recorded {
                tracing::warn!(%deal_id, error = %err, "failed to record deal sale");
            }
        }
        for (product_id, _) in &commits {
            if self.ledger.is_low_stock(*product_id).unwrap_or(false) {
                let stock = self.ledger.stock(*product_id).unwrap_or(0);
                self.notifier.notify(DomainEvent::Inventory(InventoryEvent::LowStock {
                    product_id: *product_id,
                    stock,
                }));
            }
        }

        tracing::info!(order_number, final_amount = %order.final_amount, "order created");
        self.notifier.notify(DomainEvent::Order(OrderEvent::Created {
            order_id: order.id,
            order_number,
            final_amount: order.final_amount,
        }));
        Ok(order)
    }

    /// Validate against the transition table, append history, and on
    /// cancellation release every committed, not-yet-returned quantity in
    /// the same store mutation as the status write.
    pub fn change_status(&self, order_id: Uuid, to: OrderStatus, actor: Actor) -> Result<Order> {
        let returned = self.returned_quantities(order_id);
        let ledger = Arc::clone(&self.ledger);
        let (from, order) = self.store.with_order_mut(order_id, |order| {
            if !order.status.can_transition(to) {
                return Err(CommerceError::illegal_transition("order", order.status, to));
            }
            if to == OrderStatus::Cancelled {
                // Release before the status write so a ledger failure leaves
                // the order un-cancelled rather than cancelled-but-committed.
                for item in &order.items {
                    let already = returned.get(&item.id).copied().unwrap_or(0);
                    let remaining = item.quantity.saturating_sub(already);
                    if remaining > 0 {
                        ledger.release(item.product_id, remaining)?;
                    }
                }
            }
            let from = order.status;
            order.change_status(to, actor)?;
            Ok((from, order.clone()))
        })?;
        tracing::info!(order_number = %order.order_number, %from, %to, "order status changed");
        self.notifier.notify(DomainEvent::Order(OrderEvent::StatusChanged {
            order_id,
            from,
            to,
        }));
        Ok(order)
    }

    pub fn change_payment_status(
        &self,
        order_id: Uuid,
        to: PaymentStatus,
        actor: Actor,
    ) -> Result<Order> {
        let (from, order) = self.store.with_order_mut(order_id, |order| {
            let from = order.payment_status;
            order.change_payment_status(to, actor)?;
            Ok((from, order.clone()))
        })?;
        self.notifier.notify(DomainEvent::Order(OrderEvent::PaymentStatusChanged {
            order_id,
            from,
            to,
        }));
        Ok(order)
    }

    /// Distinct retry action for FAILED payments.
    pub fn retry_payment(&self, order_id: Uuid, actor: Actor) -> Result<Order> {
        let order = self.store.with_order_mut(order_id, |order| {
            order.retry_payment(actor)?;
            Ok(order.clone())
        })?;
        self.notifier.notify(DomainEvent::Order(OrderEvent::PaymentStatusChanged {
            order_id,
            from: PaymentStatus::Failed,
            to: PaymentStatus::Pending,
        }));
        Ok(order)
    }

    pub fn add_note(&self, order_id: Uuid, note: &str, actor: Actor) -> Result<Order> {
        self.store.with_order_mut(order_id, |order| {
            order.add_note(note, actor);
            Ok(order.clone())
        })
    }

    /// Quantities already returned (refunded or completed returns) per order
    /// item, used to avoid double-releasing stock on cancellation.
    fn returned_quantities(&self, order_id: Uuid) -> HashMap<Uuid, u32> {
        let mut returned: HashMap<Uuid, u32> = HashMap::new();
        for request in self.store.returns_for_order(order_id) {
            if !matches!(request.status, ReturnStatus::Refunded | ReturnStatus::Completed) {
                continue;
            }
            for item in &request.items {
                *returned.entry(item.order_item_id).or_default() += item.quantity;
            }
        }
        returned
    }

    fn resolve_billing(&self, new_order: &NewOrder, shipping: &Address) -> Result<Address> {
        match (new_order.billing_address_id, new_order.use_shipping_as_billing) {
            // The explicit flag wins over a supplied billing address id.
            (_, Some(true)) => Ok(shipping.clone()),
            (Some(id), _) => self.addresses.get_address(id),
            (None, Some(false)) => Err(CommerceError::ValidationFailed(
                "billing address required when not using shipping address".into(),
            )),
            (None, None) => Ok(shipping.clone()),
        }
    }

    /// Resolve order lines to item snapshots. Cart checkout reuses the
    /// cart's price snapshots; direct item lists snapshot the catalog (and
    /// any applicable hot deal) at creation time.
    fn resolve_lines(
        &self,
        lines: &OrderLines,
    ) -> Result<(Vec<OrderItem>, Vec<(Uuid, u32)>, Option<Uuid>)> {
        match lines {
            OrderLines::Cart(cart_id) => {
                let cart = self.store.cart(*cart_id)?;
                if !cart.active {
                    return Err(CommerceError::ValidationFailed(
                        "cart has already been checked out".into(),
                    ));
                }
                let items = cart
                    .lines
                    .iter()
                    .map(|line| OrderItem {
                        id: Uuid::new_v4(),
                        product_id: line.product_id,
                        name: line.name.clone(),
                        sku: line.sku.clone(),
                        image: line.image.clone(),
                        quantity: line.quantity,
                        unit_price: line.unit_price,
                        compare_at_price: line.compare_at_price,
                    })
                    .collect();
                let deal_sales = cart
                    .lines
                    .iter()
                    .filter_map(|line| line.deal_id.map(|deal| (deal, line.quantity)))
                    .collect();
                Ok((items, deal_sales, Some(cart.id)))
            }
            OrderLines::Items(requested) => {
                let now = Utc::now();
                let mut items = Vec::with_capacity(requested.len());
                let mut deal_sales = Vec::new();
                for line in requested {
                    if line.quantity == 0 {
                        return Err(CommerceError::ValidationFailed(
                            "line quantity must be positive".into(),
                        ));
                    }
                    let product = self.catalog.get_product(line.product_id)?;
                    let (unit_price, compare_at_price) =
                        match self.store.active_deal_for(line.product_id, now) {
                            Some(deal) => {
                                deal_sales.push((deal.id, line.quantity));
                                let deal_price = pricing::apply_hot_deal(
                                    product.price,
                                    deal.discount_type,
                                    deal.discount_value,
                                );
                                (deal_price, Some(product.price))
                            }
                            None => (product.price, product.compare_at_price),
                        };
                    items.push(OrderItem {
                        id: Uuid::new_v4(),
                        product_id: line.product_id,
                        name: product.name,
                        sku: product.sku,
                        image: product.image,
                        quantity: line.quantity,
                        unit_price,
                        compare_at_price,
                    });
                }
                Ok((items, deal_sales, None))
            }
        }
    }
}
