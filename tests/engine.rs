//! End-to-end engine tests: cart -> order -> return flows against the
//! in-memory store, ledger, and collaborator implementations.

use std::sync::{Arc, Barrier};

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use commerce_engine::domain::aggregates::cart::{CartOwner, CartType};
use commerce_engine::domain::aggregates::hot_deal::{DiscountType, HotDeal};
use commerce_engine::domain::aggregates::order::{
    Actor, Address, HistoryAction, OrderIdentity, OrderSource, OrderStatus, PaymentStatus,
};
use commerce_engine::domain::aggregates::returns::{RefundMethod, ReturnReason, ReturnStatus};
use commerce_engine::domain::value_objects::Money;
use commerce_engine::engine::{
    CartService, NewOrder, NewOrderLine, NewReturn, OrderEngine, OrderLines, ReturnEngine,
};
use commerce_engine::error::CommerceError;
use commerce_engine::external::{
    CouponRule, InMemoryAddressBook, InMemoryCatalog, InMemoryCoupons, InMemoryShippingRates,
    LogNotifier, Notifier, ProductSnapshot, ShippingRate,
};
use commerce_engine::inventory::InventoryLedger;
use commerce_engine::store::Store;

struct Harness {
    store: Arc<Store>,
    ledger: Arc<InventoryLedger>,
    catalog: Arc<InMemoryCatalog>,
    coupons: Arc<InMemoryCoupons>,
    carts: Arc<CartService>,
    orders: Arc<OrderEngine>,
    returns: Arc<ReturnEngine>,
    address_id: Uuid,
}

fn harness() -> Harness {
    let store = Arc::new(Store::new());
    let ledger = Arc::new(InventoryLedger::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let rates = Arc::new(InMemoryShippingRates::new());
    rates.set_rate(
        "inside_city",
        ShippingRate {
            cost: Money::from_major(5),
            free_shipping_threshold: Money::from_major(100),
        },
    );
    let coupons = Arc::new(InMemoryCoupons::new());
    let addresses = Arc::new(InMemoryAddressBook::new());
    let address_id = Uuid::new_v4();
    addresses.upsert(
        address_id,
        Address {
            name: "Test Customer".into(),
            street1: "1 Main St".into(),
            street2: None,
            city: "Springfield".into(),
            state: None,
            zip: "12345".into(),
            country: "US".into(),
            phone: None,
            location_type: "inside_city".into(),
        },
    );
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let carts = Arc::new(CartService::new(store.clone(), ledger.clone(), catalog.clone()));
    let orders = Arc::new(OrderEngine::new(
        store.clone(),
        ledger.clone(),
        catalog.clone(),
        rates,
        coupons.clone(),
        addresses,
        notifier.clone(),
    ));
    let returns = Arc::new(ReturnEngine::new(store.clone(), ledger.clone(), notifier));

    Harness { store, ledger, catalog, coupons, carts, orders, returns, address_id }
}

impl Harness {
    fn seed_product(&self, name: &str, price_major: i64, compare_at: Option<i64>, stock: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.catalog.upsert(ProductSnapshot {
            id,
            name: name.into(),
            sku: format!("SKU-{}", &id.simple().to_string()[..8]),
            image: None,
            price: Money::from_major(price_major),
            compare_at_price: compare_at.map(Money::from_major),
            stock,
            low_stock_threshold: None,
            backorder_allowed: false,
        });
        self.ledger.upsert(id, stock, None, false);
        id
    }

    fn new_order(&self, lines: OrderLines) -> NewOrder {
        NewOrder {
            identity: OrderIdentity::Customer { customer_id: Uuid::new_v4() },
            source: OrderSource::Webstore,
            lines,
            shipping_address_id: self.address_id,
            billing_address_id: None,
            use_shipping_as_billing: None,
            coupon_code: None,
            tax_amount: Money::ZERO,
            vendor_id: None,
            processed_by: None,
            actor: Actor::System,
        }
    }

    /// PENDING -> ... -> DELIVERED, with payment brought to PAID.
    fn deliver(&self, order_id: Uuid) {
        let actor = Actor::Staff(Uuid::new_v4());
        self.orders.change_status(order_id, OrderStatus::Confirmed, actor).unwrap();
        self.orders.change_status(order_id, OrderStatus::Processing, actor).unwrap();
        self.orders.change_status(order_id, OrderStatus::Shipped, actor).unwrap();
        self.orders.change_status(order_id, OrderStatus::Delivered, actor).unwrap();
        self.orders.change_payment_status(order_id, PaymentStatus::Processing, actor).unwrap();
        self.orders.change_payment_status(order_id, PaymentStatus::Paid, actor).unwrap();
    }

    /// REQUESTED -> ... -> REFUND_PROCESSING.
    fn advance_to_refund_processing(&self, return_id: Uuid) {
        let actor = Actor::Staff(Uuid::new_v4());
        for to in [
            ReturnStatus::Approved,
            ReturnStatus::LabelGenerated,
            ReturnStatus::InTransit,
            ReturnStatus::Received,
            ReturnStatus::Inspecting,
            ReturnStatus::RefundProcessing,
        ] {
            self.returns.change_status(return_id, to, actor).unwrap();
        }
    }
}

#[test]
fn test_cart_checkout_round_trip() {
    let h = harness();
    let a = h.seed_product("Alpha", 10, Some(15), 10);
    let b = h.seed_product("Beta", 20, None, 10);

    let cart = h.carts.create_cart(CartOwner::Customer(Uuid::new_v4()), CartType::Customer).unwrap();
    h.carts.add_item(cart.id, a, 2).unwrap();
    let cart = h.carts.add_item(cart.id, b, 1).unwrap();

    let totals = cart.totals();
    assert_eq!(totals.total_items, 3);
    assert_eq!(totals.total_unique_items, 2);
    assert_eq!(totals.total_amount, Money::from_major(40));
    assert_eq!(totals.total_discount, Money::from_major(10)); // only Alpha discounted

    let order = h.orders.create_order(h.new_order(OrderLines::Cart(cart.id))).unwrap();
    assert_eq!(order.total_amount, Money::from_major(40));
    assert_eq!(order.discount_amount, Money::from_major(10));
    assert_eq!(order.shipping_amount, Money::from_major(5)); // below free threshold
    assert_eq!(order.final_amount, Money::from_major(35)); // 40 + 5 - 10
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.history.len(), 1);
    assert_eq!(order.history[0].action, HistoryAction::OrderCreated);

    // Stock decremented exactly once per line.
    assert_eq!(h.ledger.stock(a).unwrap(), 8);
    assert_eq!(h.ledger.stock(b).unwrap(), 9);

    // The cart is consumed: deactivated and not checkout-able again.
    assert!(!h.store.cart(cart.id).unwrap().active);
    assert!(matches!(
        h.orders.create_order(h.new_order(OrderLines::Cart(cart.id))),
        Err(CommerceError::ValidationFailed(_))
    ));
}

#[test]
fn test_guest_cart_merges_into_customer_cart() {
    let h = harness();
    let a = h.seed_product("Alpha", 10, None, 50);
    let b = h.seed_product("Beta", 20, None, 50);
    let customer_id = Uuid::new_v4();

    h.carts.add_item_for_owner(CartOwner::Guest("sess-1".into()), a, 2).unwrap();
    h.carts.add_item_for_owner(CartOwner::Customer(customer_id), a, 1).unwrap();
    h.carts.add_item_for_owner(CartOwner::Customer(customer_id), b, 1).unwrap();

    let merged = h.carts.merge_carts(customer_id, "sess-1").unwrap();
    assert_eq!(merged.lines.len(), 2);
    let line_a = merged.lines.iter().find(|l| l.product_id == a).unwrap();
    assert_eq!(line_a.quantity, 3); // 1 + 2 accumulated

    // Guest cart is gone; merging again is a no-op, not an error.
    assert!(h.store.find_active_cart(&CartOwner::Guest("sess-1".into())).is_none());
    let again = h.carts.merge_carts(customer_id, "sess-1").unwrap();
    assert_eq!(again.totals().total_items, 4);
}

#[test]
fn test_concurrent_checkout_never_oversells() {
    let h = harness();
    let product = h.seed_product("Scarce", 10, None, 5);
    let orders = h.orders.clone();
    let address_id = h.address_id;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orders = orders.clone();
            std::thread::spawn(move || {
                orders
                    .create_order(NewOrder {
                        identity: OrderIdentity::Customer { customer_id: Uuid::new_v4() },
                        source: OrderSource::Webstore,
                        lines: OrderLines::Items(vec![NewOrderLine { product_id: product, quantity: 1 }]),
                        shipping_address_id: address_id,
                        billing_address_id: None,
                        use_shipping_as_billing: None,
                        coupon_code: None,
                        tax_amount: Money::ZERO,
                        vendor_id: None,
                        processed_by: None,
                        actor: Actor::System,
                    })
                    .is_ok()
            })
        })
        .collect();
    let successes = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();

    assert_eq!(successes, 5);
    assert_eq!(h.ledger.stock(product).unwrap(), 0);
}

#[test]
fn test_cancellation_releases_stock_exactly_once() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 3,
        }])))
        .unwrap();
    assert_eq!(h.ledger.stock(product).unwrap(), 7);

    let cancelled = h.orders.change_status(order.id, OrderStatus::Cancelled, Actor::System).unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.ledger.stock(product).unwrap(), 10);

    // Terminal: cancelling twice is illegal and must not release again.
    assert!(matches!(
        h.orders.change_status(order.id, OrderStatus::Cancelled, Actor::System),
        Err(CommerceError::IllegalTransition { .. })
    ));
    assert_eq!(h.ledger.stock(product).unwrap(), 10);
}

#[test]
fn test_return_window_boundary() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 1,
        }])))
        .unwrap();
    h.deliver(order.id);

    // 29 days old: inside the standard 30-day window.
    h.store
        .with_order_mut(order.id, |o| {
            o.created_at = Utc::now() - Duration::days(29);
            Ok(())
        })
        .unwrap();
    let eligibility = h.returns.compute_eligibility(order.id, Utc::now()).unwrap();
    assert!(eligibility.eligible);
    assert!(eligibility.items[0].eligible);

    // 31 days old: expired.
    h.store
        .with_order_mut(order.id, |o| {
            o.created_at = Utc::now() - Duration::days(31);
            Ok(())
        })
        .unwrap();
    let eligibility = h.returns.compute_eligibility(order.id, Utc::now()).unwrap();
    assert!(!eligibility.eligible);
    assert_eq!(eligibility.reason.as_deref(), Some("Return window expired"));
    assert!(!eligibility.items[0].eligible);

    // Creation is rejected outright on an expired window.
    assert!(matches!(
        h.returns.create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(h.store.order(order.id).unwrap().items[0].id, 1)],
            reason: ReturnReason::ChangedMind,
            refund_method: RefundMethod::OriginalPayment,
            actor: Actor::System,
        }),
        Err(CommerceError::PolicyViolation(_))
    ));
}

#[test]
fn test_pending_order_is_not_returnable() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 1,
        }])))
        .unwrap();
    let eligibility = h.returns.compute_eligibility(order.id, Utc::now()).unwrap();
    assert!(!eligibility.eligible);
    assert_eq!(eligibility.reason.as_deref(), Some("Order not eligible for return"));
}

#[test]
fn test_partial_then_full_refund_flow() {
    let h = harness();
    // 2 x 60.00 = 120.00: above the free-return threshold (no fees) and the
    // free-shipping threshold (no shipping), so finalAmount == totalAmount.
    let product = h.seed_product("Premium", 60, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 2,
        }])))
        .unwrap();
    assert_eq!(order.shipping_amount, Money::ZERO);
    assert_eq!(order.final_amount, Money::from_major(120));
    h.deliver(order.id);
    assert_eq!(h.ledger.stock(product).unwrap(), 8);
    let item_id = order.items[0].id;

    // First return: one unit, fee-free, refund 60.00.
    let first = h
        .returns
        .create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(item_id, 1)],
            reason: ReturnReason::Defective,
            refund_method: RefundMethod::OriginalPayment,
            actor: Actor::System,
        })
        .unwrap();
    assert_eq!(first.total_amount, Money::from_major(60));
    assert_eq!(first.restocking_fee, Money::ZERO);
    assert_eq!(first.return_shipping_cost, Money::ZERO);
    assert_eq!(first.refund_amount, Money::from_major(60));
    assert!(first.return_number.starts_with("RET-"));

    h.advance_to_refund_processing(first.id);
    let first = h.returns.process_refund(first.id, Actor::System).unwrap();
    assert_eq!(first.status, ReturnStatus::Refunded);
    assert_eq!(h.ledger.stock(product).unwrap(), 9); // one unit back
    assert_eq!(
        h.store.order(order.id).unwrap().payment_status,
        PaymentStatus::PartiallyRefunded
    );

    // Second return: the remaining unit brings cumulative refunds up to the
    // final amount, so the payment flips to fully REFUNDED.
    let second = h
        .returns
        .create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(item_id, 1)],
            reason: ReturnReason::Defective,
            refund_method: RefundMethod::OriginalPayment,
            actor: Actor::System,
        })
        .unwrap();
    h.advance_to_refund_processing(second.id);
    h.returns.process_refund(second.id, Actor::System).unwrap();
    assert_eq!(h.ledger.stock(product).unwrap(), 10);
    let order = h.store.order(order.id).unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert!(order
        .history
        .iter()
        .any(|e| e.action == HistoryAction::RefundProcessed));

    // Everything is back: nothing left to return.
    let eligibility = h.returns.compute_eligibility(order.id, Utc::now()).unwrap();
    assert_eq!(eligibility.items[0].remaining_quantity, 0);
    assert!(matches!(
        h.returns.create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(item_id, 1)],
            reason: ReturnReason::Other,
            refund_method: RefundMethod::OriginalPayment,
            actor: Actor::System,
        }),
        Err(CommerceError::ValidationFailed(_))
    ));
}

#[test]
fn test_return_fees_below_threshold() {
    let h = harness();
    // 2 x 20.00 = 40.00: below the 100.00 free-return threshold, so the 10%
    // restocking fee and 5.00 customer-paid return shipping apply.
    let product = h.seed_product("Basic", 20, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 2,
        }])))
        .unwrap();
    h.deliver(order.id);

    let request = h
        .returns
        .create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(order.items[0].id, 1)],
            reason: ReturnReason::ChangedMind,
            refund_method: RefundMethod::StoreCredit,
            actor: Actor::System,
        })
        .unwrap();
    assert_eq!(request.total_amount, Money::from_major(20));
    assert_eq!(request.restocking_fee, Money::from_major(2));
    assert_eq!(request.return_shipping_cost, Money::from_major(5));
    assert_eq!(request.refund_amount, Money::from_major(13)); // 20 - 2 - 5
}

#[test]
fn test_rejected_return_releases_its_claim() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 2,
        }])))
        .unwrap();
    h.deliver(order.id);
    let item_id = order.items[0].id;

    let request = h
        .returns
        .create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(item_id, 2)],
            reason: ReturnReason::NotAsDescribed,
            refund_method: RefundMethod::OriginalPayment,
            actor: Actor::System,
        })
        .unwrap();
    // While open, the quantity is reserved.
    let eligibility = h.returns.compute_eligibility(order.id, Utc::now()).unwrap();
    assert_eq!(eligibility.items[0].remaining_quantity, 0);

    h.returns.reject(request.id, Actor::Staff(Uuid::new_v4())).unwrap();
    let eligibility = h.returns.compute_eligibility(order.id, Utc::now()).unwrap();
    assert_eq!(eligibility.items[0].remaining_quantity, 2);
    // No stock movement ever happened for a rejected return.
    assert_eq!(h.ledger.stock(product).unwrap(), 8);
}

#[test]
fn test_concurrent_refunds_release_stock_once() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 2,
        }])))
        .unwrap();
    h.deliver(order.id);
    assert_eq!(h.ledger.stock(product).unwrap(), 8);

    let request = h
        .returns
        .create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(order.items[0].id, 2)],
            reason: ReturnReason::Defective,
            refund_method: RefundMethod::OriginalPayment,
            actor: Actor::System,
        })
        .unwrap();
    h.advance_to_refund_processing(request.id);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let returns = h.returns.clone();
            let barrier = barrier.clone();
            let return_id = request.id;
            std::thread::spawn(move || {
                barrier.wait();
                returns.process_refund(return_id, Actor::System).is_ok()
            })
        })
        .collect();
    let successes = handles.into_iter().map(|t| t.join().unwrap()).filter(|ok| *ok).count();

    // One refund goes through; the loser fails its transition before any
    // stock moves, so the two returned units come back exactly once.
    assert_eq!(successes, 1);
    assert_eq!(h.ledger.stock(product).unwrap(), 10);
    assert_eq!(
        h.returns.return_request(request.id).unwrap().status,
        ReturnStatus::Refunded
    );
}

#[test]
fn test_concurrent_return_requests_cannot_overclaim() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 2,
        }])))
        .unwrap();
    h.deliver(order.id);
    let item_id = order.items[0].id;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let returns = h.returns.clone();
            let barrier = barrier.clone();
            let order_id = order.id;
            std::thread::spawn(move || {
                barrier.wait();
                returns
                    .create_return_request(NewReturn {
                        order_id,
                        items: vec![(item_id, 2)],
                        reason: ReturnReason::ChangedMind,
                        refund_method: RefundMethod::OriginalPayment,
                        actor: Actor::System,
                    })
                    .is_ok()
            })
        })
        .collect();
    let successes = handles.into_iter().map(|t| t.join().unwrap()).filter(|ok| *ok).count();

    // The ordered quantity can only be claimed once across all requests.
    assert_eq!(successes, 1);
    let eligibility = h.returns.compute_eligibility(order.id, Utc::now()).unwrap();
    assert_eq!(eligibility.items[0].remaining_quantity, 0);
}

#[test]
fn test_checked_out_cart_rejects_mutation() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let cart = h
        .carts
        .add_item_for_owner(CartOwner::Customer(Uuid::new_v4()), product, 1)
        .unwrap();
    h.orders.create_order(h.new_order(OrderLines::Cart(cart.id))).unwrap();

    // The cart is a tombstone now: readable, never mutated.
    assert!(matches!(
        h.carts.add_item(cart.id, product, 1),
        Err(CommerceError::Conflict(_))
    ));
    assert!(matches!(
        h.carts.update_item(cart.id, product, 5),
        Err(CommerceError::Conflict(_))
    ));
    assert!(matches!(
        h.carts.remove_item(cart.id, product),
        Err(CommerceError::Conflict(_))
    ));
    assert!(matches!(h.carts.clear(cart.id), Err(CommerceError::Conflict(_))));
    assert!(matches!(
        h.carts.set_saved(cart.id, true),
        Err(CommerceError::Conflict(_))
    ));
    assert_eq!(h.store.cart(cart.id).unwrap().lines[0].quantity, 1);
}

#[test]
fn test_refund_requires_refund_processing_state() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 1,
        }])))
        .unwrap();
    h.deliver(order.id);

    let request = h
        .returns
        .create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(order.items[0].id, 1)],
            reason: ReturnReason::Defective,
            refund_method: RefundMethod::OriginalPayment,
            actor: Actor::System,
        })
        .unwrap();
    // Still REQUESTED: refund must be rejected without touching stock.
    assert!(matches!(
        h.returns.process_refund(request.id, Actor::System),
        Err(CommerceError::IllegalTransition { .. })
    ));
    assert_eq!(h.ledger.stock(product).unwrap(), 9);
}

#[test]
fn test_hot_deal_overrides_cart_pricing_and_counts_sales() {
    let h = harness();
    let product = h.seed_product("Dealworthy", 100, None, 10);
    let now = Utc::now();
    let deal = HotDeal::new(
        product,
        DiscountType::Percentage,
        Decimal::new(20, 0),
        Money::from_major(100),
        now - Duration::hours(1),
        now + Duration::hours(1),
        None,
    )
    .unwrap();
    h.store.insert_deal(deal.clone()).unwrap();

    let cart = h
        .carts
        .add_item_for_owner(CartOwner::Customer(Uuid::new_v4()), product, 2)
        .unwrap();
    let line = &cart.lines[0];
    assert_eq!(line.unit_price, Money::from_major(80));
    assert_eq!(line.compare_at_price, Some(Money::from_major(100)));
    assert_eq!(line.deal_id, Some(deal.id));

    let totals = cart.totals();
    assert_eq!(totals.total_amount, Money::from_major(160));
    assert_eq!(totals.total_discount, Money::from_major(40));

    h.orders.create_order(h.new_order(OrderLines::Cart(cart.id))).unwrap();
    assert_eq!(h.store.deal(deal.id).unwrap().sold_count, 2);
}

#[test]
fn test_coupon_applies_at_checkout() {
    let h = harness();
    let product = h.seed_product("Alpha", 30, None, 10);
    h.coupons.set_coupon(
        "SAVE10",
        CouponRule { discount: Money::from_major(10), min_subtotal: Money::from_major(50) },
    );

    let mut request = h.new_order(OrderLines::Items(vec![NewOrderLine {
        product_id: product,
        quantity: 2,
    }]));
    request.coupon_code = Some("SAVE10".into());
    let order = h.orders.create_order(request).unwrap();
    assert_eq!(order.coupon_discount, Money::from_major(10));
    assert_eq!(order.final_amount, Money::from_major(55)); // 60 + 5 - 10

    // Below the coupon's minimum subtotal the order must fail, and no stock
    // may be committed.
    let mut small = h.new_order(OrderLines::Items(vec![NewOrderLine {
        product_id: product,
        quantity: 1,
    }]));
    small.coupon_code = Some("SAVE10".into());
    assert!(matches!(
        h.orders.create_order(small),
        Err(CommerceError::ValidationFailed(_))
    ));
    assert_eq!(h.ledger.stock(product).unwrap(), 8);
}

#[test]
fn test_unavailable_lines_are_all_named() {
    let h = harness();
    let a = h.seed_product("Gadget", 10, None, 1);
    let b = h.seed_product("Widget", 10, None, 1);

    let err = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![
            NewOrderLine { product_id: a, quantity: 5 },
            NewOrderLine { product_id: b, quantity: 5 },
        ])))
        .unwrap_err();
    match err {
        CommerceError::ValidationFailed(message) => {
            assert!(message.contains("Gadget"));
            assert!(message.contains("Widget"));
        }
        other => panic!("expected ValidationFailed, got {other:?}"),
    }
    // Nothing committed.
    assert_eq!(h.ledger.stock(a).unwrap(), 1);
    assert_eq!(h.ledger.stock(b).unwrap(), 1);
}

#[test]
fn test_admin_order_requires_processed_by() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let lines = || OrderLines::Items(vec![NewOrderLine { product_id: product, quantity: 1 }]);

    let mut request = h.new_order(lines());
    request.source = OrderSource::AdminPanel;
    assert!(matches!(
        h.orders.create_order(request),
        Err(CommerceError::ValidationFailed(_))
    ));

    let staff = Uuid::new_v4();
    let mut request = h.new_order(lines());
    request.source = OrderSource::AdminPanel;
    request.processed_by = Some(staff);
    request.actor = Actor::Staff(staff);
    let order = h.orders.create_order(request).unwrap();
    assert_eq!(order.processed_by, Some(staff));
}

#[test]
fn test_billing_address_resolution() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let lines = || OrderLines::Items(vec![NewOrderLine { product_id: product, quantity: 1 }]);

    // Explicitly declining shipping-as-billing without a billing id fails.
    let mut request = h.new_order(lines());
    request.use_shipping_as_billing = Some(false);
    assert!(matches!(
        h.orders.create_order(request),
        Err(CommerceError::ValidationFailed(_))
    ));

    // Default: billing falls back to the shipping snapshot.
    let order = h.orders.create_order(h.new_order(lines())).unwrap();
    assert_eq!(order.billing_address, order.shipping_address);
}

#[test]
fn test_guest_order_captures_identity_inline() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let mut request = h.new_order(OrderLines::Items(vec![NewOrderLine {
        product_id: product,
        quantity: 1,
    }]));
    request.identity =
        OrderIdentity::Guest { name: "Pat Doe".into(), email: "pat@example.com".into() };
    let order = h.orders.create_order(request).unwrap();
    assert!(matches!(order.identity, OrderIdentity::Guest { .. }));

    // A guest order carries no customer reference into its returns.
    h.deliver(order.id);
    let request = h
        .returns
        .create_return_request(NewReturn {
            order_id: order.id,
            items: vec![(order.items[0].id, 1)],
            reason: ReturnReason::WrongItem,
            refund_method: RefundMethod::OriginalPayment,
            actor: Actor::System,
        })
        .unwrap();
    assert_eq!(request.customer_id, None);
}

#[test]
fn test_order_notes_and_payment_retry() {
    let h = harness();
    let product = h.seed_product("Alpha", 10, None, 10);
    let order = h
        .orders
        .create_order(h.new_order(OrderLines::Items(vec![NewOrderLine {
            product_id: product,
            quantity: 1,
        }])))
        .unwrap();

    let staff = Actor::Staff(Uuid::new_v4());
    let order = h.orders.add_note(order.id, "customer called about delivery", staff).unwrap();
    assert!(order
        .history
        .iter()
        .any(|e| e.action == HistoryAction::NoteAdded));

    // Retry is only valid from FAILED.
    assert!(matches!(
        h.orders.retry_payment(order.id, staff),
        Err(CommerceError::IllegalTransition { .. })
    ));
    h.orders.change_payment_status(order.id, PaymentStatus::Failed, staff).unwrap();
    let order = h.orders.retry_payment(order.id, staff).unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}
