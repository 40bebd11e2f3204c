//! Commerce engine service
//!
//! Thin HTTP glue over the engine: every handler delegates to a service
//! method; no business logic lives here.

use anyhow::Result;
use axum::{extract::{Path, State}, http::StatusCode, routing::{get, post, put}, Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

use commerce_engine::config::Config;
use commerce_engine::domain::aggregates::cart::{Cart, CartOwner, CartType};
use commerce_engine::domain::aggregates::hot_deal::{DiscountType, HotDeal};
use commerce_engine::domain::aggregates::order::{
    Actor, Address, Order, OrderIdentity, OrderSource, OrderStatus, PaymentStatus,
};
use commerce_engine::domain::aggregates::returns::{
    RefundMethod, ReturnPolicy, ReturnReason, ReturnRequest, ReturnShippingPayer, ReturnStatus,
};
use commerce_engine::domain::value_objects::{Money, Sku};
use commerce_engine::engine::{
    CartService, Eligibility, NewOrder, NewOrderLine, NewReturn, OrderEngine, OrderLines,
    ReturnEngine,
};
use commerce_engine::error::CommerceError;
use commerce_engine::external::{
    CouponRule, InMemoryAddressBook, InMemoryCatalog, InMemoryCoupons, InMemoryShippingRates,
    LogNotifier, NatsNotifier, Notifier, ProductSnapshot, ShippingRate,
};
use commerce_engine::inventory::InventoryLedger;
use commerce_engine::store::Store;
use commerce_engine::sweep;

#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    ledger: Arc<InventoryLedger>,
    catalog: Arc<InMemoryCatalog>,
    rates: Arc<InMemoryShippingRates>,
    coupons: Arc<InMemoryCoupons>,
    addresses: Arc<InMemoryAddressBook>,
    carts: Arc<CartService>,
    orders: Arc<OrderEngine>,
    returns: Arc<ReturnEngine>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let config = Config::from_env();

    let store = Arc::new(Store::new());
    let ledger = Arc::new(InventoryLedger::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let rates = Arc::new(InMemoryShippingRates::new());
    let coupons = Arc::new(InMemoryCoupons::new());
    let addresses = Arc::new(InMemoryAddressBook::new());
    let notifier: Arc<dyn Notifier> = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Arc::new(NatsNotifier::new(client, config.nats_subject_prefix.clone())),
            Err(err) => {
                tracing::warn!(error = %err, "NATS unavailable, events will be logged only");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    };

    let carts = Arc::new(CartService::new(store.clone(), ledger.clone(), catalog.clone()));
    let orders = Arc::new(OrderEngine::new(
        store.clone(), ledger.clone(), catalog.clone(), rates.clone(), coupons.clone(),
        addresses.clone(), notifier.clone(),
    ));
    let returns = Arc::new(ReturnEngine::new(store.clone(), ledger.clone(), notifier));
    let _sweeper = sweep::spawn_sweeper(store.clone(), config.sweep());

    let state = AppState { store, ledger, catalog, rates, coupons, addresses, carts, orders, returns };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "commerce-engine"})) }))
        // Ingest seams for external collaborators (catalog, addresses, rates, coupons).
        .route("/api/v1/products", post(register_product))
        .route("/api/v1/addresses", post(register_address))
        .route("/api/v1/shipping-rates", post(register_rate))
        .route("/api/v1/coupons", post(register_coupon))
        // Carts.
        .route("/api/v1/carts", post(create_cart))
        .route("/api/v1/carts/items", post(add_item_for_owner))
        .route("/api/v1/carts/merge", post(merge_carts))
        .route("/api/v1/carts/:id", get(get_cart).delete(delete_cart))
        .route("/api/v1/carts/:id/items", post(add_cart_item))
        .route("/api/v1/carts/:id/items/:product_id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/carts/:id/clear", post(clear_cart))
        .route("/api/v1/carts/:id/save", post(save_cart))
        .route("/api/v1/carts/:id/validate", get(validate_cart))
        // Orders.
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/status", post(change_order_status))
        .route("/api/v1/orders/:id/payment-status", post(change_payment_status))
        .route("/api/v1/orders/:id/payment-retry", post(retry_payment))
        .route("/api/v1/orders/:id/notes", post(add_order_note))
        .route("/api/v1/orders/:id/return-eligibility", get(return_eligibility))
        // Returns.
        .route("/api/v1/returns", post(create_return))
        .route("/api/v1/returns/:id", get(get_return))
        .route("/api/v1/returns/:id/status", post(change_return_status))
        .route("/api/v1/returns/:id/refund", post(process_refund))
        // Hot deals and return policies.
        .route("/api/v1/hot-deals", get(list_deals).post(create_deal))
        .route("/api/v1/hot-deals/:id", put(update_deal))
        .route("/api/v1/return-policies", post(create_policy))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("commerce-engine listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}

type ApiResult<T> = std::result::Result<T, CommerceError>;

fn validated<T: Validate>(request: T) -> ApiResult<T> {
    request.validate().map_err(|e| CommerceError::ValidationFailed(e.to_string()))?;
    Ok(request)
}

// -- ingest seams ------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
struct RegisterProductRequest {
    id: Option<Uuid>,
    #[validate(length(min = 1))]
    name: String,
    sku: String,
    image: Option<String>,
    price: Money,
    compare_at_price: Option<Money>,
    stock: i64,
    low_stock_threshold: Option<u32>,
    #[serde(default)]
    backorder_allowed: bool,
}

async fn register_product(State(s): State<AppState>, Json(r): Json<RegisterProductRequest>) -> ApiResult<(StatusCode, Json<ProductSnapshot>)> {
    let r = validated(r)?;
    let sku = Sku::new(r.sku)?;
    let product = ProductSnapshot {
        id: r.id.unwrap_or_else(Uuid::new_v4),
        name: r.name, sku: sku.as_str().to_string(), image: r.image,
        price: r.price, compare_at_price: r.compare_at_price,
        stock: r.stock, low_stock_threshold: r.low_stock_threshold,
        backorder_allowed: r.backorder_allowed,
    };
    s.ledger.upsert(product.id, product.stock, product.low_stock_threshold, product.backorder_allowed);
    s.catalog.upsert(product.clone());
    Ok((StatusCode::CREATED, Json(product)))
}

#[derive(Debug, Deserialize)]
struct RegisterAddressRequest { id: Option<Uuid>, address: Address }

async fn register_address(State(s): State<AppState>, Json(r): Json<RegisterAddressRequest>) -> ApiResult<(StatusCode, Json<Uuid>)> {
    let id = r.id.unwrap_or_else(Uuid::new_v4);
    s.addresses.upsert(id, r.address);
    Ok((StatusCode::CREATED, Json(id)))
}

#[derive(Debug, Deserialize)]
struct RegisterRateRequest { location_type: String, cost: Money, free_shipping_threshold: Money }

async fn register_rate(State(s): State<AppState>, Json(r): Json<RegisterRateRequest>) -> ApiResult<StatusCode> {
    s.rates.set_rate(r.location_type, ShippingRate { cost: r.cost, free_shipping_threshold: r.free_shipping_threshold });
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterCouponRequest {
    #[validate(length(min = 1))]
    code: String,
    discount: Money,
    #[serde(default)]
    min_subtotal: Money,
}

async fn register_coupon(State(s): State<AppState>, Json(r): Json<RegisterCouponRequest>) -> ApiResult<StatusCode> {
    let r = validated(r)?;
    s.coupons.set_coupon(r.code, CouponRule { discount: r.discount, min_subtotal: r.min_subtotal });
    Ok(StatusCode::CREATED)
}

// -- carts -------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateCartRequest { owner: CartOwner, cart_type: Option<CartType> }

async fn create_cart(State(s): State<AppState>, Json(r): Json<CreateCartRequest>) -> ApiResult<(StatusCode, Json<Cart>)> {
    let cart_type = r.cart_type.unwrap_or(match &r.owner {
        CartOwner::Customer(_) => CartType::Customer,
        CartOwner::Admin(_) => CartType::Admin,
        CartOwner::Guest(_) => CartType::Guest,
    });
    Ok((StatusCode::CREATED, Json(s.carts.create_cart(r.owner, cart_type)?)))
}

async fn get_cart(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<serde_json::Value>> {
    let cart = s.carts.cart(id)?;
    let totals = cart.totals();
    Ok(Json(serde_json::json!({ "cart": cart, "totals": totals })))
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    product_id: Uuid,
    #[validate(range(min = 1))]
    quantity: u32,
}

async fn add_cart_item(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<AddItemRequest>) -> ApiResult<Json<Cart>> {
    let r = validated(r)?;
    Ok(Json(s.carts.add_item(id, r.product_id, r.quantity)?))
}

/// Add to the owner's active cart, creating the cart on first add.
#[derive(Debug, Deserialize, Validate)]
struct AddItemForOwnerRequest {
    owner: CartOwner,
    product_id: Uuid,
    #[validate(range(min = 1))]
    quantity: u32,
}

async fn add_item_for_owner(State(s): State<AppState>, Json(r): Json<AddItemForOwnerRequest>) -> ApiResult<Json<Cart>> {
    let r = validated(r)?;
    Ok(Json(s.carts.add_item_for_owner(r.owner, r.product_id, r.quantity)?))
}

#[derive(Debug, Deserialize)]
struct UpdateItemRequest { quantity: u32 }

async fn update_cart_item(State(s): State<AppState>, Path((id, product_id)): Path<(Uuid, Uuid)>, Json(r): Json<UpdateItemRequest>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.carts.update_item(id, product_id, r.quantity)?))
}

async fn remove_cart_item(State(s): State<AppState>, Path((id, product_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.carts.remove_item(id, product_id)?))
}

async fn clear_cart(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.carts.clear(id)?))
}

async fn delete_cart(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    s.carts.delete_cart(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SaveCartRequest { saved: bool }

async fn save_cart(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<SaveCartRequest>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.carts.set_saved(id, r.saved)?))
}

async fn validate_cart(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<serde_json::Value>> {
    s.carts.validate_cart(id)?;
    Ok(Json(serde_json::json!({ "valid": true })))
}

#[derive(Debug, Deserialize)]
struct MergeCartsRequest { customer_id: Uuid, session_id: String }

async fn merge_carts(State(s): State<AppState>, Json(r): Json<MergeCartsRequest>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.carts.merge_carts(r.customer_id, &r.session_id)?))
}

// -- orders ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CheckoutRequest {
    cart_id: Uuid,
    identity: OrderIdentity,
    source: Option<OrderSource>,
    shipping_address_id: Uuid,
    billing_address_id: Option<Uuid>,
    use_shipping_as_billing: Option<bool>,
    coupon_code: Option<String>,
    tax_amount: Option<Money>,
    vendor_id: Option<Uuid>,
    processed_by: Option<Uuid>,
    actor: Actor,
}

async fn checkout(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<Order>)> {
    s.carts.validate_cart(r.cart_id)?;
    let order = s.orders.create_order(NewOrder {
        identity: r.identity,
        source: r.source.unwrap_or(OrderSource::Webstore),
        lines: OrderLines::Cart(r.cart_id),
        shipping_address_id: r.shipping_address_id,
        billing_address_id: r.billing_address_id,
        use_shipping_as_billing: r.use_shipping_as_billing,
        coupon_code: r.coupon_code,
        tax_amount: r.tax_amount.unwrap_or(Money::ZERO),
        vendor_id: r.vendor_id,
        processed_by: r.processed_by,
        actor: r.actor,
    })?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    identity: OrderIdentity,
    source: OrderSource,
    items: Vec<OrderItemRequest>,
    shipping_address_id: Uuid,
    billing_address_id: Option<Uuid>,
    use_shipping_as_billing: Option<bool>,
    coupon_code: Option<String>,
    tax_amount: Option<Money>,
    vendor_id: Option<Uuid>,
    processed_by: Option<Uuid>,
    actor: Actor,
}

#[derive(Debug, Deserialize)]
struct OrderItemRequest { product_id: Uuid, quantity: u32 }

async fn create_order(State(s): State<AppState>, Json(r): Json<CreateOrderRequest>) -> ApiResult<(StatusCode, Json<Order>)> {
    let lines = r.items.iter().map(|i| NewOrderLine { product_id: i.product_id, quantity: i.quantity }).collect();
    let order = s.orders.create_order(NewOrder {
        identity: r.identity,
        source: r.source,
        lines: OrderLines::Items(lines),
        shipping_address_id: r.shipping_address_id,
        billing_address_id: r.billing_address_id,
        use_shipping_as_billing: r.use_shipping_as_billing,
        coupon_code: r.coupon_code,
        tax_amount: r.tax_amount.unwrap_or(Money::ZERO),
        vendor_id: r.vendor_id,
        processed_by: r.processed_by,
        actor: r.actor,
    })?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.order(id)?))
}

#[derive(Debug, Deserialize)]
struct ChangeStatusRequest { status: OrderStatus, actor: Actor }

async fn change_order_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ChangeStatusRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.change_status(id, r.status, r.actor)?))
}

#[derive(Debug, Deserialize)]
struct ChangePaymentStatusRequest { status: PaymentStatus, actor: Actor }

async fn change_payment_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ChangePaymentStatusRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.change_payment_status(id, r.status, r.actor)?))
}

#[derive(Debug, Deserialize)]
struct ActorRequest { actor: Actor }

async fn retry_payment(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ActorRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.retry_payment(id, r.actor)?))
}

#[derive(Debug, Deserialize, Validate)]
struct AddNoteRequest {
    #[validate(length(min = 1))]
    note: String,
    actor: Actor,
}

async fn add_order_note(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<AddNoteRequest>) -> ApiResult<Json<Order>> {
    let r = validated(r)?;
    Ok(Json(s.orders.add_note(id, &r.note, r.actor)?))
}

async fn return_eligibility(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Eligibility>> {
    Ok(Json(s.returns.compute_eligibility(id, Utc::now())?))
}

// -- returns -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateReturnRequest {
    order_id: Uuid,
    items: Vec<ReturnItemRequest>,
    reason: ReturnReason,
    refund_method: RefundMethod,
    actor: Actor,
}

#[derive(Debug, Deserialize)]
struct ReturnItemRequest { order_item_id: Uuid, quantity: u32 }

async fn create_return(State(s): State<AppState>, Json(r): Json<CreateReturnRequest>) -> ApiResult<(StatusCode, Json<ReturnRequest>)> {
    let request = s.returns.create_return_request(NewReturn {
        order_id: r.order_id,
        items: r.items.iter().map(|i| (i.order_item_id, i.quantity)).collect(),
        reason: r.reason,
        refund_method: r.refund_method,
        actor: r.actor,
    })?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_return(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ReturnRequest>> {
    Ok(Json(s.returns.return_request(id)?))
}

#[derive(Debug, Deserialize)]
struct ChangeReturnStatusRequest { status: ReturnStatus, actor: Actor }

async fn change_return_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ChangeReturnStatusRequest>) -> ApiResult<Json<ReturnRequest>> {
    Ok(Json(s.returns.change_status(id, r.status, r.actor)?))
}

async fn process_refund(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ActorRequest>) -> ApiResult<Json<ReturnRequest>> {
    Ok(Json(s.returns.process_refund(id, r.actor)?))
}

// -- hot deals and policies --------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateDealRequest {
    product_id: Uuid,
    discount_type: DiscountType,
    discount_value: Decimal,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    stock_limit: Option<u32>,
}

async fn create_deal(State(s): State<AppState>, Json(r): Json<CreateDealRequest>) -> ApiResult<(StatusCode, Json<HotDeal>)> {
    use commerce_engine::external::ProductCatalog;
    let product = s.catalog.get_product(r.product_id)?;
    let deal = HotDeal::new(r.product_id, r.discount_type, r.discount_value, product.price, r.start_date, r.end_date, r.stock_limit)?;
    s.store.insert_deal(deal.clone())?;
    Ok((StatusCode::CREATED, Json(deal)))
}

async fn list_deals(State(s): State<AppState>) -> ApiResult<Json<Vec<HotDeal>>> {
    Ok(Json(s.store.deals()))
}

#[derive(Debug, Deserialize)]
struct UpdateDealRequest {
    discount_type: Option<DiscountType>,
    discount_value: Option<Decimal>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    stock_limit: Option<u32>,
    is_active: Option<bool>,
}

async fn update_deal(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<UpdateDealRequest>) -> ApiResult<Json<HotDeal>> {
    use commerce_engine::external::ProductCatalog;
    let mut deal = s.store.deal(id)?;
    if let Some(ty) = r.discount_type { deal.discount_type = ty; }
    if let Some(value) = r.discount_value { deal.discount_value = value; }
    if let Some(start) = r.start_date { deal.start_date = start; }
    if let Some(end) = r.end_date { deal.end_date = end; }
    if let Some(limit) = r.stock_limit { deal.stock_limit = Some(limit); }
    if let Some(active) = r.is_active { deal.is_active = active; }
    if deal.end_date <= deal.start_date {
        return Err(CommerceError::ValidationFailed("deal end date must be after start date".into()));
    }
    // Never persist a deal price stale relative to the product's current price.
    let product = s.catalog.get_product(deal.product_id)?;
    deal.reprice(product.price);
    s.store.update_deal(deal.clone())?;
    Ok(Json(deal))
}

#[derive(Debug, Deserialize)]
struct CreatePolicyRequest {
    name: String,
    return_window_days: i64,
    refund_window_days: i64,
    free_return_threshold: Money,
    restocking_fee_percent: Decimal,
    return_shipping_payer: ReturnShippingPayer,
    return_shipping_cost: Money,
    #[serde(default)]
    rma_required: bool,
    #[serde(default = "default_true")]
    partial_returns_allowed: bool,
    #[serde(default)]
    original_packaging_required: bool,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default)]
    is_default: bool,
}

fn default_true() -> bool { true }

async fn create_policy(State(s): State<AppState>, Json(r): Json<CreatePolicyRequest>) -> ApiResult<(StatusCode, Json<ReturnPolicy>)> {
    let policy = ReturnPolicy {
        id: Uuid::new_v4(),
        name: r.name,
        return_window_days: r.return_window_days,
        refund_window_days: r.refund_window_days,
        free_return_threshold: r.free_return_threshold,
        restocking_fee_percent: r.restocking_fee_percent,
        return_shipping_payer: r.return_shipping_payer,
        return_shipping_cost: r.return_shipping_cost,
        rma_required: r.rma_required,
        partial_returns_allowed: r.partial_returns_allowed,
        original_packaging_required: r.original_packaging_required,
        is_active: r.is_active,
        is_default: r.is_default,
    };
    s.store.insert_policy(policy.clone())?;
    Ok((StatusCode::CREATED, Json(policy)))
}
