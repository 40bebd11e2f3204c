//! Cart service
//!
//! Cart operations over the arena store: snapshot pricing on add (with hot
//! deal override), accumulation by product, guest-to-customer merge, and
//! checkout validation against the inventory ledger.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::aggregates::cart::{Cart, CartLine, CartOwner, CartTotals, CartType};
use crate::error::{CommerceError, Result};
use crate::external::ProductCatalog;
use crate::inventory::InventoryLedger;
use crate::pricing;
use crate::store::Store;

pub struct CartService {
    store: Arc<Store>,
    ledger: Arc<InventoryLedger>,
    catalog: Arc<dyn ProductCatalog>,
}

/// Checked-out and swept carts are tombstones: readable, never mutated.
fn ensure_active(cart: &Cart) -> Result<()> {
    if cart.active {
        Ok(())
    } else {
        Err(CommerceError::Conflict("cart is no longer active".into()))
    }
}

impl CartService {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<InventoryLedger>,
        catalog: Arc<dyn ProductCatalog>,
    ) -> Self {
        Self { store, ledger, catalog }
    }

    pub fn create_cart(&self, owner: CartOwner, cart_type: CartType) -> Result<Cart> {
        let cart = Cart::new(owner, cart_type)?;
        self.store.insert_cart(cart.clone());
        Ok(cart)
    }

    pub fn cart(&self, id: Uuid) -> Result<Cart> {
        self.store.cart(id)
    }

    /// Add to the owner's active cart, creating one on first add.
    pub fn add_item_for_owner(
        &self,
        owner: CartOwner,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Cart> {
        let cart = match self.store.find_active_cart(&owner) {
            Some(cart) => cart,
            None => {
                let cart_type = match &owner {
                    CartOwner::Customer(_) => CartType::Customer,
                    CartOwner::Admin(_) => CartType::Admin,
                    CartOwner::Guest(_) => CartType::Guest,
                };
                self.create_cart(owner, cart_type)?
            }
        };
        self.add_item(cart.id, product_id, quantity)
    }

    /// Add a line; an existing line for the product accumulates quantity.
    pub fn add_item(&self, cart_id: Uuid, product_id: Uuid, quantity: u32) -> Result<Cart> {
        let line = self.snapshot_line(product_id, quantity)?;
        self.store.with_cart_mut(cart_id, |cart| {
            ensure_active(cart)?;
            cart.add_line(line);
            Ok(cart.clone())
        })
    }

    /// Absolute quantity set; 0 removes the line.
    pub fn update_item(&self, cart_id: Uuid, product_id: Uuid, quantity: u32) -> Result<Cart> {
        self.store.with_cart_mut(cart_id, |cart| {
            ensure_active(cart)?;
            cart.set_quantity(product_id, quantity)?;
            Ok(cart.clone())
        })
    }

    pub fn remove_item(&self, cart_id: Uuid, product_id: Uuid) -> Result<Cart> {
        self.store.with_cart_mut(cart_id, |cart| {
            ensure_active(cart)?;
            cart.remove_line(product_id)?;
            Ok(cart.clone())
        })
    }

    pub fn clear(&self, cart_id: Uuid) -> Result<Cart> {
        self.store.with_cart_mut(cart_id, |cart| {
            ensure_active(cart)?;
            cart.clear();
            Ok(cart.clone())
        })
    }

    pub fn delete_cart(&self, cart_id: Uuid) -> Result<()> {
        self.store
            .remove_cart(cart_id)
            .map(|_| ())
            .ok_or_else(|| CommerceError::not_found("cart", cart_id))
    }

    /// Wish-list persistence; saved carts survive the abandoned sweep.
    pub fn set_saved(&self, cart_id: Uuid, saved: bool) -> Result<Cart> {
        self.store.with_cart_mut(cart_id, |cart| {
            ensure_active(cart)?;
            cart.saved = saved;
            Ok(cart.clone())
        })
    }

    /// Derived totals, never stored.
    pub fn totals(&self, cart_id: Uuid) -> Result<CartTotals> {
        Ok(self.store.cart(cart_id)?.totals())
    }

    /// Fold the guest cart for `session_id` into the customer's cart and
    /// delete it. Idempotent: no guest cart (or an already-merged one) is a
    /// no-op, not an error.
    pub fn merge_carts(&self, customer_id: Uuid, session_id: &str) -> Result<Cart> {
        let customer_owner = CartOwner::Customer(customer_id);
        let customer_cart = match self.store.find_active_cart(&customer_owner) {
            Some(cart) => cart,
            None => self.create_cart(customer_owner, CartType::Customer)?,
        };

        let guest_owner = CartOwner::Guest(session_id.to_string());
        let Some(guest_cart) = self.store.find_active_cart(&guest_owner) else {
            return Ok(customer_cart);
        };

        let merged = self.store.with_cart_mut(customer_cart.id, |cart| {
            for line in guest_cart.lines.clone() {
                cart.add_line(line);
            }
            Ok(cart.clone())
        })?;
        // Deleting the guest cart is mandatory so the session cannot end up
        // with duplicate guest carts.
        self.store.remove_cart(guest_cart.id);
        tracing::info!(customer = %customer_id, session = session_id, "guest cart merged");
        Ok(merged)
    }

    /// Checkout precondition: every line's product must still be available
    /// at the requested quantity. The error names the offending lines.
    pub fn validate_cart(&self, cart_id: Uuid) -> Result<()> {
        let cart = self.store.cart(cart_id)?;
        let mut unavailable = Vec::new();
        for line in &cart.lines {
            let available = self
                .ledger
                .check_availability(line.product_id, line.quantity)
                .unwrap_or(false);
            if !available {
                unavailable.push(format!("{} (x{})", line.name, line.quantity));
            }
        }
        if unavailable.is_empty() {
            Ok(())
        } else {
            Err(CommerceError::ValidationFailed(format!(
                "unavailable lines: {}",
                unavailable.join(", ")
            )))
        }
    }

    /// Snapshot a cart line from the current catalog price, with an active
    /// hot deal overriding the unit price when one applies.
    fn snapshot_line(&self, product_id: Uuid, quantity: u32) -> Result<CartLine> {
        let product = self.catalog.get_product(product_id)?;
        let now = Utc::now();
        let (unit_price, compare_at_price, deal_id) =
            match self.store.active_deal_for(product_id, now) {
                Some(deal) => {
                    // Deal price is recomputed against the product's current
                    // price so a stale stored deal price never leaks in.
                    let deal_price = pricing::apply_hot_deal(
                        product.price,
                        deal.discount_type,
                        deal.discount_value,
                    );
                    (deal_price, Some(product.price), Some(deal.id))
                }
                None => (product.price, product.compare_at_price, None),
            };
        Ok(CartLine {
            product_id,
            name: product.name,
            sku: product.sku,
            image: product.image,
            quantity,
            unit_price,
            compare_at_price,
            deal_id,
        })
    }
}
