//! Engine services: cart, order, and return flows over the arena store
pub mod cart;
pub mod order;
pub mod returns;

pub use cart::CartService;
pub use order::{NewOrder, NewOrderLine, OrderEngine, OrderLines};
pub use returns::{Eligibility, ItemEligibility, NewReturn, ReturnEngine};
