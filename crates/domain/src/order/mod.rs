//! Order record and related types.

mod model;
mod state;
mod value_objects;

pub use model::{LineChanges, Order};
pub use state::OrderStatus;
pub use value_objects::{Money, OrderLine};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Customer ID is required.
    #[error("Customer ID is required")]
    CustomerIdRequired,

    /// Shop ID is required.
    #[error("Shop ID is required")]
    ShopIdRequired,

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// A line has no product.
    #[error("Line {line}: product ID is required")]
    ProductIdRequired { line: usize },

    /// Invalid quantity.
    #[error("Line {line}: invalid quantity {quantity} (must be greater than 0)")]
    InvalidQuantity { line: usize, quantity: u32 },

    /// Invalid price.
    #[error("Line {line}: invalid price {price} (must be greater than 0)")]
    InvalidPrice { line: usize, price: i64 },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// More lines than line numbers can address.
    #[error("Order has too many lines")]
    TooManyLines,

    /// The order total does not fit in a money amount.
    #[error("Order total overflows")]
    AmountOverflow,
}
