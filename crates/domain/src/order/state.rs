//! Order state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► Completed
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Stock is reserved for every line, awaiting processing.
    #[default]
    Pending,

    /// The order is being fulfilled; its reservations are still held.
    Processing,

    /// Reserved stock was consumed (terminal state).
    Completed,

    /// Reservations were released (terminal state).
    Cancelled,
}

impl OrderStatus {
    pub fn can_start_processing(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Processing)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Completed and Cancelled orders never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Name stored in the document's status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
