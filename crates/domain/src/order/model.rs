//! Order record.

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ShopId};
use serde::{Deserialize, Serialize};
use stock_store::{Collection, Reference};
use uuid::Uuid;

use crate::record::Record;

use super::{Money, OrderError, OrderLine, OrderStatus};

/// An order and the stock it holds.
///
/// Every line of a Pending or Processing order is backed by a reservation
/// whose reference is `Reference::OrderLine { order, line }`. `line` is a
/// number handed out once per order: a line keeps it for as long as it is
/// unchanged, and a replaced line gets a fresh one so its reservation never
/// collides with the journal entries of the line it replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    shop_id: ShopId,
    lines: Vec<OrderLine>,
    line_numbers: Vec<u32>,
    next_line: u32,
    status: OrderStatus,
    total_amount: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a Pending order after validating its lines.
    pub fn new(
        id: OrderId,
        customer_id: CustomerId,
        shop_id: ShopId,
        lines: Vec<OrderLine>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        let total_amount = Self::validate(customer_id, shop_id, &lines)?;
        let next_line = u32::try_from(lines.len()).map_err(|_| OrderError::TooManyLines)?;

        Ok(Self {
            id,
            customer_id,
            shop_id,
            lines,
            line_numbers: (0..next_line).collect(),
            next_line,
            status: OrderStatus::Pending,
            total_amount,
            created_at: now,
            updated_at: now,
        })
    }

    /// Validates an order request and returns its total amount.
    pub fn validate(
        customer_id: CustomerId,
        shop_id: ShopId,
        lines: &[OrderLine],
    ) -> Result<Money, OrderError> {
        if customer_id.is_nil() {
            return Err(OrderError::CustomerIdRequired);
        }
        if shop_id.is_nil() {
            return Err(OrderError::ShopIdRequired);
        }
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        if u32::try_from(lines.len()).is_err() {
            return Err(OrderError::TooManyLines);
        }

        let mut total = Money::zero();
        for (line, item) in lines.iter().enumerate() {
            if item.product_id.is_blank() {
                return Err(OrderError::ProductIdRequired { line });
            }
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    line,
                    quantity: item.quantity,
                });
            }
            if !item.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    line,
                    price: item.unit_price.cents(),
                });
            }
            total = item
                .total_price()
                .and_then(|price| total.checked_add(price))
                .ok_or(OrderError::AmountOverflow)?;
        }
        Ok(total)
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn shop_id(&self) -> ShopId {
        self.shop_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Sum of quantity × unit price over all lines.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the ledger reference for a line number.
    pub fn line_reference(&self, number: u32) -> Reference {
        Reference::OrderLine {
            order: self.id,
            line: number,
        }
    }

    /// Returns every line with its ledger reference.
    pub fn line_references(&self) -> impl Iterator<Item = (Reference, &OrderLine)> {
        self.line_numbers
            .iter()
            .zip(&self.lines)
            .map(|(&number, line)| (self.line_reference(number), line))
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Transitions
impl Order {
    /// Pending → Processing.
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_start_processing() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "process",
            });
        }
        self.transition(OrderStatus::Processing, now);
        Ok(())
    }

    /// Processing → Completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_complete() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "complete",
            });
        }
        self.transition(OrderStatus::Completed, now);
        Ok(())
    }

    /// Pending or Processing → Cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "cancel",
            });
        }
        self.transition(OrderStatus::Cancelled, now);
        Ok(())
    }

    /// Replaces the lines of a Pending order and recomputes its total.
    ///
    /// A new line equal to a current one takes over that line's number and
    /// reservation. The rest of the current lines come back as `released`
    /// and the rest of the new lines as `reserved`, numbered after every
    /// number the order has used so far.
    pub fn replace_lines(
        &mut self,
        lines: Vec<OrderLine>,
        now: DateTime<Utc>,
    ) -> Result<LineChanges, OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "update",
            });
        }
        let total_amount = Self::validate(self.customer_id, self.shop_id, &lines)?;

        let mut kept: Vec<Option<u32>> = self.line_numbers.iter().copied().map(Some).collect();
        let mut next_line = self.next_line;
        let mut line_numbers = Vec::with_capacity(lines.len());
        let mut reserved = Vec::new();

        for line in &lines {
            let reuse = self
                .lines
                .iter()
                .zip(kept.iter_mut())
                .find(|(current, number)| number.is_some() && *current == line)
                .and_then(|(_, number)| number.take());

            let number = match reuse {
                Some(number) => number,
                None => {
                    let number = next_line;
                    next_line = next_line.checked_add(1).ok_or(OrderError::TooManyLines)?;
                    reserved.push((self.line_reference(number), line.clone()));
                    number
                }
            };
            line_numbers.push(number);
        }

        let released = kept
            .into_iter()
            .zip(&self.lines)
            .filter_map(|(number, line)| number.map(|n| (self.line_reference(n), line.clone())))
            .collect();

        self.lines = lines;
        self.line_numbers = line_numbers;
        self.next_line = next_line;
        self.total_amount = total_amount;
        self.updated_at = now;

        Ok(LineChanges { released, reserved })
    }

    fn transition(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

/// The reservations a line replacement gives up and takes on.
#[derive(Debug, Clone, PartialEq)]
pub struct LineChanges {
    pub released: Vec<(Reference, OrderLine)>,
    pub reserved: Vec<(Reference, OrderLine)>,
}

impl LineChanges {
    /// True when the new lines match the old ones exactly.
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.reserved.is_empty()
    }
}

impl Record for Order {
    const COLLECTION: Collection = Collection::Orders;

    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn status_name(&self) -> &'static str {
        self.status.as_str()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
