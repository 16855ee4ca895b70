//! Price level implementation with FIFO queue
//!
//! A price level contains all orders resting at a single integer price.
//! Orders are maintained in FIFO (First-In-First-Out) order to enforce
//! time priority.

use std::collections::VecDeque;
use types::ids::OrderId;
use types::order::Order;

/// A price level containing orders at a specific price
///
/// Maintains strict FIFO ordering for time-priority matching, plus a cached
/// sum of the remaining amounts so depth queries never rescan the queue.
#[derive(Debug, Clone, Default)]
pub struct PriceLevel {
    /// Queue of orders at this price level (FIFO order)
    orders: VecDeque<Order>,
    /// Total remaining amount at this level
    total_amount: i64,
}

impl PriceLevel {
    /// Create a new empty price level
    pub fn new() -> Self {
        Self {
            orders: VecDeque::new(),
            total_amount: 0,
        }
    }

    /// Push an order at the back of the queue (time priority)
    pub fn push(&mut self, order: Order) {
        self.total_amount += order.amount;
        self.orders.push_back(order);
    }

    /// Peek at the front order without removing it
    pub fn front(&self) -> Option<&Order> {
        self.orders.front()
    }

    /// Pop the front order from the queue
    pub fn pop_front(&mut self) -> Option<Order> {
        let order = self.orders.pop_front()?;
        self.total_amount -= order.amount;
        if self.total_amount < 0 {
            self.total_amount = 0;
        }
        Some(order)
    }

    /// Reduce the front order's remaining amount after a partial fill
    ///
    /// Returns the front order's remaining amount, or None when the level
    /// is empty. The order stays queued even at zero; the matching loop
    /// evicts it.
    pub fn reduce_front(&mut self, by: i64) -> Option<i64> {
        let order = self.orders.front_mut()?;
        order.amount -= by;
        self.total_amount -= by;
        if self.total_amount < 0 {
            self.total_amount = 0;
        }
        Some(order.amount)
    }

    /// Remove an order from the queue by id
    ///
    /// The position within the level is recovered by scanning the FIFO
    /// queue. Returns the removed order, or None if not found.
    pub fn remove(&mut self, order_id: &OrderId) -> Option<Order> {
        let position = self.orders.iter().position(|order| &order.id == order_id)?;
        let removed = self.orders.remove(position)?;
        self.total_amount -= removed.amount;
        if self.total_amount < 0 {
            self.total_amount = 0;
        }
        Some(removed)
    }

    /// Iterate the resting orders in FIFO order
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    /// Check if the price level is empty
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Get the total remaining amount at this price level
    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    /// Get the number of orders at this level
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}
