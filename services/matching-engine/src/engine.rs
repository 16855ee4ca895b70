//! Matching engine core
//!
//! Owns both book sides, the order index, and the per-user fill history.
//! All methods are synchronous; callers provide exclusion (a single
//! read-write lock: queries share, post/cancel exclude).

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};
use types::fill::{FillEvent, UserFill};
use types::ids::OrderId;
use types::order::{Order, Side};

use crate::book::{AskBook, BidBook, PriceLevel};

/// Book-level errors
///
/// Post never fails on validated input; cancel can miss.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("order not found")]
    OrderNotFound,
}

/// Result of posting a limit order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostLimitResult {
    pub order_id: OrderId,
    /// Fills in consumption order: best price first, FIFO within a level
    pub fills: Vec<FillEvent>,
}

/// Where a resting order lives; the slot within the level is recovered by
/// scanning that level's FIFO queue.
#[derive(Debug, Clone, Copy)]
struct OrderLocation {
    side: Side,
    price_level: i64,
}

/// Price-time-priority order book
#[derive(Debug, Default)]
pub struct OrderBook {
    bids: BidBook,
    asks: AskBook,
    orders: HashMap<OrderId, OrderLocation>,
    fills_by_user: HashMap<String, Vec<UserFill>>,
}

impl OrderBook {
    /// Create a new empty book
    pub fn new() -> Self {
        Self {
            bids: BidBook::new(),
            asks: AskBook::new(),
            orders: HashMap::new(),
            fills_by_user: HashMap::new(),
        }
    }

    /// Post a limit order: match against the opposite side, then rest the
    /// remainder on the taker's own side.
    ///
    /// Self-trading is permitted; both legs are recorded on the user's fill
    /// history. Callers validate `amount > 0` and order-id uniqueness.
    pub fn post_limit(
        &mut self,
        user: &str,
        order_id: OrderId,
        price_level: i64,
        amount: i64,
        side: Side,
    ) -> PostLimitResult {
        let mut incoming = Order {
            user: user.to_string(),
            id: order_id,
            price_level,
            amount,
            side,
        };

        let fills = match side {
            Side::Bid => Self::match_bid_taker(
                &mut self.asks,
                &mut self.orders,
                &mut self.fills_by_user,
                &mut incoming,
            ),
            Side::Ask => Self::match_ask_taker(
                &mut self.bids,
                &mut self.orders,
                &mut self.fills_by_user,
                &mut incoming,
            ),
        };

        if incoming.amount > 0 {
            info!(
                user = %incoming.user,
                order_id = %incoming.id,
                price = incoming.price_level,
                amount = incoming.amount,
                side = incoming.side.as_str(),
                "resting order added"
            );
            self.rest(incoming);
        }

        PostLimitResult { order_id, fills }
    }

    /// Cancel a resting order, returning the size removed from the book
    pub fn cancel_limit(&mut self, order_id: &OrderId) -> Result<i64, BookError> {
        let location = self
            .orders
            .remove(order_id)
            .ok_or(BookError::OrderNotFound)?;

        let removed = match location.side {
            Side::Bid => {
                let removed = self
                    .bids
                    .level_mut(location.price_level)
                    .and_then(|level| level.remove(order_id));
                if self
                    .bids
                    .level_mut(location.price_level)
                    .is_some_and(|level| level.is_empty() || level.total_amount() <= 0)
                {
                    self.bids.remove_level(location.price_level);
                }
                removed
            }
            Side::Ask => {
                let removed = self
                    .asks
                    .level_mut(location.price_level)
                    .and_then(|level| level.remove(order_id));
                if self
                    .asks
                    .level_mut(location.price_level)
                    .is_some_and(|level| level.is_empty() || level.total_amount() <= 0)
                {
                    self.asks.remove_level(location.price_level);
                }
                removed
            }
        };

        let removed = removed.ok_or(BookError::OrderNotFound)?;
        info!(
            order_id = %order_id,
            size_cancelled = removed.amount,
            "order cancelled"
        );
        Ok(removed.amount)
    }

    /// Snapshot of a user's resting orders: bids first (descending price),
    /// then asks (ascending price), FIFO within each level.
    pub fn open_orders_for_user(&self, user: &str) -> Vec<Order> {
        if user.is_empty() {
            return Vec::new();
        }

        let mut orders = Vec::new();
        for (_, level) in self.bids.iter_levels() {
            orders.extend(
                level
                    .iter()
                    .filter(|order| order.user == user && order.amount > 0)
                    .cloned(),
            );
        }
        for (_, level) in self.asks.iter_levels() {
            orders.extend(
                level
                    .iter()
                    .filter(|order| order.user == user && order.amount > 0)
                    .cloned(),
            );
        }
        orders
    }

    /// Defensive copy of a user's fill history in insertion order
    pub fn fills_for_user(&self, user: &str) -> Vec<UserFill> {
        self.fills_by_user.get(user).cloned().unwrap_or_default()
    }

    /// Membership test on the resting-order index
    pub fn has_order(&self, order_id: &OrderId) -> bool {
        self.orders.contains_key(order_id)
    }

    /// Match an incoming bid against the ask side (implementation)
    ///
    /// Split borrows: book side, order index, and fill history are taken as
    /// separate fields so the level can be mutated while fills are recorded.
    fn match_bid_taker(
        asks: &mut AskBook,
        orders: &mut HashMap<OrderId, OrderLocation>,
        fills_by_user: &mut HashMap<String, Vec<UserFill>>,
        incoming: &mut Order,
    ) -> Vec<FillEvent> {
        let mut fills = Vec::new();

        while incoming.amount > 0 {
            let Some((price, level)) = asks.best_level_mut() else {
                break;
            };
            // A bid crosses asks priced at or below its limit
            if price > incoming.price_level {
                break;
            }

            if level.is_empty() || level.total_amount() <= 0 {
                Self::purge_level_index(orders, level);
                asks.remove_level(price);
                continue;
            }

            Self::consume_level(level, price, orders, fills_by_user, incoming, &mut fills);

            if level.is_empty() || level.total_amount() <= 0 {
                Self::purge_level_index(orders, level);
                asks.remove_level(price);
            }
        }

        fills
    }

    /// Match an incoming ask against the bid side (implementation)
    fn match_ask_taker(
        bids: &mut BidBook,
        orders: &mut HashMap<OrderId, OrderLocation>,
        fills_by_user: &mut HashMap<String, Vec<UserFill>>,
        incoming: &mut Order,
    ) -> Vec<FillEvent> {
        let mut fills = Vec::new();

        while incoming.amount > 0 {
            let Some((price, level)) = bids.best_level_mut() else {
                break;
            };
            // An ask crosses bids priced at or above its limit
            if price < incoming.price_level {
                break;
            }

            if level.is_empty() || level.total_amount() <= 0 {
                Self::purge_level_index(orders, level);
                bids.remove_level(price);
                continue;
            }

            Self::consume_level(level, price, orders, fills_by_user, incoming, &mut fills);

            if level.is_empty() || level.total_amount() <= 0 {
                Self::purge_level_index(orders, level);
                bids.remove_level(price);
            }
        }

        fills
    }

    /// Consume resting orders at one crossing level, head first
    fn consume_level(
        level: &mut PriceLevel,
        price: i64,
        orders: &mut HashMap<OrderId, OrderLocation>,
        fills_by_user: &mut HashMap<String, Vec<UserFill>>,
        incoming: &mut Order,
        fills: &mut Vec<FillEvent>,
    ) {
        while incoming.amount > 0 {
            let (maker_id, maker_user, maker_amount) = match level.front() {
                Some(maker) => (maker.id, maker.user.clone(), maker.amount),
                None => break,
            };

            if maker_amount <= 0 {
                level.pop_front();
                orders.remove(&maker_id);
                continue;
            }

            let matched = incoming.amount.min(maker_amount);
            fills.push(FillEvent {
                size: matched,
                price,
            });
            incoming.amount -= matched;
            let maker_remaining = level.reduce_front(matched).unwrap_or(0);

            debug!(
                user = %incoming.user,
                matched_with = %maker_user,
                side = incoming.side.as_str(),
                price,
                matched,
                remaining_incoming = incoming.amount,
                remaining_resting = maker_remaining,
                level_remaining = level.total_amount(),
                "orders matched"
            );

            Self::record_fill(fills_by_user, &incoming.user, &maker_user, matched, price, false);
            Self::record_fill(fills_by_user, &maker_user, &incoming.user, matched, price, true);

            if maker_remaining == 0 {
                level.pop_front();
                orders.remove(&maker_id);
            }
        }
    }

    /// Drop stale index entries before a level is removed wholesale
    fn purge_level_index(orders: &mut HashMap<OrderId, OrderLocation>, level: &PriceLevel) {
        for order in level.iter() {
            orders.remove(&order.id);
        }
    }

    fn rest(&mut self, order: Order) {
        self.orders.insert(
            order.id,
            OrderLocation {
                side: order.side,
                price_level: order.price_level,
            },
        );
        match order.side {
            Side::Bid => self.bids.insert(order),
            Side::Ask => self.asks.insert(order),
        }
    }

    fn record_fill(
        fills_by_user: &mut HashMap<String, Vec<UserFill>>,
        user: &str,
        counterparty: &str,
        size: i64,
        price_level: i64,
        is_maker: bool,
    ) {
        fills_by_user
            .entry(user.to_string())
            .or_default()
            .push(UserFill {
                counterparty: counterparty.to_string(),
                size,
                price_level,
                is_maker,
            });
    }

    /// Number of distinct price levels on the ask side
    pub fn ask_level_count(&self) -> usize {
        self.asks.level_count()
    }

    /// Number of distinct price levels on the bid side
    pub fn bid_level_count(&self) -> usize {
        self.bids.level_count()
    }
}
