//! Order and book-side types

use crate::ids::OrderId;
use serde::{Deserialize, Serialize};

/// Order side (bid or ask)
///
/// The wire format carries the side as an `isBid` boolean; this enum is the
/// in-process representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    pub fn is_bid(&self) -> bool {
        matches!(self, Side::Bid)
    }

    pub fn from_is_bid(is_bid: bool) -> Self {
        if is_bid {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    /// Lowercase label for log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// A limit order resting in (or entering) the book
///
/// `amount` is the remaining size; it only decreases while the order rests.
/// Prices are integer minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub user: String,
    #[serde(rename = "orderId")]
    pub id: OrderId,
    #[serde(rename = "priceLevel")]
    pub price_level: i64,
    pub amount: i64,
    #[serde(rename = "isBid", with = "side_as_is_bid")]
    pub side: Side,
}

/// Serde adapter: `Side` <-> the wire's `isBid` boolean
mod side_as_is_bid {
    use super::Side;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(side: &Side, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(side.is_bid())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Side, D::Error> {
        bool::deserialize(deserializer).map(Side::from_is_bid)
    }
}
