//! Match events and per-user fill history

use serde::{Deserialize, Serialize};

/// A single match emitted while posting a limit order
///
/// Fills appear in the order they were consumed: best price first for the
/// taker, FIFO within a price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    pub size: i64,
    pub price: i64,
}

/// One leg of a match, recorded on a user's fill history
///
/// Each match produces two of these: the taker leg (`is_maker == false`) on
/// the incoming order's user, and the maker leg (`is_maker == true`) on the
/// resting order's user. Self-trades record both legs for the same user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFill {
    pub counterparty: String,
    pub size: i64,
    #[serde(rename = "priceLevel")]
    pub price_level: i64,
    #[serde(rename = "isMaker")]
    pub is_maker: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_fill_wire_field_names() {
        let fill = UserFill {
            counterparty: "bob".to_string(),
            size: 3,
            price_level: 100,
            is_maker: true,
        };

        let json = serde_json::to_value(&fill).unwrap();
        assert_eq!(json["priceLevel"], serde_json::json!(100));
        assert_eq!(json["isMaker"], serde_json::json!(true));
        assert_eq!(json["counterparty"], serde_json::json!("bob"));
    }
}
