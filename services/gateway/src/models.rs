use serde::{Deserialize, Serialize};
use types::fill::{FillEvent, UserFill};
use types::order::Order;

/// Body of `POST /orders/post`
///
/// Fields default to zero values so shape problems surface as validation
/// errors instead of deserialization failures.
#[derive(Debug, Clone, Deserialize)]
pub struct PostLimitRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default, rename = "priceLevel")]
    pub price_level: i64,
    #[serde(default)]
    pub amount: i64,
    #[serde(default, rename = "isBid")]
    pub is_bid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostLimitResponse {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub fills: Vec<FillEvent>,
}

/// Body of `POST /orders/cancel`
#[derive(Debug, Clone, Deserialize)]
pub struct CancelLimitRequest {
    #[serde(default, rename = "orderId")]
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelLimitResponse {
    #[serde(rename = "SizeCancelled")]
    pub size_cancelled: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenOrdersResponse {
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FillsResponse {
    pub fills: Vec<UserFill>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_request_defaults_missing_fields() {
        let request: PostLimitRequest = serde_json::from_str("{}").unwrap();
        assert!(request.user.is_empty());
        assert_eq!(request.amount, 0);
        assert_eq!(request.price_level, 0);
        assert!(!request.is_bid);
    }

    #[test]
    fn test_cancel_response_field_name() {
        let response = CancelLimitResponse { size_cancelled: 7 };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["SizeCancelled"], serde_json::json!(7));
    }
}
