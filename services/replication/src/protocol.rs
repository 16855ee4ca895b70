//! Replication protocol types
//!
//! Wire shapes shared by the replica endpoints and the peer fan-out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use types::ids::OrderId;

/// Request-id header minted by the gateway and forwarded on every peer RPC
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Role of a node in the cluster
///
/// Only the primary accepts client writes; both roles accept replication
/// RPCs. Roles are fixed per process; promotion is an out-of-band restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Secondary,
}

impl NodeRole {
    pub fn is_primary(&self) -> bool {
        matches!(self, NodeRole::Primary)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Secondary => write!(f, "secondary"),
        }
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "primary" => Ok(NodeRole::Primary),
            "secondary" => Ok(NodeRole::Secondary),
            other => Err(format!(
                "invalid mode {other:?}, expected primary or secondary"
            )),
        }
    }
}

/// Kind of replicated write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    #[serde(rename = "post_limit")]
    Post,
    #[serde(rename = "cancel_limit")]
    Cancel,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteKind::Post => write!(f, "post_limit"),
            WriteKind::Cancel => write!(f, "cancel_limit"),
        }
    }
}

/// One totally-ordered replicated write
///
/// For cancels only `seq`, `op_id`, `kind`, and `order_id` are significant;
/// the remaining payload fields stay zero/empty and are omitted on the wire.
/// Equality compares every field, which is what duplicate suppression and
/// mismatch detection rely on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationEntry {
    pub seq: i64,
    pub op_id: String,
    #[serde(rename = "type")]
    pub kind: WriteKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub price_level: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub amount: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_bid: bool,
}

impl ReplicationEntry {
    /// Entry for a post-limit write
    pub fn post(
        seq: i64,
        user: impl Into<String>,
        order_id: OrderId,
        price_level: i64,
        amount: i64,
        is_bid: bool,
    ) -> Self {
        Self {
            seq,
            op_id: order_id.to_string(),
            kind: WriteKind::Post,
            user: user.into(),
            order_id,
            price_level,
            amount,
            is_bid,
        }
    }

    /// Entry for a cancel-limit write
    pub fn cancel(seq: i64, order_id: OrderId) -> Self {
        Self {
            seq,
            op_id: order_id.to_string(),
            kind: WriteKind::Cancel,
            user: String::new(),
            order_id,
            price_level: 0,
            amount: 0,
            is_bid: false,
        }
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Batch body for the prepare and commit endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRequest {
    pub entries: Vec<ReplicationEntry>,
}

/// Acknowledgement from a replica; one accepted reply is one quorum vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationResponse {
    pub accepted: bool,
    pub last_seq: i64,
}

/// Snapshot of a node's replication state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaState {
    pub role: NodeRole,
    pub last_seq: i64,
    pub applied_seq: i64,
    pub peer_count: usize,
    pub primary: String,
}

/// Committed entries with seq greater than the requested watermark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSyncResponse {
    pub entries: Vec<ReplicationEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_role_parses_case_insensitive() {
        assert_eq!("primary".parse::<NodeRole>().unwrap(), NodeRole::Primary);
        assert_eq!("SECONDARY".parse::<NodeRole>().unwrap(), NodeRole::Secondary);
        assert!("leader".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_post_entry_wire_shape() {
        let order_id = OrderId::new();
        let entry = ReplicationEntry::post(3, "alice", order_id, 101, 5, true);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["seq"], serde_json::json!(3));
        assert_eq!(json["type"], serde_json::json!("post_limit"));
        assert_eq!(json["user"], serde_json::json!("alice"));
        assert_eq!(json["priceLevel"], serde_json::json!(101));
        assert_eq!(json["isBid"], serde_json::json!(true));
        assert_eq!(json["opId"], serde_json::json!(order_id.to_string()));

        let back: ReplicationEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_cancel_entry_omits_empty_payload_fields() {
        let entry = ReplicationEntry::cancel(7, OrderId::new());
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["type"], serde_json::json!("cancel_limit"));
        assert!(json.get("user").is_none());
        assert!(json.get("priceLevel").is_none());
        assert!(json.get("amount").is_none());
        assert!(json.get("isBid").is_none());
    }

    #[test]
    fn test_entry_equality_is_field_by_field() {
        let order_id = OrderId::new();
        let entry = ReplicationEntry::post(1, "alice", order_id, 101, 5, true);
        let mut other = entry.clone();
        assert_eq!(entry, other);

        other.user = "bob".to_string();
        assert_ne!(entry, other);
    }
}
