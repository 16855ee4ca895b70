//! Replication error taxonomy

use thiserror::Error;

/// Errors produced by the coordinator state machine and the peer fan-out
///
/// Gap, mismatch, and commit-before-prepare are per-payload faults a caller
/// must not retry verbatim; quorum and peer failures are transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error("replication sequence gap: expected {expected} got {received}")]
    SequenceGap { expected: i64, received: i64 },

    #[error("prepared entry mismatch for seq {seq}")]
    PrepareMismatch { seq: i64 },

    #[error("commit before prepare for seq {seq}")]
    CommitBeforePrepare { seq: i64 },

    #[error("replication {phase} quorum not met: required={required} got={got}")]
    QuorumNotMet {
        phase: &'static str,
        required: usize,
        got: usize,
    },

    #[error("peer request failed: {0}")]
    Peer(String),
}
