//! Replication coordinator
//!
//! Pure in-memory state machine over the sequence space. Every sequence is
//! in exactly one of four states: unused (`> next_seq`), reserved locally,
//! prepared, or committed. All transitions run under one write lock which
//! is never held across I/O; prepare leases expire lazily at the next
//! prepare or commit call, so no background task is needed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ReplicationError;
use crate::protocol::{NodeRole, ReplicaState, ReplicationEntry};

/// How long a prepared-but-uncommitted slot stays reserved on a node
pub const DEFAULT_PREPARE_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinator over the replication log
///
/// Role, primary URL, and peer list are fixed for the process lifetime.
pub struct Coordinator {
    role: NodeRole,
    primary: String,
    peers: Vec<String>,
    state: RwLock<LogState>,
}

#[derive(Debug)]
struct LogState {
    /// Highest sequence ever reserved on this node
    next_seq: i64,
    /// Highest committed contiguous sequence
    applied: i64,
    /// Committed entries, densely keyed 1..=applied
    log: BTreeMap<i64, ReplicationEntry>,
    /// Prepared-but-uncommitted entries, keys strictly above `applied`
    prepared: HashMap<i64, ReplicationEntry>,
    prepared_at: HashMap<i64, Instant>,
    /// Max prepared key, 0 when none
    prepared_seq: i64,
    prepare_timeout: Duration,
}

impl Coordinator {
    pub fn new(role: NodeRole, peers: Vec<String>, primary: impl Into<String>) -> Self {
        Self {
            role,
            primary: primary.into().trim().trim_end_matches('/').to_string(),
            peers: normalize_peer_urls(peers),
            state: RwLock::new(LogState {
                next_seq: 0,
                applied: 0,
                log: BTreeMap::new(),
                prepared: HashMap::new(),
                prepared_at: HashMap::new(),
                prepared_seq: 0,
                prepare_timeout: DEFAULT_PREPARE_TIMEOUT,
            }),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn can_accept_write(&self) -> bool {
        self.role.is_primary()
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Peer acks needed for quorum: a strict majority of the cluster
    /// (peers plus this node) minus this node's own vote. Zero peers means
    /// single-node mode.
    pub fn required_peer_acks(&self) -> usize {
        let total = self.peers.len() + 1;
        if total <= 1 {
            0
        } else {
            total / 2
        }
    }

    /// Override the prepare lease; used by tests and startup configuration
    pub fn set_prepare_timeout(&self, timeout: Duration) {
        self.state.write().expect("coordinator lock poisoned").prepare_timeout = timeout;
    }

    /// Atomically reserve the next sequence. Only the primary calls this,
    /// under the write pipeline lock.
    pub fn next_sequence(&self) -> i64 {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        state.next_seq += 1;
        state.next_seq
    }

    /// Validate and stage one replicated entry.
    ///
    /// Returns `Ok(false)` for superseded or duplicate entries, `Ok(true)`
    /// when the entry was newly prepared.
    pub fn prepare_remote(&self, entry: &ReplicationEntry) -> Result<bool, ReplicationError> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        state.expire_prepared();

        if entry.seq <= state.applied {
            return Ok(false);
        }

        if let Some(existing) = state.prepared.get(&entry.seq) {
            if existing == entry {
                return Ok(false);
            }
            return Err(ReplicationError::PrepareMismatch { seq: entry.seq });
        }

        let expected = state.applied + 1;
        if entry.seq != expected {
            return Err(ReplicationError::SequenceGap {
                expected,
                received: entry.seq,
            });
        }

        state.prepared.insert(entry.seq, entry.clone());
        state.prepared_at.insert(entry.seq, Instant::now());
        if entry.seq > state.prepared_seq {
            state.prepared_seq = entry.seq;
        }
        Ok(true)
    }

    /// Move a prepared entry into the committed log.
    ///
    /// Returns `Ok(false)` for entries at or below the applied watermark
    /// (duplicate replay), `Ok(true)` when the entry was newly committed.
    pub fn commit_remote(&self, entry: &ReplicationEntry) -> Result<bool, ReplicationError> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        state.expire_prepared();

        if entry.seq <= state.applied {
            return Ok(false);
        }

        let expected = state.applied + 1;
        if entry.seq != expected {
            return Err(ReplicationError::SequenceGap {
                expected,
                received: entry.seq,
            });
        }

        match state.prepared.get(&entry.seq) {
            None => return Err(ReplicationError::CommitBeforePrepare { seq: entry.seq }),
            Some(prepared) if prepared != entry => {
                return Err(ReplicationError::PrepareMismatch { seq: entry.seq });
            }
            Some(_) => {}
        }

        state.prepared.remove(&entry.seq);
        state.prepared_at.remove(&entry.seq);
        state.log.insert(entry.seq, entry.clone());
        state.applied = entry.seq;
        if entry.seq > state.next_seq {
            state.next_seq = entry.seq;
        }
        state.recompute_prepared_seq();
        Ok(true)
    }

    /// Best-effort rollback of a reserved-but-unreplicated sequence.
    ///
    /// Refuses only when the sequence is unused, non-positive, or already
    /// committed; abandoned prepares on peers are covered by the lease.
    pub fn revert_sequence(&self, seq: i64) {
        if seq <= 0 {
            return;
        }

        let mut state = self.state.write().expect("coordinator lock poisoned");
        if seq > state.next_seq || seq <= state.applied {
            return;
        }

        state.prepared.remove(&seq);
        state.prepared_at.remove(&seq);
        state.log.remove(&seq);
        state.next_seq = seq - 1;
        state.recompute_prepared_seq();
    }

    pub fn state(&self) -> ReplicaState {
        let state = self.state.read().expect("coordinator lock poisoned");
        ReplicaState {
            role: self.role,
            last_seq: state.next_seq,
            applied_seq: state.applied,
            peer_count: self.peers.len(),
            primary: self.primary.clone(),
        }
    }

    pub fn applied_seq(&self) -> i64 {
        self.state.read().expect("coordinator lock poisoned").applied
    }

    /// Committed entries with seq strictly greater than `seq`, ascending
    pub fn entries_since(&self, seq: i64) -> Vec<ReplicationEntry> {
        let state = self.state.read().expect("coordinator lock poisoned");
        state
            .log
            .range((Bound::Excluded(seq), Bound::Unbounded))
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}

impl LogState {
    /// Lazily drop prepared entries whose lease has run out. An age equal
    /// to the timeout already counts as expired.
    fn expire_prepared(&mut self) {
        if self.prepared_at.is_empty() {
            return;
        }

        let now = Instant::now();
        let timeout = self.prepare_timeout;
        let expired: Vec<i64> = self
            .prepared_at
            .iter()
            .filter(|(_, prepared_at)| now.duration_since(**prepared_at) >= timeout)
            .map(|(seq, _)| *seq)
            .collect();

        if expired.is_empty() {
            return;
        }

        for seq in &expired {
            self.prepared.remove(seq);
            self.prepared_at.remove(seq);
            warn!(seq, "prepared entry expired before commit");
        }
        self.recompute_prepared_seq();
    }

    fn recompute_prepared_seq(&mut self) {
        self.prepared_seq = self.prepared.keys().copied().max().unwrap_or(0);
    }
}

fn normalize_peer_urls(peers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(peers.len());
    for peer in peers {
        let trimmed = peer.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() || !seen.insert(trimmed.clone()) {
            continue;
        }
        normalized.push(trimmed);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::OrderId;

    fn test_entry(seq: i64) -> ReplicationEntry {
        ReplicationEntry::post(seq, "alice", OrderId::new(), 101, 5, true)
    }

    fn test_coordinator() -> Coordinator {
        Coordinator::new(
            NodeRole::Primary,
            vec!["http://peer1".to_string(), "http://peer2".to_string()],
            "http://primary",
        )
    }

    #[test]
    fn test_prepare_commit_ordering() {
        let coordinator = test_coordinator();

        let entry1 = test_entry(1);
        assert!(coordinator.prepare_remote(&entry1).unwrap());
        assert!(coordinator.commit_remote(&entry1).unwrap());

        // Gap: applied is 1, so seq 3 is rejected with expected 2
        let entry3 = test_entry(3);
        assert_eq!(
            coordinator.prepare_remote(&entry3).unwrap_err(),
            ReplicationError::SequenceGap {
                expected: 2,
                received: 3
            }
        );

        let entry2 = test_entry(2);
        assert!(coordinator.prepare_remote(&entry2).unwrap());
        assert!(coordinator.commit_remote(&entry2).unwrap());
        assert_eq!(coordinator.applied_seq(), 2);
    }

    #[test]
    fn test_prepare_gap_from_empty_log() {
        let coordinator = test_coordinator();

        assert_eq!(
            coordinator.prepare_remote(&test_entry(3)).unwrap_err(),
            ReplicationError::SequenceGap {
                expected: 1,
                received: 3
            }
        );

        assert!(coordinator.prepare_remote(&test_entry(1)).unwrap());

        // Still a gap: seq 1 is prepared, not applied
        assert_eq!(
            coordinator.prepare_remote(&test_entry(3)).unwrap_err(),
            ReplicationError::SequenceGap {
                expected: 2,
                received: 3
            }
        );
    }

    #[test]
    fn test_prepare_duplicate_suppression() {
        let coordinator = test_coordinator();

        let entry = test_entry(1);
        assert!(coordinator.prepare_remote(&entry).unwrap());
        assert!(
            !coordinator.prepare_remote(&entry).unwrap(),
            "identical replay must not re-reserve the sequence"
        );

        let mut different = entry.clone();
        different.user = "bob".to_string();
        assert_eq!(
            coordinator.prepare_remote(&different).unwrap_err(),
            ReplicationError::PrepareMismatch { seq: 1 }
        );
    }

    #[test]
    fn test_commit_before_prepare_is_rejected() {
        let coordinator = test_coordinator();

        assert_eq!(
            coordinator.commit_remote(&test_entry(1)).unwrap_err(),
            ReplicationError::CommitBeforePrepare { seq: 1 }
        );
    }

    #[test]
    fn test_commit_payload_must_match_prepared() {
        let coordinator = test_coordinator();

        let entry = test_entry(1);
        coordinator.prepare_remote(&entry).unwrap();

        let mut different = entry.clone();
        different.amount = 99;
        assert_eq!(
            coordinator.commit_remote(&different).unwrap_err(),
            ReplicationError::PrepareMismatch { seq: 1 }
        );
    }

    #[test]
    fn test_committed_replay_is_idempotent() {
        let coordinator = test_coordinator();

        let entry = test_entry(1);
        coordinator.prepare_remote(&entry).unwrap();
        assert!(coordinator.commit_remote(&entry).unwrap());

        assert!(!coordinator.prepare_remote(&entry).unwrap());
        assert!(!coordinator.commit_remote(&entry).unwrap());
        assert_eq!(coordinator.applied_seq(), 1);
    }

    #[test]
    fn test_prepare_lease_expiry_then_replay() {
        let coordinator = test_coordinator();
        coordinator.set_prepare_timeout(Duration::from_millis(20));

        let entry = test_entry(1);
        assert!(coordinator.prepare_remote(&entry).unwrap());

        std::thread::sleep(Duration::from_millis(25));

        // The lease ran out, so the commit finds no matching prepare
        assert_eq!(
            coordinator.commit_remote(&entry).unwrap_err(),
            ReplicationError::CommitBeforePrepare { seq: 1 }
        );

        // The same sequence can be prepared and committed again
        assert!(coordinator.prepare_remote(&entry).unwrap());
        assert!(coordinator.commit_remote(&entry).unwrap());
        assert_eq!(coordinator.applied_seq(), 1);
    }

    #[test]
    fn test_mixed_transitions_keep_log_dense() {
        let coordinator = test_coordinator();

        for seq in 1..=5 {
            let entry = test_entry(seq);
            // Sprinkle in duplicate and out-of-order noise
            let _ = coordinator.prepare_remote(&test_entry(seq + 2));
            coordinator.prepare_remote(&entry).unwrap();
            let _ = coordinator.prepare_remote(&entry);
            coordinator.commit_remote(&entry).unwrap();
            let _ = coordinator.commit_remote(&entry);
        }

        let state = coordinator.state.read().unwrap();
        assert!(state.applied <= state.next_seq);
        let keys: Vec<i64> = state.log.keys().copied().collect();
        assert_eq!(keys, (1..=state.applied).collect::<Vec<i64>>());
        assert!(state.prepared.keys().all(|seq| *seq > state.applied));
        for seq in state.prepared.keys() {
            assert!(state.prepared_at.contains_key(seq));
        }
    }

    #[test]
    fn test_revert_sequence_releases_reservation() {
        let coordinator = test_coordinator();

        let seq = coordinator.next_sequence();
        assert_eq!(seq, 1);
        let entry = test_entry(seq);
        coordinator.prepare_remote(&entry).unwrap();

        coordinator.revert_sequence(seq);
        assert_eq!(coordinator.state().last_seq, 0);

        // The slot is free again
        assert!(coordinator.prepare_remote(&entry).unwrap());
        assert!(coordinator.commit_remote(&entry).unwrap());
    }

    #[test]
    fn test_revert_sequence_never_touches_committed() {
        let coordinator = test_coordinator();

        let entry = test_entry(1);
        coordinator.prepare_remote(&entry).unwrap();
        coordinator.commit_remote(&entry).unwrap();

        coordinator.revert_sequence(1);
        assert_eq!(coordinator.applied_seq(), 1);
        assert_eq!(coordinator.entries_since(0).len(), 1);

        // Out-of-range requests are no-ops too
        coordinator.revert_sequence(0);
        coordinator.revert_sequence(99);
        assert_eq!(coordinator.state().last_seq, 1);
    }

    #[test]
    fn test_entries_since_is_ascending_suffix() {
        let coordinator = test_coordinator();

        for seq in 1..=4 {
            let entry = test_entry(seq);
            coordinator.prepare_remote(&entry).unwrap();
            coordinator.commit_remote(&entry).unwrap();
        }

        let entries = coordinator.entries_since(2);
        let seqs: Vec<i64> = entries.iter().map(|entry| entry.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(coordinator.entries_since(4).is_empty());
    }

    #[test]
    fn test_commit_bumps_next_seq_on_secondary() {
        let coordinator = Coordinator::new(NodeRole::Secondary, Vec::new(), "http://primary");

        let entry = test_entry(1);
        coordinator.prepare_remote(&entry).unwrap();
        coordinator.commit_remote(&entry).unwrap();

        let state = coordinator.state();
        assert_eq!(state.last_seq, 1);
        assert_eq!(state.applied_seq, 1);
    }

    #[test]
    fn test_required_peer_acks_table() {
        let cases = [(0, 0), (1, 1), (2, 1), (3, 2), (4, 2), (5, 3)];
        for (peer_count, expected) in cases {
            let peers = (0..peer_count)
                .map(|index| format!("http://peer{index}"))
                .collect();
            let coordinator = Coordinator::new(NodeRole::Primary, peers, "");
            assert_eq!(
                coordinator.required_peer_acks(),
                expected,
                "peer_count={peer_count}"
            );
        }
    }

    #[test]
    fn test_peer_urls_are_normalized() {
        let coordinator = Coordinator::new(
            NodeRole::Primary,
            vec![
                " http://peer1/ ".to_string(),
                "http://peer1".to_string(),
                String::new(),
                "http://peer2".to_string(),
            ],
            "http://primary/",
        );

        assert_eq!(coordinator.peers(), ["http://peer1", "http://peer2"]);
        assert_eq!(coordinator.primary(), "http://primary");
    }
}
