//! Replication manager
//!
//! Wraps the coordinator with peer I/O: the primary's two-phase fan-out
//! under the quorum rule, the side-effect hook for committed entries, and
//! the read-repair fetch that bounds staleness before a read is served.
//! No coordinator lock is ever held across a peer RPC.

use futures::future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::error::ReplicationError;
use crate::protocol::{
    ReplicaState, ReplicaSyncResponse, ReplicationEntry, ReplicationRequest, ReplicationResponse,
    REQUEST_ID_HEADER,
};

/// Per-request deadline for prepare/commit fan-out
const REPLICATE_TIMEOUT: Duration = Duration::from_secs(1);
/// Per-request deadline for read-repair state and sync fetches
const READ_REPAIR_TIMEOUT: Duration = Duration::from_secs(3);

/// Primary-driven replication over HTTP peers
pub struct ReplicationManager {
    coordinator: Arc<Coordinator>,
    client: reqwest::Client,
    replicate_timeout: Duration,
    read_repair_timeout: Duration,
}

impl ReplicationManager {
    pub fn new(coordinator: Arc<Coordinator>, client: reqwest::Client) -> Self {
        Self {
            coordinator,
            client,
            replicate_timeout: REPLICATE_TIMEOUT,
            read_repair_timeout: READ_REPAIR_TIMEOUT,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Stage an entry locally, then replicate prepare to peers.
    ///
    /// If the fan-out misses quorum and this call made the local
    /// reservation, the reservation is rolled back before the error
    /// propagates.
    pub async fn prepare_entry(
        &self,
        request_id: &str,
        entry: &ReplicationEntry,
    ) -> Result<(), ReplicationError> {
        let prepared = self.coordinator.prepare_remote(entry)?;

        if let Err(err) = self
            .replicate_entries(request_id, std::slice::from_ref(entry), "prepare")
            .await
        {
            if prepared {
                self.coordinator.revert_sequence(entry.seq);
            }
            return Err(err);
        }

        Ok(())
    }

    /// Replicate commit intent to peers. The caller applies local side
    /// effects after quorum, and reverts on failure.
    pub async fn commit_entry(
        &self,
        request_id: &str,
        entry: &ReplicationEntry,
    ) -> Result<(), ReplicationError> {
        self.replicate_entries(request_id, std::slice::from_ref(entry), "commit")
            .await
    }

    /// Apply prepare on this replica only
    pub fn prepare_remote_entry(&self, entry: &ReplicationEntry) -> Result<bool, ReplicationError> {
        self.coordinator.prepare_remote(entry)
    }

    /// Commit an entry through the coordinator and run the injected side
    /// effect when it newly applied.
    ///
    /// Duplicates return `Ok(None)` without invoking the hook, which is
    /// what makes replay idempotent at the engine boundary.
    pub fn apply_remote_entry<T>(
        &self,
        entry: &ReplicationEntry,
        on_apply: impl FnOnce(&ReplicationEntry) -> T,
    ) -> Result<Option<T>, ReplicationError> {
        if self.coordinator.commit_remote(entry)? {
            Ok(Some(on_apply(entry)))
        } else {
            Ok(None)
        }
    }

    /// Fetch the entries needed to repair local state before a read.
    ///
    /// Polls every peer's state under a deadline; a quorum of responses is
    /// required. When the highest-applied peer is ahead of this node, its
    /// missing suffix is returned for the caller to replay under the write
    /// pipeline lock.
    pub async fn read_repair_entries(
        &self,
        request_id: &str,
    ) -> Result<Vec<ReplicationEntry>, ReplicationError> {
        let required = self.coordinator.required_peer_acks();
        if required == 0 {
            debug!("read repair: quorum not required (single node)");
            return Ok(Vec::new());
        }

        let peers = self.coordinator.peers();
        if peers.is_empty() {
            debug!("read repair: no peers configured, skipping freshness check");
            return Ok(Vec::new());
        }

        info!(
            required,
            peer_count = peers.len(),
            "read repair: starting freshness check"
        );

        let local_applied = self.coordinator.applied_seq();
        let states = future::join_all(
            peers
                .iter()
                .map(|peer| self.fetch_replica_state(request_id, peer)),
        )
        .await;

        let mut successes = 0;
        let mut highest_seq = local_applied;
        let mut highest_peer: Option<&str> = None;
        for (peer, state) in peers.iter().zip(states) {
            let Some(state) = state else { continue };
            successes += 1;
            debug!(peer = %peer, applied = state.applied_seq, "read repair: peer state");
            if state.applied_seq > highest_seq {
                highest_seq = state.applied_seq;
                highest_peer = Some(peer.as_str());
            }
        }

        if successes < required {
            warn!(required, got = successes, "read repair: state quorum not met");
            return Err(ReplicationError::QuorumNotMet {
                phase: "read",
                required,
                got: successes,
            });
        }

        let Some(peer) = highest_peer else {
            debug!(local_seq = local_applied, "read repair: local state is fresh enough");
            return Ok(Vec::new());
        };

        info!(
            local_seq = local_applied,
            highest_peer = %peer,
            highest_seq,
            "read repair: catch-up needed"
        );

        let entries = self.fetch_replica_sync(request_id, peer, local_applied).await?;
        info!(count = entries.len(), peer = %peer, "read repair: sync fetched entries");
        Ok(entries)
    }

    /// Fan one entry batch out to every peer and count accepted votes
    async fn replicate_entries(
        &self,
        request_id: &str,
        entries: &[ReplicationEntry],
        phase: &'static str,
    ) -> Result<(), ReplicationError> {
        let required = self.coordinator.required_peer_acks();
        if required == 0 {
            return Ok(());
        }

        let peers = self.coordinator.peers();
        let request = ReplicationRequest {
            entries: entries.to_vec(),
        };

        let votes = future::join_all(
            peers
                .iter()
                .map(|peer| self.post_replication_request(request_id, peer, phase, &request)),
        )
        .await;
        let got = votes.into_iter().filter(|accepted| *accepted).count();

        if got >= required {
            return Ok(());
        }
        Err(ReplicationError::QuorumNotMet {
            phase,
            required,
            got,
        })
    }

    /// One peer request is one quorum vote; any failure is a missing vote
    async fn post_replication_request(
        &self,
        request_id: &str,
        peer: &str,
        phase: &str,
        request: &ReplicationRequest,
    ) -> bool {
        let url = format!("{peer}/internal/replica/{phase}");
        let mut builder = self
            .client
            .post(&url)
            .timeout(self.replicate_timeout)
            .json(request);
        if !request_id.is_empty() {
            builder = builder.header(REQUEST_ID_HEADER, request_id);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(peer = %peer, phase, error = %err, "replication request failed");
                return false;
            }
        };

        if !response.status().is_success() {
            warn!(peer = %peer, phase, status = %response.status(), "peer rejected replication request");
            return false;
        }

        match response.json::<ReplicationResponse>().await {
            Ok(body) if body.accepted => true,
            Ok(body) => {
                warn!(peer = %peer, phase, last_seq = body.last_seq, "peer did not accept entry");
                false
            }
            Err(err) => {
                warn!(peer = %peer, phase, error = %err, "invalid peer response");
                false
            }
        }
    }

    async fn fetch_replica_state(&self, request_id: &str, peer: &str) -> Option<ReplicaState> {
        let url = format!("{peer}/internal/replica/state");
        let mut builder = self.client.get(&url).timeout(self.read_repair_timeout);
        if !request_id.is_empty() {
            builder = builder.header(REQUEST_ID_HEADER, request_id);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(peer = %peer, error = %err, "peer state request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(peer = %peer, status = %response.status(), "peer state request rejected");
            return None;
        }

        match response.json::<ReplicaState>().await {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(peer = %peer, error = %err, "invalid peer state response");
                None
            }
        }
    }

    async fn fetch_replica_sync(
        &self,
        request_id: &str,
        peer: &str,
        since: i64,
    ) -> Result<Vec<ReplicationEntry>, ReplicationError> {
        let url = format!("{peer}/internal/replica/sync");
        let mut builder = self
            .client
            .get(&url)
            .query(&[("since", since)])
            .timeout(self.read_repair_timeout);
        if !request_id.is_empty() {
            builder = builder.header(REQUEST_ID_HEADER, request_id);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ReplicationError::Peer(format!("sync request failed peer={peer}: {err}")))?;
        if !response.status().is_success() {
            return Err(ReplicationError::Peer(format!(
                "peer sync rejected peer={peer} status={}",
                response.status()
            )));
        }

        let body: ReplicaSyncResponse = response
            .json()
            .await
            .map_err(|err| ReplicationError::Peer(format!("invalid sync response peer={peer}: {err}")))?;
        Ok(body.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeRole;
    use types::ids::OrderId;

    fn single_node_manager() -> ReplicationManager {
        let coordinator = Arc::new(Coordinator::new(NodeRole::Primary, Vec::new(), ""));
        ReplicationManager::new(coordinator, reqwest::Client::new())
    }

    fn test_entry(seq: i64) -> ReplicationEntry {
        ReplicationEntry::post(seq, "alice", OrderId::new(), 101, 5, true)
    }

    #[tokio::test]
    async fn test_single_node_skips_fanout() {
        let manager = single_node_manager();

        let entry = test_entry(manager.coordinator().next_sequence());
        manager.prepare_entry("", &entry).await.unwrap();
        manager.commit_entry("", &entry).await.unwrap();

        let applied = manager
            .apply_remote_entry(&entry, |entry| entry.seq)
            .unwrap();
        assert_eq!(applied, Some(1));
        assert_eq!(manager.coordinator().applied_seq(), 1);
    }

    #[tokio::test]
    async fn test_prepare_entry_propagates_gap() {
        let manager = single_node_manager();

        let err = manager.prepare_entry("", &test_entry(5)).await.unwrap_err();
        assert_eq!(
            err,
            ReplicationError::SequenceGap {
                expected: 1,
                received: 5
            }
        );
    }

    #[test]
    fn test_apply_remote_entry_skips_hook_on_duplicate() {
        let manager = single_node_manager();

        let entry = test_entry(1);
        manager.coordinator().prepare_remote(&entry).unwrap();

        let mut invocations = 0;
        let first = manager
            .apply_remote_entry(&entry, |_| {
                invocations += 1;
            })
            .unwrap();
        assert!(first.is_some());

        // Replay: the coordinator reports a duplicate, the hook stays cold
        let second = manager
            .apply_remote_entry(&entry, |_| {
                invocations += 1;
            })
            .unwrap();
        assert!(second.is_none());
        assert_eq!(invocations, 1);
    }

    #[test]
    fn test_apply_remote_entry_requires_prepare() {
        let manager = single_node_manager();

        let err = manager
            .apply_remote_entry(&test_entry(1), |_| ())
            .unwrap_err();
        assert_eq!(err, ReplicationError::CommitBeforePrepare { seq: 1 });
    }
}
