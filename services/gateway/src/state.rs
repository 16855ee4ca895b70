use matching_engine::OrderBook;
use replication::{Coordinator, ReplicationManager};
use reqwest::Client;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Shared application state
///
/// Three locks with distinct jobs: the engine lock protects book memory
/// (readers share, writers exclude), the coordinator's internal lock
/// protects log memory, and the write pipeline mutex serializes sequence
/// assignment against engine apply. Only the pipeline mutex is held across
/// peer RPCs; collapsing it with the coordinator lock would block `/state`
/// reads from peers during fan-out.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RwLock<OrderBook>>,
    pub coordinator: Arc<Coordinator>,
    pub replication: Arc<ReplicationManager>,
    pub write_pipeline: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let http_client = Client::new();
        Self {
            engine: Arc::new(RwLock::new(OrderBook::new())),
            replication: Arc::new(ReplicationManager::new(coordinator.clone(), http_client)),
            coordinator,
            write_pipeline: Arc::new(Mutex::new(())),
        }
    }
}
