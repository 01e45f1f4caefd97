use std::sync::Arc;

use logport_coalescer::Coalescer;
use logport_stream::StreamProducer;
use logport_worker::HealthRegistry;

/// Application state shared across all requests.
#[derive(Clone)]
pub(crate) struct AppState {
    pub coalescer: Arc<Coalescer<StreamProducer>>,
    pub health: Arc<HealthRegistry>,
    pub max_payload_bytes: usize,
}
