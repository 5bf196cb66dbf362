use crate::domain::{MachineService, QueryService};
use common::cache::MetadataCache;
use common::domain::{MachineRepository, TimeSeriesStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read and write services for machine metadata and history, sharing one
/// metadata cache
#[derive(Clone)]
pub struct MachineApi {
    pub machine_service: Arc<MachineService>,
    pub query_service: Arc<QueryService>,
}

impl MachineApi {
    pub fn new(
        repository: Arc<dyn MachineRepository>,
        store: Arc<dyn TimeSeriesStore>,
        cache: MetadataCache,
    ) -> Self {
        debug!("initializing machine API module");

        let machine_service = Arc::new(MachineService::new(repository, cache));
        let query_service = Arc::new(QueryService::new(Arc::clone(&machine_service), store));

        Self {
            machine_service,
            query_service,
        }
    }

    /// Preload machine metadata. A failure only costs cold reads, so it is
    /// logged and not returned.
    pub async fn warm_cache(&self) {
        match self.machine_service.warm_cache().await {
            Ok(count) => info!(machines = count, "machine cache warmed"),
            Err(e) => warn!(error = %e, "failed to warm machine cache"),
        }
    }
}
