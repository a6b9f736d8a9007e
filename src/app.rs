//! The application container: every handler reaches the rest of the
//! system only through this struct, injected via `web::Data<AppState>`.
//! No module-level singletons.

use crate::profile::ProfileUpdater;
use crate::recommend::Recommender;
use crate::scoring::ScoringEngine;
use crate::store::ContentStore;
use crate::upstream::UpstreamClient;
use crate::workers::WorkQueue;
use std::sync::Arc;

pub struct AppState {
    pub store: Arc<dyn ContentStore>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub scoring: Arc<ScoringEngine>,
    pub profile_updater: Arc<ProfileUpdater>,
    pub recommender: Arc<Recommender>,
    pub work_queue: WorkQueue,
}
