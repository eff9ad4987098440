use std::sync::Arc;

use crate::cep::match_index::MatchIndex;
use crate::cep::registry::CepRegistry;
use crate::fsm::bridge::FsmBridge;
use crate::runtime::error_task::TaskCatalog;
use crate::runtime::lock::LockManager;
use crate::runtime::storage::TaskStore;
use crate::runtime::timers::TimerRegistry;
use crate::sync::SyncProtocol;

/// Process-scoped collaborators handed to every CEP and task-type handler.
/// Explicit objects constructed at process start and injected. No globals,
/// no implicit reset, teardown at shutdown.
///
/// Cheap to clone (just Arcs).
#[derive(Clone)]
pub struct HubContext {
    pub store: Arc<dyn TaskStore>,
    pub locks: Arc<LockManager>,
    pub timers: Arc<TimerRegistry>,
    pub registry: Arc<CepRegistry>,
    pub match_index: Arc<MatchIndex>,
    pub sync: Arc<SyncProtocol>,
    pub fsm: Arc<FsmBridge>,
    pub catalog: Arc<TaskCatalog>,
}
