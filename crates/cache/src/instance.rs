use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use lmr_adapters::BackendAdapter;
use lmr_domain::model::{LoadedInstanceInfo, ModelType, Recipe, RecipeOptions};
use lmr_supervisor::ProcessHandle;

struct MutableState {
    last_use: Instant,
    last_use_epoch_ms: i64,
    inflight: u32,
    stopping: bool,
}

/// A running backend instance. `last_use`/`inflight` live under their own
/// lock so request-path bookkeeping never touches the cache's global lock.
pub struct LoadedInstance {
    pub model_id: String,
    pub model_type: ModelType,
    pub recipe: Recipe,
    pub adapter: Arc<dyn BackendAdapter>,
    pub process: Arc<ProcessHandle>,
    pub pid: u32,
    pub port: u16,
    pub backend_url: String,
    pub recipe_options: RecipeOptions,
    state: Mutex<MutableState>,
    /// Shared with the owning `LoadCoordinator`; woken whenever `inflight`
    /// drops to 0 so a caller blocked on capacity can recheck immediately
    /// instead of waiting out the full timeout.
    capacity_notify: Arc<Notify>,
}

impl LoadedInstance {
    pub fn new(
        model_id: String,
        model_type: ModelType,
        recipe: Recipe,
        adapter: Arc<dyn BackendAdapter>,
        process: Arc<ProcessHandle>,
        pid: u32,
        port: u16,
        recipe_options: RecipeOptions,
        capacity_notify: Arc<Notify>,
    ) -> Arc<Self> {
        Arc::new(Self {
            model_id,
            model_type,
            recipe,
            adapter,
            process,
            pid,
            port,
            backend_url: format!("http://127.0.0.1:{port}"),
            recipe_options,
            state: Mutex::new(MutableState {
                last_use: Instant::now(),
                last_use_epoch_ms: chrono::Utc::now().timestamp_millis(),
                inflight: 0,
                stopping: false,
            }),
            capacity_notify,
        })
    }

    pub fn inflight(&self) -> u32 {
        self.state.lock().inflight
    }

    pub fn last_use(&self) -> Instant {
        self.state.lock().last_use
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().stopping
    }

    /// Marks the instance as refusing new acquires. Returns `false` if it
    /// was already stopping (so a caller can detect a duplicate eviction
    /// attempt).
    pub fn mark_stopping(&self) -> bool {
        let mut s = self.state.lock();
        if s.stopping {
            return false;
        }
        s.stopping = true;
        true
    }

    /// Reverts a `mark_stopping` when eviction is refused (inflight never
    /// drained within the wait budget), making the instance acquirable
    /// again.
    pub fn unmark_stopping(&self) {
        self.state.lock().stopping = false;
    }

    pub fn snapshot(&self) -> LoadedInstanceInfo {
        let s = self.state.lock();
        LoadedInstanceInfo {
            model_id: self.model_id.clone(),
            model_type: self.model_type,
            recipe: self.recipe,
            pid: self.pid,
            port: self.port,
            last_use_epoch_ms: s.last_use_epoch_ms,
            inflight: s.inflight,
            recipe_options: self.recipe_options.clone(),
        }
    }

    /// Increments `inflight` and refreshes `last_use`, returning a guard
    /// that decrements `inflight` on drop. Call only on the fast path of
    /// `acquire`, after confirming the instance is not `stopping`.
    pub fn acquire(self: &Arc<Self>) -> Release {
        {
            let mut s = self.state.lock();
            s.inflight += 1;
            s.last_use = Instant::now();
            s.last_use_epoch_ms = chrono::Utc::now().timestamp_millis();
        }
        Release {
            instance: self.clone(),
        }
    }
}

/// Decrements the owning instance's `inflight` count on drop. Never tears
/// the instance down itself; eviction is a separate, explicit decision.
pub struct Release {
    instance: Arc<LoadedInstance>,
}

impl Drop for Release {
    fn drop(&mut self) {
        let became_idle = {
            let mut s = self.instance.state.lock();
            s.inflight = s.inflight.saturating_sub(1);
            s.inflight == 0
        };
        if became_idle {
            self.instance.capacity_notify.notify_waiters();
        }
    }
}
