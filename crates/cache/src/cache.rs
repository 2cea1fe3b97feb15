use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, Notify};

use lmr_adapters::{adapter_for, BackendAdapter};
use lmr_domain::config::Config;
use lmr_domain::error::{Error, Result};
use lmr_domain::model::{ModelInfo, ModelType, Recipe, RecipeOptions};
use lmr_registry::ModelRegistry;
use lmr_supervisor::{LogSink, NullSink};

use crate::instance::{LoadedInstance, Release};
use crate::port::choose_free_port;

/// How a `LoadCoordinator` turns a recipe into a concrete adapter.
/// Overridable so tests can inject `lmr_adapters::FakeAdapter` instead of
/// spawning real engine binaries.
pub type AdapterFactory = Arc<dyn Fn(Recipe, &Path) -> Arc<dyn BackendAdapter> + Send + Sync>;

fn default_adapter_factory() -> AdapterFactory {
    Arc::new(|recipe, root| adapter_for(recipe, root))
}

const READINESS_OVERALL_BUDGET: Duration = Duration::from_secs(60);
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READINESS_NPU_MULTIPLIER: u32 = 10;
const EVICT_INFLIGHT_WAIT: Duration = Duration::from_secs(30);
const CAPACITY_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait budgets the coordinator otherwise hardcodes. Overridable so tests
/// exercising timeout paths don't need to run for 30-60 real seconds.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub readiness_budget: Duration,
    pub readiness_poll_interval: Duration,
    pub evict_inflight_wait: Duration,
    pub capacity_wait_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            readiness_budget: READINESS_OVERALL_BUDGET,
            readiness_poll_interval: READINESS_POLL_INTERVAL,
            evict_inflight_wait: EVICT_INFLIGHT_WAIT,
            capacity_wait_timeout: CAPACITY_WAIT_TIMEOUT,
        }
    }
}

/// Owns every `LoadedInstance`, serializes loads per `model_id`, and
/// enforces per-type capacity and NPU exclusivity. The only component that
/// mutates cache structure; forwarding paths never touch it beyond the
/// lightweight `acquire`/`Release` pair.
pub struct LoadCoordinator {
    registry: Arc<ModelRegistry>,
    config: Config,
    adapters_root: PathBuf,
    instances: RwLock<HashMap<String, Arc<LoadedInstance>>>,
    type_lru: RwLock<HashMap<ModelType, VecDeque<String>>>,
    load_locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    capacity_notify: Arc<Notify>,
    adapter_factory: AdapterFactory,
    timing: Timing,
}

impl LoadCoordinator {
    pub fn new(registry: Arc<ModelRegistry>, config: Config, adapters_root: PathBuf) -> Arc<Self> {
        Self::with_adapter_factory(registry, config, adapters_root, default_adapter_factory())
    }

    /// Like `new`, but with the recipe-to-adapter mapping overridden. Used
    /// in tests to swap in `lmr_adapters::FakeAdapter`.
    pub fn with_adapter_factory(
        registry: Arc<ModelRegistry>,
        config: Config,
        adapters_root: PathBuf,
        adapter_factory: AdapterFactory,
    ) -> Arc<Self> {
        Self::with_adapter_factory_and_timing(registry, config, adapters_root, adapter_factory, Timing::default())
    }

    pub fn with_adapter_factory_and_timing(
        registry: Arc<ModelRegistry>,
        config: Config,
        adapters_root: PathBuf,
        adapter_factory: AdapterFactory,
        timing: Timing,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            adapters_root,
            instances: RwLock::new(HashMap::new()),
            type_lru: RwLock::new(HashMap::new()),
            load_locks: SyncMutex::new(HashMap::new()),
            capacity_notify: Arc::new(Notify::new()),
            adapter_factory,
            timing,
        })
    }

    /// `acquire(model_id, overrides) -> (instance, release)`. Fast path on a
    /// hit; otherwise waits on the per-`model_id` load mutex and re-checks
    /// the fast path before calling `load`.
    pub async fn acquire(
        &self,
        model_id: &str,
        overrides: RecipeOptions,
    ) -> Result<(Arc<LoadedInstance>, Release)> {
        let info = self.registry.get(model_id)?;

        if let Some(inst) = self.fast_path(model_id) {
            let release = inst.acquire();
            self.touch(&inst);
            return Ok((inst, release));
        }

        let lock = self.model_lock(model_id);
        let _guard = lock.lock().await;

        if let Some(inst) = self.fast_path(model_id) {
            let release = inst.acquire();
            self.touch(&inst);
            return Ok((inst, release));
        }

        let effective = self.effective_options(&info, overrides);
        let inst = self.load(&info, effective).await?;
        let release = inst.acquire();
        Ok((inst, release))
    }

    /// Explicitly pre-warms a model without forwarding a request.
    pub async fn warm(&self, model_id: &str, overrides: RecipeOptions) -> Result<()> {
        let (_inst, release) = self.acquire(model_id, overrides).await?;
        drop(release);
        Ok(())
    }

    /// `unload(model_id)`: evicts one instance, or (when `None`) every
    /// instance, best-effort (partial success is reported via the warnings
    /// logged for any instance that could not be evicted).
    pub async fn unload(&self, model_id: Option<&str>) -> Result<()> {
        match model_id {
            Some(id) => self.evict(id).await,
            None => {
                let ids: Vec<String> = self.instances.read().keys().cloned().collect();
                for id in ids {
                    if let Err(e) = self.evict(&id).await {
                        tracing::warn!(model_id = %id, error = %e, "unload-all: instance could not be evicted");
                    }
                }
                Ok(())
            }
        }
    }

    pub fn snapshot_all(&self) -> Vec<lmr_domain::model::LoadedInstanceInfo> {
        self.instances.read().values().map(|i| i.snapshot()).collect()
    }

    fn fast_path(&self, model_id: &str) -> Option<Arc<LoadedInstance>> {
        let instances = self.instances.read();
        instances
            .get(model_id)
            .filter(|i| !i.is_stopping())
            .cloned()
    }

    fn touch(&self, instance: &Arc<LoadedInstance>) {
        let mut lru = self.type_lru.write();
        if let Some(q) = lru.get_mut(&instance.model_type) {
            q.retain(|id| id != &instance.model_id);
            q.push_back(instance.model_id.clone());
        }
    }

    fn model_lock(&self, model_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.load_locks.lock();
        locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn effective_options(&self, info: &ModelInfo, overrides: RecipeOptions) -> RecipeOptions {
        let stored = self.registry.get_recipe_options(&info.id);
        let process_default = self.process_default_options(info.recipe);

        RecipeOptions {
            ctx_size: overrides.ctx_size.or(stored.ctx_size).or(process_default.ctx_size),
            llamacpp_backend: overrides
                .llamacpp_backend
                .or(stored.llamacpp_backend)
                .or(process_default.llamacpp_backend),
            llamacpp_args: overrides
                .llamacpp_args
                .or(stored.llamacpp_args)
                .or(process_default.llamacpp_args),
            whispercpp_backend: overrides
                .whispercpp_backend
                .or(stored.whispercpp_backend)
                .or(process_default.whispercpp_backend),
            sdcpp_backend: overrides
                .sdcpp_backend
                .or(stored.sdcpp_backend)
                .or(process_default.sdcpp_backend),
            steps: overrides.steps.or(stored.steps).or(process_default.steps),
            cfg_scale: overrides.cfg_scale.or(stored.cfg_scale).or(process_default.cfg_scale),
            width: overrides.width.or(stored.width).or(process_default.width),
            height: overrides.height.or(stored.height).or(process_default.height),
            save_options: overrides.save_options,
        }
    }

    fn process_default_options(&self, recipe: Recipe) -> RecipeOptions {
        match recipe {
            Recipe::Llamacpp => RecipeOptions {
                ctx_size: Some(self.config.llamacpp.ctx_size),
                llamacpp_backend: Some(self.config.llamacpp.llamacpp_backend.clone()),
                llamacpp_args: if self.config.llamacpp.llamacpp_args.trim().is_empty() {
                    None
                } else {
                    Some(self.config.llamacpp.llamacpp_args.clone())
                },
                ..Default::default()
            },
            Recipe::Flm | Recipe::RyzenaiLlm => RecipeOptions {
                ctx_size: Some(self.config.llamacpp.ctx_size),
                ..Default::default()
            },
            Recipe::Whispercpp => RecipeOptions {
                whispercpp_backend: Some(self.config.whispercpp.whispercpp_backend.clone()),
                ..Default::default()
            },
            Recipe::SdCpp => RecipeOptions {
                sdcpp_backend: Some(self.config.sdcpp.sdcpp_backend.clone()),
                steps: Some(self.config.sdcpp.steps),
                cfg_scale: Some(self.config.sdcpp.cfg_scale),
                width: Some(self.config.sdcpp.width),
                height: Some(self.config.sdcpp.height),
                ..Default::default()
            },
            Recipe::Kokoro => RecipeOptions::default(),
        }
    }

    async fn load(&self, info: &ModelInfo, options: RecipeOptions) -> Result<Arc<LoadedInstance>> {
        validate_options(info.recipe, &options)?;
        let adapter = (self.adapter_factory)(info.recipe, &self.adapters_root);

        match self.try_load_once(info, &options, &adapter).await {
            Ok(inst) => Ok(inst),
            Err(first_err) => {
                tracing::warn!(
                    model_id = %info.id,
                    error = %first_err,
                    "load failed, evicting all instances and retrying once"
                );
                self.evict_all().await;
                self.try_load_once(info, &options, &adapter).await
            }
        }
    }

    async fn try_load_once(
        &self,
        info: &ModelInfo,
        options: &RecipeOptions,
        adapter: &Arc<dyn BackendAdapter>,
    ) -> Result<Arc<LoadedInstance>> {
        let started_at = tokio::time::Instant::now();

        let install = adapter.ensure_installed().await?;
        if install.upgraded && adapter.invalidates_family_on_upgrade() {
            self.evict_recipe(info.recipe).await;
        }
        adapter.check_preconditions()?;

        self.enforce_admission(info, options).await?;

        let port = self.choose_port_with_retry().await?;
        let sink: Arc<dyn LogSink> = Arc::new(NullSink);
        let spawn_spec = adapter.build_spawn(info, options, port, &sink)?;
        let process = Arc::new(lmr_supervisor::start(spawn_spec, sink)?);
        let pid = process.pid();

        lmr_domain::trace::TraceEvent::ProcessStarted {
            model_id: info.id.clone(),
            pid,
            port,
        }
        .emit();

        if let Err(e) = self.poll_readiness(adapter.as_ref(), port, info.recipe).await {
            process.stop().await;
            lmr_domain::trace::TraceEvent::LoadFailed {
                model_id: info.id.clone(),
                recipe: info.recipe.as_str().to_string(),
                reason: e.to_string(),
                attempt: 1,
            }
            .emit();
            return Err(Error::LoadFailed(format!("{} failed readiness: {e}", info.id)));
        }

        let instance = LoadedInstance::new(
            info.id.clone(),
            info.model_type(),
            info.recipe,
            adapter.clone(),
            process,
            pid,
            port,
            options.clone(),
            self.capacity_notify.clone(),
        );

        self.insert_instance(instance.clone());

        if options.save_options {
            self.registry.set_recipe_options(&info.id, options.clone()).await?;
        }

        lmr_domain::trace::TraceEvent::ModelLoaded {
            model_id: info.id.clone(),
            recipe: info.recipe.as_str().to_string(),
            port,
            pid,
            duration_ms: started_at.elapsed().as_millis() as u64,
        }
        .emit();

        Ok(instance)
    }

    async fn choose_port_with_retry(&self) -> Result<u16> {
        let mut last_err = None;
        for _ in 0..5 {
            match choose_free_port().await {
                Ok(p) => return Ok(p),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::SpawnFailed("could not allocate a free port".into())))
    }

    async fn poll_readiness(&self, adapter: &dyn BackendAdapter, port: u16, recipe: Recipe) -> Result<()> {
        let budget = if recipe.is_npu_only() {
            self.timing.readiness_budget * READINESS_NPU_MULTIPLIER
        } else {
            self.timing.readiness_budget
        };
        let url = format!("http://127.0.0.1:{port}{}", adapter.readiness_path());
        let client = reqwest::Client::new();

        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::LoadFailed(format!("readiness poll timed out after {budget:?}")));
            }
            tokio::time::sleep(self.timing.readiness_poll_interval).await;
        }
    }

    async fn enforce_admission(&self, info: &ModelInfo, options: &RecipeOptions) -> Result<()> {
        if info.uses_npu(options) {
            self.evict_npu_users().await;
        }

        let capacity = self.config.cache.max_loaded_models;
        if capacity < 0 {
            return Ok(());
        }
        let model_type = info.model_type();

        loop {
            let at_capacity = {
                let lru = self.type_lru.read();
                lru.get(&model_type).map(|q| q.len() as i32).unwrap_or(0) >= capacity
            };
            if !at_capacity {
                return Ok(());
            }
            if self.evict_one_lru_of_type(model_type).await {
                continue;
            }

            let waited = tokio::time::timeout(self.timing.capacity_wait_timeout, self.capacity_notify.notified()).await;
            if waited.is_err() {
                return Err(Error::CapacityBusy(format!(
                    "no evictable {} slot within {:?}",
                    model_type.as_str(),
                    self.timing.capacity_wait_timeout
                )));
            }
        }
    }

    async fn evict_one_lru_of_type(&self, model_type: ModelType) -> bool {
        let candidate = {
            let lru = self.type_lru.read();
            let instances = self.instances.read();
            lru.get(&model_type).and_then(|q| {
                q.iter()
                    .find(|id| instances.get(*id).map(|i| i.inflight() == 0 && !i.is_stopping()).unwrap_or(false))
                    .cloned()
            })
        };
        match candidate {
            Some(id) => self.evict(&id).await.is_ok(),
            None => false,
        }
    }

    async fn evict_npu_users(&self) {
        let ids: Vec<String> = {
            let instances = self.instances.read();
            instances
                .values()
                .filter(|i| {
                    i.recipe.is_npu_only()
                        || (i.recipe == Recipe::Whispercpp
                            && i.recipe_options.whispercpp_backend.as_deref() == Some("npu"))
                })
                .map(|i| i.model_id.clone())
                .collect()
        };
        for id in ids {
            let _ = self.evict(&id).await;
        }
    }

    async fn evict_recipe(&self, recipe: Recipe) {
        let ids: Vec<String> = {
            let instances = self.instances.read();
            instances.values().filter(|i| i.recipe == recipe).map(|i| i.model_id.clone()).collect()
        };
        for id in ids {
            let _ = self.evict(&id).await;
        }
    }

    async fn evict_all(&self) {
        let ids: Vec<String> = self.instances.read().keys().cloned().collect();
        for id in ids {
            let _ = self.evict(&id).await;
        }
    }

    /// Evicts one instance: mark it `Stopping`, wait (bounded) for inflight
    /// requests to drain, tear down the process, then remove it from the
    /// LRU. Refuses (reverting the `Stopping` mark) if inflight never
    /// drains within the wait budget.
    pub async fn evict(&self, model_id: &str) -> Result<()> {
        let instance = {
            let instances = self.instances.read();
            instances.get(model_id).cloned()
        };
        let Some(instance) = instance else {
            return Err(Error::NotFound(format!("model {model_id}")));
        };

        if !instance.mark_stopping() {
            return Ok(());
        }

        let drained = tokio::time::timeout(self.timing.evict_inflight_wait, async {
            while instance.inflight() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            instance.unmark_stopping();
            return Err(Error::PreconditionFailed(format!(
                "model {model_id} still has in-flight requests; eviction refused"
            )));
        }

        instance.process.stop().await;

        {
            let mut instances = self.instances.write();
            instances.remove(model_id);
        }
        {
            let mut lru = self.type_lru.write();
            if let Some(q) = lru.get_mut(&instance.model_type) {
                q.retain(|id| id != model_id);
            }
        }

        lmr_domain::trace::TraceEvent::ModelEvicted {
            model_id: model_id.to_string(),
            recipe: instance.recipe.as_str().to_string(),
            reason: "evicted".to_string(),
        }
        .emit();
        lmr_domain::trace::TraceEvent::ProcessStopped {
            model_id: model_id.to_string(),
            pid: instance.pid,
            graceful: true,
        }
        .emit();

        self.capacity_notify.notify_waiters();
        Ok(())
    }

    /// Removes any instance whose backend process has already died outside
    /// an explicit eviction path (crashed, was killed externally). Skips the
    /// inflight-drain wait `evict` performs, since there is no process left
    /// to stop. Returns the ids reaped, for the caller to log.
    pub async fn reap_dead(&self) -> Vec<String> {
        let dead: Vec<Arc<LoadedInstance>> = {
            let instances = self.instances.read();
            instances.values().filter(|i| !i.process.is_alive()).cloned().collect()
        };

        let mut reaped = Vec::new();
        for instance in dead {
            {
                let mut instances = self.instances.write();
                instances.remove(&instance.model_id);
            }
            {
                let mut lru = self.type_lru.write();
                if let Some(q) = lru.get_mut(&instance.model_type) {
                    q.retain(|id| id != &instance.model_id);
                }
            }
            lmr_domain::trace::TraceEvent::ModelEvicted {
                model_id: instance.model_id.clone(),
                recipe: instance.recipe.as_str().to_string(),
                reason: "process died".to_string(),
            }
            .emit();
            reaped.push(instance.model_id.clone());
        }
        if !reaped.is_empty() {
            self.capacity_notify.notify_waiters();
        }
        reaped
    }

    fn insert_instance(&self, instance: Arc<LoadedInstance>) {
        {
            let mut instances = self.instances.write();
            instances.insert(instance.model_id.clone(), instance.clone());
        }
        let mut lru = self.type_lru.write();
        lru.entry(instance.model_type).or_default().push_back(instance.model_id.clone());
    }
}

fn validate_options(recipe: Recipe, options: &RecipeOptions) -> Result<()> {
    let recognized = RecipeOptions::recognized_keys(recipe);
    let populated: &[(&str, bool)] = &[
        ("ctx_size", options.ctx_size.is_some()),
        ("llamacpp_backend", options.llamacpp_backend.is_some()),
        ("llamacpp_args", options.llamacpp_args.is_some()),
        ("whispercpp_backend", options.whispercpp_backend.is_some()),
        ("sdcpp_backend", options.sdcpp_backend.is_some()),
        ("steps", options.steps.is_some()),
        ("cfg_scale", options.cfg_scale.is_some()),
        ("width", options.width.is_some()),
        ("height", options.height.is_some()),
    ];
    for (key, set) in populated {
        if *set && !recognized.contains(key) {
            return Err(Error::BadRequest(format!(
                "option \"{key}\" is not recognized for recipe {}",
                recipe.as_str()
            )));
        }
    }

    if let Some(args) = &options.llamacpp_args {
        RecipeOptions::validate_llamacpp_args(args).map_err(Error::BadRequest)?;
    }
    if let Some(w) = options.width {
        RecipeOptions::validate_sdcpp_dimension("width", w).map_err(Error::BadRequest)?;
    }
    if let Some(h) = options.height {
        RecipeOptions::validate_sdcpp_dimension("height", h).map_err(Error::BadRequest)?;
    }
    Ok(())
}

#[cfg(test)]
mod validate_options_tests {
    use super::*;

    #[test]
    fn rejects_an_option_unrecognized_for_the_recipe() {
        let options = RecipeOptions {
            sdcpp_backend: Some("vulkan".to_string()),
            ..Default::default()
        };
        let err = validate_options(Recipe::Llamacpp, &options).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn accepts_options_recognized_for_the_recipe() {
        let options = RecipeOptions {
            ctx_size: Some(8192),
            llamacpp_backend: Some("cpu".to_string()),
            ..Default::default()
        };
        assert!(validate_options(Recipe::Llamacpp, &options).is_ok());
    }

    #[test]
    fn sdcpp_dimension_option_is_recognized_for_sdcpp_but_not_llamacpp() {
        let options = RecipeOptions {
            width: Some(512),
            ..Default::default()
        };
        assert!(validate_options(Recipe::SdCpp, &options).is_ok());
        assert!(validate_options(Recipe::Llamacpp, &options).is_err());
    }
}
