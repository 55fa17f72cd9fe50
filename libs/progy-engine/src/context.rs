/// Engine Context - Explicit Per-Workspace State
///
/// Everything a run needs that outlives a single request: settings, the
/// validated course configuration, the clock, the manifest cache, the
/// progress store and the tutor notifier. Passed by reference into every
/// operation; there is no global state.
use crate::config::{load_course_config, Clock, EngineSettings, SystemClock};
use crate::engine::RunnerDispatcher;
use crate::manifest::{self, Manifest, ManifestCache, ScanOptions};
use crate::resolver::PathResolver;
use crate::store::{LocalProgressStore, ProgressStore, RemoteProgressStore};
use crate::tutor::{DisabledTutor, HttpTutorNotifier, TutorNotifier};
use progy_common::config::CourseConfig;
use progy_common::error::EngineError;
use progy_common::progress::Progress;
use progy_common::types::ExerciseIdentity;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EngineContext {
    pub settings: EngineSettings,
    pub course: CourseConfig,
    clock: Arc<dyn Clock>,
    manifest_cache: ManifestCache,
    store: Arc<dyn ProgressStore>,
    tutor: Arc<dyn TutorNotifier>,
}

impl EngineContext {
    pub fn new(
        settings: EngineSettings,
        course: CourseConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ProgressStore>,
        tutor: Arc<dyn TutorNotifier>,
    ) -> Self {
        Self {
            settings,
            course,
            clock,
            manifest_cache: ManifestCache::default(),
            store,
            tutor,
        }
    }

    /// Load course.json and wire the store and tutor for the settings' mode:
    /// offline uses the local progress file and never escalates, networked
    /// uses the progress service and the tutor endpoint.
    pub fn from_settings(settings: EngineSettings) -> Result<Self, EngineError> {
        let course = load_course_config(&settings)?;

        let (store, tutor): (Arc<dyn ProgressStore>, Arc<dyn TutorNotifier>) = if settings.offline {
            (
                Arc::new(LocalProgressStore::new(settings.progress_path())),
                Arc::new(DisabledTutor),
            )
        } else {
            let store = RemoteProgressStore::new(&settings.api_url, &course.id, settings.token.clone())
                .map_err(|e| EngineError::Configuration(e.to_string()))?;
            let tutor = HttpTutorNotifier::new(&settings.api_url, settings.token.clone())
                .map_err(|e| EngineError::Configuration(format!("{:#}", e)))?;
            (Arc::new(store), Arc::new(tutor))
        };

        debug!(course_id = %course.id, offline = settings.offline, "Engine context ready");
        Ok(Self::new(settings, course, Arc::new(SystemClock), store, tutor))
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn store(&self) -> Arc<dyn ProgressStore> {
        Arc::clone(&self.store)
    }

    pub fn tutor(&self) -> Arc<dyn TutorNotifier> {
        Arc::clone(&self.tutor)
    }

    pub fn manifest_cache(&self) -> &ManifestCache {
        &self.manifest_cache
    }

    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(
            self.settings.workspace_root.clone(),
            self.settings.runtime_root.clone(),
        )
    }

    pub fn dispatcher(&self) -> RunnerDispatcher {
        RunnerDispatcher::new(self.resolver(), self.course.id.clone(), self.settings.build_timeout)
    }

    pub async fn load_progress(&self) -> Result<Progress, EngineError> {
        self.store
            .load()
            .await
            .map_err(|e| EngineError::Configuration(format!("Failed to load progress: {}", e)))
    }

    /// Cached manifest, rescanned once the staleness window has passed.
    ///
    /// A fresh scan also syncs `stats.totalExercises` and writes
    /// `.progy/manifest.json`; failures of either are logged only.
    pub async fn manifest(&self) -> Result<Manifest, EngineError> {
        let now = self.clock.now();
        if let Some(manifest) = self.manifest_cache.get_fresh(now) {
            return Ok(manifest);
        }

        let loaded = self.store.load().await;
        let progress = match &loaded {
            Ok(progress) => progress.clone(),
            Err(e) => {
                warn!(error = %e, "Could not load progress, computing locks without it");
                Progress::default()
            }
        };

        let options = ScanOptions {
            layers: self.settings.layers(),
            exercises_dir: &self.course.content.exercises,
            progression: self.course.progression.mode,
            bypass_locks: self.settings.bypass_locks,
        };
        let manifest = manifest::scan(&options, &progress)?;

        if let Ok(mut progress) = loaded {
            let total = manifest.total_entries() as u32;
            if progress.set_total_exercises(total) {
                if let Err(e) = self.store.save(&progress).await {
                    warn!(error = %e, "Failed to update total exercises in progress");
                }
            }
        }

        if let Err(e) = manifest::write_manifest(&self.settings.manifest_path(), &manifest) {
            warn!(error = %e, "Failed to write manifest.json");
        }

        self.manifest_cache.store(manifest.clone(), now);
        Ok(manifest)
    }

    pub fn invalidate_manifest(&self) {
        self.manifest_cache.invalidate();
    }

    /// Exercise identity for an untrusted id, via the manifest
    pub async fn lookup(&self, exercise_id: &str) -> Result<ExerciseIdentity, EngineError> {
        self.manifest().await?.lookup(exercise_id)
    }
}
