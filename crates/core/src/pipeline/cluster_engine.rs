use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Instant;

use thiserror::Error;

use crate::clustering::domain::batch_window::batch_windows;
use crate::clustering::domain::clustering_opts::{ClusteringOpts, OptsError};
use crate::clustering::domain::clustering_results::{
    ClusteringProgress, ClusteringResults, ClusteringStats,
};
use crate::clustering::domain::clustering_state::ClusteringState;
use crate::clustering::domain::merge_observer::{MergeDecision, MergeObserver};
use crate::clustering::domain::similarity_search::SimilaritySearch;
use crate::clustering::domain::state_store::{StateStore, StoreError};
use crate::clustering::infrastructure::linear_window_search::LinearWindowSearch;
use crate::pipeline::clustering_logger::{ClusteringLogger, NullClusteringLogger};
use crate::quality::quality_filter::QualityFilter;
use crate::shared::constants::{CLUSTERING_VERSION, DEFAULT_EMBEDDING_DIMENSION};
use crate::shared::face::{Face, FaceError};
use crate::shared::vector_math::EmbeddingMatrix;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("a clustering run is already in progress for this library")]
    ConcurrentRun,
    #[error("invalid clustering options: {0}")]
    InvalidOptions(#[from] OptsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Settings fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Embedding length every face must have.
    pub dimension: usize,
    /// Clustering method version stamped into persisted state.
    pub version: u32,
    /// Worker threads for the similarity scan. `1` keeps it on the caller's
    /// thread.
    pub parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            version: CLUSTERING_VERSION,
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Per-run hooks.
pub struct RunConfig {
    /// Called after every batch. Returning `false` cancels the run at this
    /// batch boundary.
    pub on_progress: Option<Box<dyn Fn(ClusteringProgress) -> bool + Send>>,
    pub cancelled: Arc<AtomicBool>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            on_progress: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl RunConfig {
    pub fn with_progress(
        on_progress: impl Fn(ClusteringProgress) -> bool + Send + 'static,
    ) -> Self {
        Self {
            on_progress: Some(Box::new(on_progress)),
            ..Self::default()
        }
    }

    fn should_stop(&self, progress: ClusteringProgress) -> bool {
        let keep_going = self.on_progress.as_ref().map_or(true, |f| f(progress));
        !keep_going || self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(ClusteringResults),
    /// Stopped at a batch boundary. The merges of every completed batch were
    /// persisted, so the next run picks up where this one stopped.
    Cancelled {
        completed_batches: usize,
        total_batches: usize,
    },
}

impl RunOutcome {
    pub fn into_results(self) -> Option<ClusteringResults> {
        match self {
            RunOutcome::Completed(results) => Some(results),
            RunOutcome::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled { .. })
    }
}

struct EngineInner {
    store: Box<dyn StateStore>,
    logger: Box<dyn ClusteringLogger>,
}

/// Faces that survived validation and quality filtering, in input order.
struct Eligible<'a> {
    faces: Vec<&'a Face>,
    filtered: usize,
    malformed: usize,
}

/// Incremental face clustering over a persisted union-find.
///
/// Each engine exclusively owns its state store handle, and a run holds the
/// store's lock throughout. A second `run` while one is in progress, on this
/// engine or on any other handle onto the same persisted state, fails with
/// [`ClusterError::ConcurrentRun`] instead of waiting.
pub struct ClusterEngine {
    config: EngineConfig,
    search: Box<dyn SimilaritySearch>,
    inner: Mutex<EngineInner>,
}

impl ClusterEngine {
    pub fn new(config: EngineConfig, store: Box<dyn StateStore>) -> Self {
        Self {
            config,
            search: Box::new(LinearWindowSearch::new(config.parallelism)),
            inner: Mutex::new(EngineInner {
                store,
                logger: Box::new(NullClusteringLogger),
            }),
        }
    }

    pub fn with_search(mut self, search: Box<dyn SimilaritySearch>) -> Self {
        self.search = search;
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn ClusteringLogger>) -> Self {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.logger = logger;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clusters `faces` in order, resuming from whatever state the store
    /// holds.
    ///
    /// Sets `is_bad_face` on every face. Malformed and filtered faces are
    /// counted but appear in neither the clusters nor the noise. Faces
    /// already present in the persisted state are not compared again.
    pub fn run(
        &self,
        faces: &mut [Face],
        opts: &ClusteringOpts,
        config: RunConfig,
        observer: &mut dyn MergeObserver,
    ) -> Result<RunOutcome, ClusterError> {
        opts.validate()?;
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        lock_store(inner.store.as_mut())?;
        inner.logger.begin_run();

        let outcome = self.run_locked(inner, faces, opts, config, observer);
        inner.store.unlock();
        outcome
    }

    fn run_locked(
        &self,
        inner: &mut EngineInner,
        faces: &mut [Face],
        opts: &ClusteringOpts,
        config: RunConfig,
        observer: &mut dyn MergeObserver,
    ) -> Result<RunOutcome, ClusterError> {
        let started = Instant::now();
        let total_face_count = faces.len();

        let mut state = self.load_state(inner.store.as_ref(), opts)?;
        let mut store = state.to_store();

        let filter = QualityFilter::new(opts);
        let eligible = self.eligible_faces(faces, &filter);
        let ids: Vec<&str> = eligible.faces.iter().map(|f| f.face_id.as_str()).collect();

        let matrix = EmbeddingMatrix::from_rows(
            eligible.faces.iter().map(|f| f.embedding.as_slice()),
            self.config.dimension,
        );
        for (i, id) in ids.iter().enumerate() {
            if matrix.is_degenerate(i) {
                let err = FaceError::DegenerateVector {
                    face_id: id.to_string(),
                };
                log::debug!("{err}; leaving unclustered");
            }
        }

        let windows = batch_windows(ids.len(), opts.batch_size, opts.offset_increment);
        let total = windows.len();
        inner.logger.info(&format!(
            "Clustering {} eligible faces in {total} batches ({} already clustered)",
            ids.len(),
            ids.iter().filter(|id| store.contains(id)).count()
        ));

        if config.cancelled.load(Ordering::Relaxed) {
            return Ok(RunOutcome::Cancelled {
                completed_batches: 0,
                total_batches: total,
            });
        }

        let mut newly_processed = 0;
        for (batch, window) in windows.iter().enumerate() {
            let queries: Vec<usize> = window
                .new_faces()
                .filter(|&i| !store.contains(ids[i]))
                .collect();

            let match_start = Instant::now();
            let matches =
                self.search
                    .best_matches(&matrix, window, &queries, opts.early_exit_threshold);
            inner
                .logger
                .timing("match", match_start.elapsed().as_secs_f64() * 1000.0);

            let merge_start = Instant::now();
            let mut merges = 0;
            for (&query, best) in queries.iter().zip(matches) {
                let face_id = ids[query];
                store.find(face_id);
                let accepted = best.and_then(|b| b.accepted(opts.join_threshold));
                if let Some(m) = accepted {
                    store.union(face_id, ids[m.index]);
                    merges += 1;
                }
                observer.record(MergeDecision {
                    face_id: face_id.to_string(),
                    matched_id: best.map(|b| ids[b.index].to_string()),
                    similarity: best.map(|b| b.similarity),
                    was_merged: accepted.is_some(),
                    batch,
                });
            }
            inner
                .logger
                .timing("merge", merge_start.elapsed().as_secs_f64() * 1000.0);
            inner.logger.metric("faces", queries.len() as f64);
            inner.logger.metric("merges", merges as f64);
            newly_processed += queries.len();

            let progress = ClusteringProgress {
                completed: batch + 1,
                total,
            };
            inner.logger.progress(progress.completed, progress.total);

            let stop = config.should_stop(progress);
            if stop && progress.completed < total {
                state.capture(&mut store);
                inner.store.save(&state)?;
                inner.logger.info(&format!(
                    "Clustering cancelled after {}/{total} batches; checkpoint saved",
                    progress.completed
                ));
                return Ok(RunOutcome::Cancelled {
                    completed_batches: progress.completed,
                    total_batches: total,
                });
            }
        }

        // Degenerate faces never merge, so they are noise at any cluster size.
        let clusterable = ids
            .iter()
            .enumerate()
            .filter(|(i, _)| !matrix.is_degenerate(*i))
            .map(|(_, id)| *id);
        let clusters = store.representative_faces_among(clusterable, opts.min_cluster_size);
        let clustered: HashSet<&str> = clusters
            .iter()
            .flat_map(|c| c.faces.iter().map(String::as_str))
            .collect();
        let noise: Vec<String> = ids
            .iter()
            .filter(|id| !clustered.contains(*id))
            .map(|id| id.to_string())
            .collect();

        state.capture(&mut store);
        inner.store.save(&state)?;

        let stats = ClusteringStats {
            total_face_count,
            filtered_face_count: eligible.filtered,
            malformed_face_count: eligible.malformed,
            degenerate_face_count: matrix.degenerate_count(),
            clustered_face_count: clustered.len(),
            unclustered_face_count: noise.len(),
            newly_processed_face_count: newly_processed,
            batch_count: total,
            time_taken_ms: started.elapsed().as_millis() as u64,
        };
        inner.logger.info(&format!(
            "Clustered {} of {} faces into {} clusters ({} noise, {} filtered, {} malformed)",
            stats.clustered_face_count,
            stats.total_face_count,
            clusters.len(),
            stats.unclustered_face_count,
            stats.filtered_face_count,
            stats.malformed_face_count
        ));
        inner.logger.summary();

        Ok(RunOutcome::Completed(ClusteringResults {
            clusters,
            noise,
            stats,
        }))
    }

    /// Current persisted state, for read-only inspection.
    pub fn state_snapshot(&self) -> Result<Option<ClusteringState>, ClusterError> {
        let guard = self.lock()?;
        Ok(guard.store.load()?)
    }

    /// Drops all persisted state. The next run clusters from scratch.
    pub fn reset(&self) -> Result<(), ClusterError> {
        let mut guard = self.lock()?;
        lock_store(guard.store.as_mut())?;
        let cleared = guard.store.clear();
        guard.store.unlock();
        cleared?;
        log::info!("Clustering state cleared");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EngineInner>, ClusterError> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(ClusterError::ConcurrentRun),
            // A panic mid-run never reaches a save, so the store is intact.
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    fn load_state(
        &self,
        store: &dyn StateStore,
        opts: &ClusteringOpts,
    ) -> Result<ClusteringState, ClusterError> {
        let fresh =
            || ClusteringState::new(self.config.version, self.config.dimension, opts.clone());
        let state = match store.load() {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(fresh()),
            Err(StoreError::Serialize(e)) => {
                log::warn!("Persisted clustering state is unreadable ({e}); starting over");
                return Ok(fresh());
            }
            Err(e) => return Err(e.into()),
        };

        match state.check_compatible(self.config.version, self.config.dimension, opts) {
            Ok(()) => Ok(state),
            Err(e) => {
                log::warn!("{e}; discarding {} persisted faces", state.face_count());
                Ok(state.reset(self.config.version, self.config.dimension, opts.clone()))
            }
        }
    }

    /// Sets `is_bad_face` on every face while splitting off malformed and
    /// filtered ones.
    fn eligible_faces<'a>(&self, faces: &'a mut [Face], filter: &QualityFilter) -> Eligible<'a> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(faces.len());
        let mut eligible = Eligible {
            faces: Vec::with_capacity(faces.len()),
            filtered: 0,
            malformed: 0,
        };

        for face in faces {
            let passes_quality = filter.is_eligible(face);
            let face: &'a Face = face;
            let checked = face.validate_embedding(self.config.dimension).and_then(|()| {
                if seen.insert(face.face_id.as_str()) {
                    Ok(())
                } else {
                    Err(FaceError::DuplicateFace {
                        face_id: face.face_id.clone(),
                    })
                }
            });
            if let Err(e) = checked {
                log::debug!("Skipping face: {e}");
                eligible.malformed += 1;
                continue;
            }
            if !passes_quality {
                eligible.filtered += 1;
                continue;
            }
            eligible.faces.push(face);
        }

        if eligible.malformed > 0 {
            log::info!("Skipped {} malformed faces", eligible.malformed);
        }
        eligible
    }
}

/// Takes the store's run lock. Another holder means another run is active.
fn lock_store(store: &mut dyn StateStore) -> Result<(), ClusterError> {
    store.lock().map_err(|e| match e {
        StoreError::Locked(owner) => {
            log::warn!("Clustering state {owner} is locked by another run");
            ClusterError::ConcurrentRun
        }
        e => e.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::domain::merge_observer::{MergeLog, NullMergeObserver};
    use crate::clustering::domain::union_find::ClusterStore;
    use crate::clustering::infrastructure::json_state_store::JsonStateStore;
    use crate::clustering::infrastructure::memory_state_store::MemoryStateStore;
    use std::sync::Mutex as StdMutex;

    fn face(id: &str, embedding: Vec<f32>) -> Face {
        Face {
            face_id: id.into(),
            file_id: 1,
            embedding,
            blur: 100.0,
            score: 0.9,
            box_size: 0.2,
            direction: Default::default(),
            is_bad_face: false,
        }
    }

    fn config(dimension: usize) -> EngineConfig {
        EngineConfig {
            dimension,
            version: CLUSTERING_VERSION,
            parallelism: 1,
        }
    }

    fn engine(store: &MemoryStateStore) -> ClusterEngine {
        ClusterEngine::new(config(4), Box::new(store.clone()))
    }

    /// Faces f1..f3 are pairwise similar (>= 0.8); f4 and f5 sit at 0.5 from
    /// each other and orthogonal to the rest.
    fn five_faces() -> Vec<Face> {
        vec![
            face("f1", vec![1.0, 0.0, 0.0, 0.0]),
            face("f2", vec![0.95, 0.312, 0.0, 0.0]),
            face("f3", vec![0.95, -0.312, 0.0, 0.0]),
            face("f4", vec![0.0, 0.0, 1.0, 0.0]),
            face("f5", vec![0.0, 0.0, 0.5, 0.866]),
        ]
    }

    fn run(engine: &ClusterEngine, faces: &mut [Face], opts: &ClusteringOpts) -> ClusteringResults {
        engine
            .run(faces, opts, RunConfig::default(), &mut NullMergeObserver)
            .unwrap()
            .into_results()
            .unwrap()
    }

    /// Deterministic pseudo-random embeddings.
    fn lcg_faces(count: usize, dimension: usize, seed: u64) -> Vec<Face> {
        let mut state = seed;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f64 / (1u64 << 31) as f64 * 2.0 - 1.0) as f32
        };
        (0..count)
            .map(|i| face(&format!("{i:04}"), (0..dimension).map(|_| next()).collect()))
            .collect()
    }

    fn all_ids(results: &ClusteringResults) -> Vec<String> {
        results
            .clusters
            .iter()
            .flat_map(|c| c.faces.iter().cloned())
            .chain(results.noise.iter().cloned())
            .collect()
    }

    #[test]
    fn test_similar_faces_cluster_and_rest_is_noise() {
        let store = MemoryStateStore::new();
        let results = run(&engine(&store), &mut five_faces(), &ClusteringOpts::default());

        assert_eq!(results.cluster_face_ids(), vec![vec!["f1", "f2", "f3"]]);
        assert_eq!(results.clusters[0].representative, "f1");
        assert_eq!(results.noise, vec!["f4", "f5"]);
        assert_eq!(results.stats.clustered_face_count, 3);
        assert_eq!(results.stats.unclustered_face_count, 2);
        assert_eq!(results.stats.batch_count, 1);
    }

    #[test]
    fn test_malformed_face_is_counted_and_skipped() {
        let store = MemoryStateStore::new();
        let mut faces = five_faces();
        faces.insert(2, face("short", vec![1.0, 0.0, 0.0]));
        faces.push(face("nan", vec![f32::NAN, 0.0, 0.0, 0.0]));
        faces.push(face("f1", vec![1.0, 0.0, 0.0, 0.0]));

        let results = run(&engine(&store), &mut faces, &ClusteringOpts::default());

        assert_eq!(results.stats.malformed_face_count, 3);
        assert_eq!(results.stats.total_face_count, 8);
        let ids = all_ids(&results);
        assert!(!ids.iter().any(|id| id == "short" || id == "nan"));
        assert_eq!(ids.iter().filter(|id| *id == "f1").count(), 1);
        assert_eq!(results.cluster_face_ids(), vec![vec!["f1", "f2", "f3"]]);
    }

    #[test]
    fn test_filtered_faces_are_a_third_bucket() {
        let store = MemoryStateStore::new();
        let mut faces = five_faces();
        faces[1].blur = 5.0;
        faces[4].score = 0.3;

        let results = run(&engine(&store), &mut faces, &ClusteringOpts::default());

        assert_eq!(results.stats.filtered_face_count, 2);
        let ids = all_ids(&results);
        assert!(!ids.contains(&"f2".to_string()));
        assert!(!ids.contains(&"f5".to_string()));
        assert!(faces[1].is_bad_face);
        assert_eq!(results.cluster_face_ids(), vec![vec!["f1", "f3"]]);
    }

    #[test]
    fn test_bad_face_flag_set_without_rejection() {
        let store = MemoryStateStore::new();
        let mut faces = five_faces();
        faces[0].blur = 30.0;
        let opts = ClusteringOpts {
            bad_face_heuristics: false,
            ..ClusteringOpts::default()
        };

        let results = run(&engine(&store), &mut faces, &opts);

        assert!(faces[0].is_bad_face);
        assert!(!faces[1].is_bad_face);
        assert_eq!(results.stats.filtered_face_count, 0);
        assert!(results.cluster_of("f1").is_some());
    }

    #[test]
    fn test_degenerate_face_ends_up_as_noise() {
        let store = MemoryStateStore::new();
        let mut faces = five_faces();
        faces.insert(1, face("zero", vec![0.0; 4]));
        let opts = ClusteringOpts {
            join_threshold: -1.0,
            early_exit_threshold: 1.0,
            min_cluster_size: 1,
            ..ClusteringOpts::default()
        };

        let results = run(&engine(&store), &mut faces, &opts);

        assert_eq!(results.stats.degenerate_face_count, 1);
        assert!(results.cluster_of("zero").is_none());
        assert_eq!(results.noise, vec!["zero"]);
        assert_eq!(results.cluster_face_ids(), vec![vec!["f1", "f2", "f3", "f4", "f5"]]);
    }

    #[test]
    fn test_partition_invariant() {
        let store = MemoryStateStore::new();
        let mut faces = lcg_faces(200, 8, 7);
        let opts = ClusteringOpts {
            join_threshold: 0.5,
            batch_size: 50,
            offset_increment: 30,
            ..ClusteringOpts::default()
        };

        let results = run(&engine(&store), &mut faces, &opts);

        let ids = all_ids(&results);
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_same_input_gives_same_clusters() {
        let opts = ClusteringOpts {
            join_threshold: 0.4,
            early_exit_threshold: 0.8,
            batch_size: 300,
            offset_increment: 200,
            ..ClusteringOpts::default()
        };

        let parallel = ClusterEngine::new(
            EngineConfig {
                parallelism: 4,
                ..config(8)
            },
            Box::new(MemoryStateStore::new()),
        );
        let sequential = ClusterEngine::new(config(8), Box::new(MemoryStateStore::new()));
        let a = run(&sequential, &mut lcg_faces(700, 8, 11), &opts);
        let b = run(&parallel, &mut lcg_faces(700, 8, 11), &opts);

        assert_eq!(a.clusters, b.clusters);
        assert_eq!(a.noise, b.noise);
        assert!(!a.clusters.is_empty());
        assert_eq!(
            a.clusters.iter().map(|c| &c.representative).collect::<Vec<_>>(),
            b.clusters.iter().map(|c| &c.representative).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_stricter_threshold_never_clusters_more() {
        let mut previous = usize::MAX;
        for threshold in [0.1, 0.3, 0.5, 0.7, 0.85] {
            let opts = ClusteringOpts {
                join_threshold: threshold,
                early_exit_threshold: 0.9,
                ..ClusteringOpts::default()
            };
            let engine = ClusterEngine::new(config(8), Box::new(MemoryStateStore::new()));
            let results = run(&engine, &mut lcg_faces(120, 8, 3), &opts);
            assert!(results.stats.clustered_face_count <= previous);
            previous = results.stats.clustered_face_count;
        }
    }

    #[test]
    fn test_min_cluster_size_enforced() {
        let store = MemoryStateStore::new();
        let opts = ClusteringOpts {
            min_cluster_size: 4,
            ..ClusteringOpts::default()
        };

        let results = run(&engine(&store), &mut five_faces(), &opts);

        assert!(results.clusters.is_empty());
        assert_eq!(results.noise, vec!["f1", "f2", "f3", "f4", "f5"]);
    }

    #[test]
    fn test_rerun_without_new_faces_is_idempotent() {
        let store = MemoryStateStore::new();
        let engine = engine(&store);
        let opts = ClusteringOpts::default();

        let first = run(&engine, &mut five_faces(), &opts);
        let state_after_first = store.snapshot().unwrap();
        let second = run(&engine, &mut five_faces(), &opts);

        assert_eq!(first.clusters, second.clusters);
        assert_eq!(first.noise, second.noise);
        assert_eq!(second.stats.newly_processed_face_count, 0);
        assert_eq!(store.snapshot().unwrap(), state_after_first);
    }

    #[test]
    fn test_new_faces_join_existing_clusters() {
        let store = MemoryStateStore::new();
        let engine = engine(&store);
        let opts = ClusteringOpts::default();
        let mut faces = five_faces();
        run(&engine, &mut faces[..3], &opts);

        let results = run(&engine, &mut faces, &opts);

        assert_eq!(results.stats.newly_processed_face_count, 2);
        assert_eq!(results.cluster_face_ids(), vec![vec!["f1", "f2", "f3"]]);
        assert_eq!(results.noise, vec!["f4", "f5"]);
    }

    /// f0/f2 merge in batch 1 and f4/f5 in batch 3; f1, f3 and f6 stay alone.
    fn seven_faces() -> Vec<Face> {
        vec![
            face("f0", vec![1.0, 0.0, 0.0, 0.0]),
            face("f1", vec![0.0, 1.0, 0.0, 0.0]),
            face("f2", vec![0.95, 0.312, 0.0, 0.0]),
            face("f3", vec![0.0, 0.0, 1.0, 0.0]),
            face("f4", vec![0.0, 0.95, 0.312, 0.0]),
            face("f5", vec![0.0, 0.9, 0.4, 0.0]),
            face("f6", vec![0.0, 0.0, 0.0, 1.0]),
        ]
    }

    fn small_batches() -> ClusteringOpts {
        ClusteringOpts {
            batch_size: 3,
            offset_increment: 2,
            ..ClusteringOpts::default()
        }
    }

    #[test]
    fn test_cancel_checkpoints_and_resume_matches_uninterrupted() {
        let opts = small_batches();

        let uninterrupted = run(&engine(&MemoryStateStore::new()), &mut seven_faces(), &opts);
        assert_eq!(uninterrupted.stats.batch_count, 3);
        assert_eq!(
            uninterrupted.cluster_face_ids(),
            vec![vec!["f0", "f2"], vec!["f4", "f5"]]
        );

        let store = MemoryStateStore::new();
        let engine = engine(&store);
        let outcome = engine
            .run(
                &mut seven_faces(),
                &opts,
                RunConfig::with_progress(|p| p.completed < 1),
                &mut NullMergeObserver,
            )
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Cancelled {
                completed_batches: 1,
                total_batches: 3
            }
        );

        let checkpoint = store.snapshot().unwrap();
        assert_eq!(checkpoint.face_count(), 3);
        let checkpoint_store = checkpoint.to_store();
        assert_eq!(checkpoint_store.root("f2"), Some("f0"));
        assert_eq!(checkpoint_store.root("f1"), Some("f1"));

        let resumed = run(&engine, &mut seven_faces(), &opts);
        assert_eq!(resumed.clusters, uninterrupted.clusters);
        assert_eq!(resumed.noise, uninterrupted.noise);
        assert_eq!(resumed.stats.newly_processed_face_count, 4);
    }

    #[test]
    fn test_cancel_flag_stops_at_batch_boundary() {
        let store = MemoryStateStore::new();
        let engine = engine(&store);
        let config = RunConfig::default();
        let flag = config.cancelled.clone();
        let config = RunConfig {
            on_progress: Some(Box::new(move |p: ClusteringProgress| {
                if p.completed == 2 {
                    flag.store(true, Ordering::Relaxed);
                }
                true
            })),
            ..config
        };

        let outcome = engine
            .run(&mut seven_faces(), &small_batches(), config, &mut NullMergeObserver)
            .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(store.snapshot().unwrap().face_count(), 5);
    }

    #[test]
    fn test_cancelled_before_start_persists_nothing() {
        let store = MemoryStateStore::new();
        let config = RunConfig::default();
        config.cancelled.store(true, Ordering::Relaxed);

        let outcome = engine(&store)
            .run(&mut five_faces(), &ClusteringOpts::default(), config, &mut NullMergeObserver)
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Cancelled {
                completed_batches: 0,
                total_batches: 1
            }
        );
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_progress_reported_after_every_batch() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let store = MemoryStateStore::new();

        engine(&store)
            .run(
                &mut seven_faces(),
                &small_batches(),
                RunConfig::with_progress(move |p| {
                    sink.lock().unwrap().push((p.completed, p.total));
                    true
                }),
                &mut NullMergeObserver,
            )
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_second_run_during_a_run_is_rejected() {
        let engine = Arc::new(engine(&MemoryStateStore::new()));
        let nested: Arc<StdMutex<Option<bool>>> = Arc::new(StdMutex::new(None));

        let inner_engine = engine.clone();
        let nested_result = nested.clone();
        let config = RunConfig::with_progress(move |_| {
            let mut faces = five_faces();
            let result = inner_engine.run(
                &mut faces,
                &ClusteringOpts::default(),
                RunConfig::default(),
                &mut NullMergeObserver,
            );
            *nested_result.lock().unwrap() =
                Some(matches!(result, Err(ClusterError::ConcurrentRun)));
            true
        });

        let outcome = engine
            .run(&mut seven_faces(), &small_batches(), config, &mut NullMergeObserver)
            .unwrap();

        assert!(!outcome.is_cancelled());
        assert_eq!(*nested.lock().unwrap(), Some(true));
    }

    /// Runs `outer` on seven faces and, after its first batch, tries
    /// `inner` on five. Returns whether the inner run was rejected as
    /// concurrent.
    fn nested_run_rejected(outer: &ClusterEngine, inner: Arc<ClusterEngine>) -> bool {
        let nested: Arc<StdMutex<Option<bool>>> = Arc::new(StdMutex::new(None));
        let nested_result = nested.clone();
        let config = RunConfig::with_progress(move |p| {
            if p.completed == 1 {
                let result = inner.run(
                    &mut five_faces(),
                    &ClusteringOpts::default(),
                    RunConfig::default(),
                    &mut NullMergeObserver,
                );
                *nested_result.lock().unwrap() =
                    Some(matches!(result, Err(ClusterError::ConcurrentRun)));
            }
            true
        });

        let outcome = outer
            .run(&mut seven_faces(), &small_batches(), config, &mut NullMergeObserver)
            .unwrap();
        assert!(!outcome.is_cancelled());
        let rejected = nested.lock().unwrap().take();
        rejected.unwrap_or(false)
    }

    #[test]
    fn test_engines_sharing_a_state_file_do_not_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let first = ClusterEngine::new(config(4), Box::new(JsonStateStore::new(&path)));
        let second = Arc::new(ClusterEngine::new(
            config(4),
            Box::new(JsonStateStore::new(&path)),
        ));

        assert!(nested_run_rejected(&first, second.clone()));

        // The first run kept its merges and released the lock.
        let results = run(&second, &mut seven_faces(), &small_batches());
        assert_eq!(results.stats.newly_processed_face_count, 0);
        assert_eq!(
            results.cluster_face_ids(),
            vec![vec!["f0", "f2"], vec!["f4", "f5"]]
        );
        assert!(!JsonStateStore::new(&path).lock_path().exists());
    }

    #[test]
    fn test_engines_sharing_a_memory_store_do_not_run_concurrently() {
        let store = MemoryStateStore::new();
        let first = engine(&store);
        let second = Arc::new(engine(&store));

        assert!(nested_run_rejected(&first, second.clone()));
        assert!(second.reset().is_ok());
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_incompatible_state_is_reset() {
        let mut stale = ClusteringState::new(99, 4, ClusteringOpts::default());
        stale.generation = 4;
        let mut bogus = ClusterStore::new();
        bogus.union("f4", "f5");
        stale.capture(&mut bogus);
        let store = MemoryStateStore::with_state(stale);

        let results = run(&engine(&store), &mut five_faces(), &ClusteringOpts::default());

        assert_eq!(results.cluster_face_ids(), vec![vec!["f1", "f2", "f3"]]);
        assert_eq!(results.noise, vec!["f4", "f5"]);
        let state = store.snapshot().unwrap();
        assert_eq!(state.version, CLUSTERING_VERSION);
        assert_eq!(state.generation, 5);
    }

    #[test]
    fn test_changed_options_trigger_full_recluster() {
        let store = MemoryStateStore::new();
        let engine = engine(&store);
        run(&engine, &mut five_faces(), &ClusteringOpts::default());

        let strict = ClusteringOpts {
            join_threshold: 0.96,
            early_exit_threshold: 0.99,
            ..ClusteringOpts::default()
        };
        let results = run(&engine, &mut five_faces(), &strict);

        assert!(results.clusters.is_empty());
        assert_eq!(results.stats.newly_processed_face_count, 5);
        assert_eq!(store.snapshot().unwrap().generation, 1);
    }

    #[test]
    fn test_invalid_options_leave_state_untouched() {
        let store = MemoryStateStore::new();
        let engine = engine(&store);
        run(&engine, &mut five_faces(), &ClusteringOpts::default());
        let before = store.snapshot();

        let bad = ClusteringOpts {
            batch_size: 0,
            ..ClusteringOpts::default()
        };
        let err = engine
            .run(&mut five_faces(), &bad, RunConfig::default(), &mut NullMergeObserver)
            .unwrap_err();

        assert!(matches!(err, ClusterError::InvalidOptions(_)));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_observer_records_every_decision_without_changing_results() {
        let mut log = MergeLog::new();
        let observed = engine(&MemoryStateStore::new())
            .run(&mut five_faces(), &ClusteringOpts::default(), RunConfig::default(), &mut log)
            .unwrap()
            .into_results()
            .unwrap();
        let plain = run(
            &engine(&MemoryStateStore::new()),
            &mut five_faces(),
            &ClusteringOpts::default(),
        );

        assert_eq!(observed.clusters, plain.clusters);
        assert_eq!(observed.noise, plain.noise);
        assert_eq!(log.len(), 5);
        assert_eq!(log.merges().count(), 2);

        let first = log.explain("f1").unwrap();
        assert!(first.matched_id.is_none());
        let f3 = log.explain("f3").unwrap();
        assert_eq!(f3.matched_id.as_deref(), Some("f1"));
        assert!(f3.was_merged);
        let f5 = log.explain("f5").unwrap();
        assert_eq!(f5.matched_id.as_deref(), Some("f4"));
        assert!(!f5.was_merged);
    }

    #[test]
    fn test_reset_clears_state() {
        let store = MemoryStateStore::new();
        let engine = engine(&store);
        run(&engine, &mut five_faces(), &ClusteringOpts::default());
        assert!(engine.state_snapshot().unwrap().is_some());

        engine.reset().unwrap();
        assert!(engine.state_snapshot().unwrap().is_none());
    }
}
