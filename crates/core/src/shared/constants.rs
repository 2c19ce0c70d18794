/// Version of the clustering method. Bump whenever the algorithm changes in a
/// way that makes previously persisted cluster graphs incompatible.
pub const CLUSTERING_VERSION: u32 = 1;

/// Embedding length of the MobileFaceNet model used by the indexer.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 192;

pub const DEFAULT_MIN_BLUR: f64 = 10.0;
pub const DEFAULT_MIN_SCORE: f64 = 0.8;
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 2;
pub const DEFAULT_JOIN_THRESHOLD: f64 = 0.76;
pub const DEFAULT_EARLY_EXIT_THRESHOLD: f64 = 0.9;
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_OFFSET_INCREMENT: usize = 7_500;

/// Faces sharper than `min_blur` but below this are still flagged as bad.
pub const BAD_FACE_BLUR: f64 = 50.0;
/// Relative box size (fraction of the image side) below which a face is bad.
pub const BAD_FACE_MIN_BOX: f64 = 0.03;
/// Sideways faces need at least this detection score to be trusted.
pub const BAD_FACE_SIDEWAYS_SCORE: f64 = 0.85;

/// Similarity reported for any comparison involving a zero-norm embedding.
pub const DEGENERATE_SIMILARITY: f64 = -1.0;

/// Below this many queries per batch the similarity scan stays on one thread.
pub const MIN_PARALLEL_QUERIES: usize = 256;

/// Number of largest and smallest clusters included in a debug report.
pub const DEBUG_REPORT_EDGE_CLUSTERS: usize = 30;
pub const DEBUG_REPORT_FACES_PER_CLUSTER: usize = 50;

pub const STATE_FILE_NAME: &str = "clustering-state.json";
pub const APP_DIR_NAME: &str = "FaceCluster";
