use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use facecluster_core::clustering::domain::clustering_opts::ClusteringOpts;
use facecluster_core::clustering::domain::clustering_results::{
    ClusteringProgress, ClusteringResults,
};
use facecluster_core::clustering::domain::merge_observer::{
    MergeLog, MergeObserver, NullMergeObserver,
};
use facecluster_core::clustering::infrastructure::json_state_store::JsonStateStore;
use facecluster_core::index::face_index::FaceIndexReader;
use facecluster_core::index::json_face_index_reader::JsonFaceIndexReader;
use facecluster_core::pipeline::cluster_engine::{
    ClusterEngine, ClusterError, EngineConfig, RunConfig, RunOutcome,
};
use facecluster_core::pipeline::clustering_logger::LogClusteringLogger;
use facecluster_core::pipeline::debug_report::ClusterDebugReport;
use facecluster_core::shared::constants::{APP_DIR_NAME, STATE_FILE_NAME};

/// Cluster indexed face embeddings into people.
#[derive(Parser)]
#[command(name = "facecluster")]
struct Cli {
    /// JSON face index: a list of {fileID, faces: [...]} entries.
    index: PathBuf,

    /// Clustering state file (defaults to the user data directory).
    #[arg(long)]
    state: Option<PathBuf>,

    /// Write clustering results here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write a diagnostic report (largest/smallest clusters, noise).
    #[arg(long)]
    debug_report: Option<PathBuf>,

    /// Write every merge decision of this run.
    #[arg(long)]
    decisions: Option<PathBuf>,

    /// JSON file with clustering options; flags below override it.
    #[arg(long)]
    opts: Option<PathBuf>,

    /// Minimum sharpness (Laplacian variance) for a face to be clustered.
    #[arg(long)]
    min_blur: Option<f64>,

    /// Minimum detection score.
    #[arg(long)]
    min_score: Option<f64>,

    /// Smallest group reported as a cluster.
    #[arg(long)]
    min_cluster_size: Option<usize>,

    /// Cosine similarity needed to merge two faces (-1.0-1.0).
    #[arg(long)]
    join_threshold: Option<f64>,

    /// Similarity at which the candidate scan for a face stops early.
    #[arg(long)]
    early_exit_threshold: Option<f64>,

    /// Faces per comparison window.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Distance between consecutive window starts.
    #[arg(long)]
    offset_increment: Option<usize>,

    /// Keep bad faces (tiny, soft, unreliable profiles) in clustering.
    #[arg(long)]
    no_bad_face_heuristics: bool,

    /// Embedding dimensionality.
    #[arg(long, default_value = "192")]
    dimension: usize,

    /// Threads for the similarity scan (default: all cores).
    #[arg(long)]
    parallelism: Option<usize>,

    /// Discard persisted state and cluster from scratch.
    #[arg(long)]
    reset: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let opts = build_opts(&cli)?;
    let state_path = match &cli.state {
        Some(path) => path.clone(),
        None => default_state_path()?,
    };

    let mut faces = JsonFaceIndexReader::new(&cli.index).read_faces()?;

    let store = JsonStateStore::new(&state_path);
    let lock_path = store.lock_path();

    let mut config = EngineConfig {
        dimension: cli.dimension,
        ..EngineConfig::default()
    };
    if let Some(parallelism) = cli.parallelism {
        config.parallelism = parallelism;
    }
    let engine = ClusterEngine::new(config, Box::new(store))
        .with_logger(Box::new(LogClusteringLogger::default()));
    let busy = |e: ClusterError| -> Box<dyn std::error::Error> {
        match e {
            ClusterError::ConcurrentRun => format!(
                "{e} (state {} is locked; delete {} if no other run is active)",
                state_path.display(),
                lock_path.display()
            )
            .into(),
            e => e.into(),
        }
    };

    if cli.reset {
        engine.reset().map_err(busy)?;
        log::info!("Cleared clustering state at {}", state_path.display());
    }

    let progress = RunConfig::with_progress(|p: ClusteringProgress| {
        eprint!("\rClustering batch {}/{}", p.completed, p.total);
        true
    });

    let mut decision_log = MergeLog::new();
    let mut null = NullMergeObserver;
    let observer: &mut dyn MergeObserver = if cli.decisions.is_some() {
        &mut decision_log
    } else {
        &mut null
    };

    let outcome = engine
        .run(&mut faces, &opts, progress, observer)
        .map_err(busy)?;
    eprintln!();

    let results = match outcome {
        RunOutcome::Completed(results) => results,
        RunOutcome::Cancelled {
            completed_batches,
            total_batches,
        } => {
            log::warn!("Clustering cancelled after {completed_batches}/{total_batches} batches");
            return Ok(());
        }
    };

    write_results(&results, cli.output.as_deref())?;

    if let Some(path) = &cli.debug_report {
        let report = ClusterDebugReport::build(&results, &faces);
        write_json(path, &report)?;
        log::info!("Debug report written to {}", path.display());
    }
    if let Some(path) = &cli.decisions {
        write_json(path, decision_log.decisions())?;
        log::info!("{} merge decisions written to {}", decision_log.len(), path.display());
    }

    Ok(())
}

fn build_opts(cli: &Cli) -> Result<ClusteringOpts, Box<dyn std::error::Error>> {
    let mut opts = match &cli.opts {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read options file {}: {e}", path.display()))?;
            serde_json::from_str::<ClusteringOpts>(&text)
                .map_err(|e| format!("Invalid options file {}: {e}", path.display()))?
        }
        None => ClusteringOpts::default(),
    };

    if let Some(v) = cli.min_blur {
        opts.min_blur = v;
    }
    if let Some(v) = cli.min_score {
        opts.min_score = v;
    }
    if let Some(v) = cli.min_cluster_size {
        opts.min_cluster_size = v;
    }
    if let Some(v) = cli.join_threshold {
        opts.join_threshold = v;
    }
    if let Some(v) = cli.early_exit_threshold {
        opts.early_exit_threshold = v;
    }
    if let Some(v) = cli.batch_size {
        opts.batch_size = v;
    }
    if let Some(v) = cli.offset_increment {
        opts.offset_increment = v;
    }
    if cli.no_bad_face_heuristics {
        opts.bad_face_heuristics = false;
    }

    opts.validate()?;
    Ok(opts)
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.index.exists() {
        return Err(format!("Face index not found: {}", cli.index.display()).into());
    }
    if cli.dimension == 0 {
        return Err("Dimension must be positive".into());
    }
    if cli.parallelism == Some(0) {
        return Err("Parallelism must be at least 1".into());
    }
    if let Some(path) = &cli.opts {
        if !path.exists() {
            return Err(format!("Options file not found: {}", path.display()).into());
        }
    }
    Ok(())
}

fn default_state_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base = dirs::data_dir().ok_or("Could not determine the user data directory; pass --state")?;
    Ok(base.join(APP_DIR_NAME).join(STATE_FILE_NAME))
}

fn write_results(
    results: &ClusteringResults,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let stats = &results.stats;
    log::info!(
        "{} clusters, {} clustered, {} unclustered, {} filtered, {} malformed ({} ms)",
        results.clusters.len(),
        stats.clustered_face_count,
        stats.unclustered_face_count,
        stats.filtered_face_count,
        stats.malformed_face_count,
        stats.time_taken_ms
    );

    match output {
        Some(path) => {
            write_json(path, results)?;
            log::info!("Results written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(results)?),
    }
    Ok(())
}

fn write_json<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
