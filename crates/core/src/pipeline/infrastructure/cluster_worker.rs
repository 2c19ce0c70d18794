use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::clustering::domain::clustering_opts::ClusteringOpts;
use crate::clustering::domain::clustering_results::{ClusteringProgress, ClusteringResults};
use crate::clustering::domain::merge_observer::{MergeLog, MergeObserver, NullMergeObserver};
use crate::pipeline::cluster_engine::{ClusterEngine, RunConfig, RunOutcome};
use crate::pipeline::status::{ClusteringPhase, ClusteringStatus, StatusBroadcaster};
use crate::shared::face::Face;

/// One clustering request.
pub struct ClusterJob {
    pub faces: Vec<Face>,
    pub opts: ClusteringOpts,
    /// Keep every merge decision and return it with the results.
    pub record_decisions: bool,
    pub cancelled: Arc<AtomicBool>,
}

impl ClusterJob {
    pub fn new(faces: Vec<Face>, opts: ClusteringOpts) -> Self {
        Self {
            faces,
            opts,
            record_decisions: false,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Messages sent from the worker thread to the caller.
#[derive(Debug)]
pub enum WorkerEvent {
    Progress(ClusteringProgress),
    /// `faces` are the job's faces with `is_bad_face` filled in.
    Completed {
        results: ClusteringResults,
        faces: Vec<Face>,
        decisions: Option<MergeLog>,
    },
    Cancelled {
        completed_batches: usize,
        total_batches: usize,
    },
    Error(String),
}

enum Command {
    Run(ClusterJob),
    Shutdown,
}

/// Cancel tokens of jobs that were submitted and have not finished, in
/// submission order. The front belongs to the running job, or to the next
/// one to start.
type PendingJobs = Arc<Mutex<VecDeque<Arc<AtomicBool>>>>;

fn pending_lock(pending: &PendingJobs) -> MutexGuard<'_, VecDeque<Arc<AtomicBool>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs a [`ClusterEngine`] on a dedicated thread.
///
/// Jobs are queued and processed one at a time. Events arrive on
/// [`ClusterWorker::events`]; status with replay-last semantics is available
/// through [`ClusterWorker::subscribe`]. Dropping the worker cancels the
/// running job and every queued one, then joins the thread.
pub struct ClusterWorker {
    commands: Sender<Command>,
    events: Receiver<WorkerEvent>,
    status: StatusBroadcaster,
    pending: PendingJobs,
    handle: Option<JoinHandle<()>>,
}

impl ClusterWorker {
    pub fn spawn(engine: ClusterEngine) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded::<Command>();
        let (event_tx, event_rx) = crossbeam_channel::unbounded::<WorkerEvent>();
        let status = StatusBroadcaster::new();
        let worker_status = status.clone();
        let pending = PendingJobs::default();
        let worker_pending = Arc::clone(&pending);

        let handle = thread::Builder::new()
            .name("cluster-worker".into())
            .spawn(move || {
                worker_loop(engine, command_rx, event_tx, worker_status, worker_pending)
            })
            .ok();
        if handle.is_none() {
            log::error!("Failed to spawn clustering worker thread");
        }

        Self {
            commands: command_tx,
            events: event_rx,
            status,
            pending,
            handle,
        }
    }

    /// Queues `job`. Returns `false` if the worker thread is gone.
    pub fn submit(&self, job: ClusterJob) -> bool {
        let mut pending = pending_lock(&self.pending);
        pending.push_back(Arc::clone(&job.cancelled));
        if self.commands.send(Command::Run(job)).is_err() {
            pending.pop_back();
            return false;
        }
        true
    }

    /// Cancels the running job at its next batch boundary. With nothing
    /// running yet, the next queued job is cancelled before it starts.
    /// Later queued jobs are unaffected.
    pub fn cancel(&self) {
        if let Some(token) = pending_lock(&self.pending).front() {
            token.store(true, Ordering::Relaxed);
        }
    }

    /// Cancels the running job and every queued one.
    pub fn cancel_all(&self) {
        for token in pending_lock(&self.pending).iter() {
            token.store(true, Ordering::Relaxed);
        }
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<ClusteringStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ClusteringStatus {
        self.status.snapshot()
    }
}

impl Drop for ClusterWorker {
    fn drop(&mut self) {
        self.cancel_all();
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Clustering worker thread panicked");
            }
        }
    }
}

fn worker_loop(
    engine: ClusterEngine,
    commands: Receiver<Command>,
    events: Sender<WorkerEvent>,
    status: StatusBroadcaster,
    pending: PendingJobs,
) {
    for command in commands {
        let job = match command {
            Command::Run(job) => job,
            Command::Shutdown => break,
        };
        let event = run_job(&engine, job, &events, &status);
        pending_lock(&pending).pop_front();
        if events.send(event).is_err() {
            log::debug!("Clustering result dropped; nobody is listening");
        }
    }
}

fn run_job(
    engine: &ClusterEngine,
    mut job: ClusterJob,
    events: &Sender<WorkerEvent>,
    status: &StatusBroadcaster,
) -> WorkerEvent {
    status.publish(ClusteringStatus::clustering(ClusteringProgress::default()));

    let progress_tx = events.clone();
    let progress_status = status.clone();
    let config = RunConfig {
        on_progress: Some(Box::new(move |p: ClusteringProgress| {
            let _ = progress_tx.send(WorkerEvent::Progress(p));
            progress_status.publish(ClusteringStatus::clustering(p));
            true
        })),
        cancelled: job.cancelled.clone(),
    };

    let mut decisions = job.record_decisions.then(MergeLog::new);
    let mut null = NullMergeObserver;
    let observer: &mut dyn MergeObserver = match decisions.as_mut() {
        Some(recorder) => recorder,
        None => &mut null,
    };

    let last = status.snapshot();
    match engine.run(&mut job.faces, &job.opts, config, observer) {
        Ok(RunOutcome::Completed(results)) => {
            let total = results.stats.batch_count;
            status.publish(ClusteringStatus::finished(
                ClusteringPhase::Done,
                ClusteringProgress {
                    completed: total,
                    total,
                },
            ));
            WorkerEvent::Completed {
                results,
                faces: job.faces,
                decisions,
            }
        }
        Ok(RunOutcome::Cancelled {
            completed_batches,
            total_batches,
        }) => {
            status.publish(ClusteringStatus::finished(
                ClusteringPhase::Cancelled,
                ClusteringProgress {
                    completed: completed_batches,
                    total: total_batches,
                },
            ));
            WorkerEvent::Cancelled {
                completed_batches,
                total_batches,
            }
        }
        Err(e) => {
            log::error!("Clustering failed: {e}");
            status.publish(ClusteringStatus::finished(
                ClusteringPhase::Failed,
                ClusteringProgress {
                    completed: last.completed,
                    total: last.total,
                },
            ));
            WorkerEvent::Error(e.to_string())
        }
    }
}
