//! The top-level driver of one chain execution.

use super::Reaper;
use crate::cancellation::CancellationToken;
use crate::chain::{Chain, Job};
use crate::config::TraverserConfig;
use crate::core::State;
use crate::errors::StopError;
use crate::events::{
    EventSink, NoOpEventSink, JOB_ENQUEUED, JOB_FINISHED, JOB_STARTED, JOB_UNREAPED,
    TRAVERSER_STOPPED,
};
use crate::runner::{JobRunner, Runner, RunnerRepo};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

const PENDING_POLL: Duration = Duration::from_millis(10);

/// How a call to [`Traverser::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainOutcome {
    /// Every job completed.
    Completed,
    /// The chain finished with at least one job that did not complete.
    Failed,
    /// The traverser was stopped before the chain finished.
    Stopped,
}

struct Shared {
    chain: Arc<Chain>,
    config: TraverserConfig,
    sink: Arc<dyn EventSink>,
    repo: RunnerRepo,
    reaper: Arc<Reaper>,
    stop: CancellationToken,
    done: CancellationToken,
    started: AtomicBool,
    /// Job tasks launched but not yet registered in the repo.
    pending: AtomicUsize,
    /// Fired once the dispatch loop has returned.
    pending_done: CancellationToken,
}

/// Runs a chain: dispatches runnable jobs concurrently, hands finished
/// jobs to the [`Reaper`] and orchestrates shutdown.
///
/// The handle is cheap to clone; clones drive the same execution, so one
/// task can `run` while another calls `stop`.
///
/// # Example
///
/// ```rust,ignore
/// let traverser = Traverser::new(Arc::new(chain), TraverserConfig::default());
/// match traverser.run().await {
///     ChainOutcome::Completed => info!("done"),
///     outcome => warn!(?outcome, "chain did not complete"),
/// }
/// ```
#[derive(Clone)]
pub struct Traverser {
    shared: Arc<Shared>,
}

impl Traverser {
    /// Creates a traverser that reports no events.
    #[must_use]
    pub fn new(chain: Arc<Chain>, config: TraverserConfig) -> Self {
        Self::with_event_sink(chain, config, Arc::new(NoOpEventSink))
    }

    /// Creates a traverser reporting lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(
        chain: Arc<Chain>,
        config: TraverserConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let reaper = Arc::new(Reaper::new(chain.clone(), sink.clone()));
        Self {
            shared: Arc::new(Shared {
                chain,
                config,
                sink,
                repo: RunnerRepo::new(),
                reaper,
                stop: CancellationToken::new(),
                done: CancellationToken::new(),
                started: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                pending_done: CancellationToken::new(),
            }),
        }
    }

    /// Returns the chain being run.
    #[must_use]
    pub fn chain(&self) -> &Arc<Chain> {
        &self.shared.chain
    }

    /// Returns the registry of runners currently executing.
    #[must_use]
    pub fn runners(&self) -> &RunnerRepo {
        &self.shared.repo
    }

    /// Returns true once stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.is_cancelled()
    }

    /// Runs the chain until it finishes or the traverser is stopped.
    ///
    /// When a concurrent [`Traverser::stop`] ends the run, waits for the stop
    /// sequence to finish, bounded by the configured shutdown wait.
    pub async fn run(&self) -> ChainOutcome {
        let s = &self.shared;
        s.started.store(true, Ordering::SeqCst);
        if s.stop.is_cancelled() {
            s.pending_done.cancel("traverser stopped before run");
            return ChainOutcome::Stopped;
        }

        let (run_tx, run_rx) = mpsc::channel::<Job>(1);
        let (done_tx, done_rx) = mpsc::channel::<Job>(1);
        let dispatching = tokio::spawn(self.clone().dispatch(run_rx, done_tx));

        for job in s.chain.runnable_jobs() {
            let job_id = job.id().to_string();
            info!(%job_id, "Initial job");
            if run_tx.send(job).await.is_err() {
                break;
            }
            s.sink.try_emit(JOB_ENQUEUED, Some(json!({"job_id": job_id})));
        }

        let reaper = s.reaper.clone();
        let reaping = tokio::spawn(async move { reaper.run(done_rx, run_tx).await });
        let reaped = reaping.await;
        // The reaper owned the last dispatch sender, so the loop is ending.
        if let Err(e) = dispatching.await {
            error!(error = %e, "Dispatch loop panicked");
        }

        if s.stop.is_cancelled() {
            if tokio::time::timeout(s.config.shutdown_wait(), s.done.cancelled())
                .await
                .is_err()
            {
                warn!(
                    wait = ?s.config.shutdown_wait(),
                    "Timed out waiting for traverser stop to finish"
                );
            }
            return ChainOutcome::Stopped;
        }

        if let Err(e) = reaped {
            error!(error = %e, "Reaper panicked");
            return ChainOutcome::Failed;
        }
        match s.reaper.verdict() {
            Some(true) => ChainOutcome::Completed,
            Some(false) => ChainOutcome::Failed,
            None => ChainOutcome::Stopped,
        }
    }

    async fn dispatch(self, mut run_rx: mpsc::Receiver<Job>, done_tx: mpsc::Sender<Job>) {
        let s = &self.shared;
        while let Some(job) = run_rx.recv().await {
            if s.stop.is_cancelled() {
                info!(job_id = %job.id(), "Traverser stopped, job not run");
                continue;
            }
            s.pending.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(self.clone().run_job(job, done_tx.clone()));
        }
        s.pending_done.cancel("dispatch loop returned");
    }

    async fn run_job(self, mut job: Job, done_tx: mpsc::Sender<Job>) {
        let s = &self.shared;
        let chain = &s.chain;
        let id = job.id().clone();
        let job_id = id.to_string();
        let node = chain.dag().must_get_node(&id);

        if chain.is_sequence_start_job(&id) {
            chain.increment_sequence_tries(&id, 1);
            info!(
                %job_id,
                sequence_id = %id,
                sequence_try = chain.sequence_tries(&id),
                "Sequence start"
            );
        }

        let runner = Arc::new(JobRunner::new(
            job.step.clone(),
            node.name(),
            chain.request_id(),
            chain.job_tries(&id),
            node.retry(),
            node.retry_wait(),
        ));
        s.repo.set(job_id.clone(), runner.clone());
        s.pending.fetch_sub(1, Ordering::SeqCst);

        chain.set_job_state(&id, State::Running);
        s.sink.try_emit(JOB_STARTED, Some(json!({"job_id": job_id})));

        match AssertUnwindSafe(runner.run()).catch_unwind().await {
            Ok(ret) => {
                chain.increment_job_tries(&id, ret.tries);
                job.state = ret.step_return.state;
            }
            Err(_) => {
                error!(%job_id, "Panic while running job");
                job.state = State::Exception;
            }
        }
        let state = job.state;
        s.sink.try_emit(
            JOB_FINISHED,
            Some(json!({"job_id": job_id, "state": state, "tries": chain.job_tries(&id)})),
        );

        let sent = tokio::time::timeout(s.config.send_timeout(), done_tx.send(job)).await;
        let unreaped = match sent {
            Ok(Ok(())) => None,
            Ok(Err(mpsc::error::SendError(job))) => {
                // Nobody will reap it, so record where it ended.
                chain.set_job_state(job.id(), job.state);
                info!(%job_id, state = %state, "Reaper gone, job not reaped");
                Some("reaper gone")
            }
            Err(_) => {
                chain.set_job_state(&id, state);
                warn!(
                    %job_id,
                    timeout = ?s.config.send_timeout(),
                    "Timed out sending job to reaper"
                );
                Some("send timeout")
            }
        };
        if let Some(reason) = unreaped {
            s.sink.try_emit(
                JOB_UNREAPED,
                Some(json!({"job_id": job_id, "state": state, "reason": reason})),
            );
        }
        s.repo.remove(&job_id);
    }

    /// Stops the traverser: no new jobs start, the reaper stops, and every
    /// running job is asked to stop in parallel.
    ///
    /// The full stop sequence always runs; runner failures are collected
    /// into one error. A second call waits for the first to finish and
    /// returns `Ok`.
    pub async fn stop(&self) -> Result<(), StopError> {
        let s = &self.shared;
        if !s.stop.cancel("traverser stopped") {
            s.done.cancelled().await;
            return Ok(());
        }

        info!(request_id = %s.chain.request_id(), "Stopping traverser");
        s.reaper.stop().await;

        let result = if s.started.load(Ordering::SeqCst) {
            self.stop_running_jobs().await
        } else {
            Ok(())
        };

        s.done.cancel("traverser stop finished");
        s.sink.try_emit(
            TRAVERSER_STOPPED,
            Some(json!({
                "request_id": s.chain.request_id().to_string(),
                "clean": result.is_ok(),
                "error": result.as_ref().err().map(StopError::to_dict),
            })),
        );
        result
    }

    async fn stop_running_jobs(&self) -> Result<(), StopError> {
        let s = &self.shared;
        let deadline = Instant::now() + s.config.stop_timeout();

        if tokio::time::timeout_at(deadline, s.pending_done.cancelled())
            .await
            .is_err()
        {
            warn!("Timed out waiting for dispatch loop to return");
            return Err(StopError::Timeout("dispatch loop"));
        }

        while s.pending.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    pending = s.pending.load(Ordering::SeqCst),
                    "Timed out waiting for jobs to register"
                );
                return Err(StopError::Timeout("pending jobs"));
            }
            tokio::time::sleep(PENDING_POLL).await;
        }

        let runners = s.repo.items();
        info!(count = runners.len(), "Stopping running jobs");
        let stops = runners.into_iter().map(|(job_id, runner)| async move {
            info!(%job_id, "Stopping job");
            (job_id, runner.stop().await)
        });

        let Ok(results) = tokio::time::timeout_at(deadline, join_all(stops)).await else {
            warn!("Timed out waiting for runners to stop");
            return Err(StopError::Timeout("runners"));
        };

        let mut failed: Vec<(String, String)> = results
            .into_iter()
            .filter_map(|(job_id, result)| {
                result.err().map(|e| {
                    error!(%job_id, error = %e, "Error stopping job");
                    (job_id, e.to_string())
                })
            })
            .collect();
        if failed.is_empty() {
            return Ok(());
        }
        failed.sort();
        Err(StopError::Runners { failed })
    }
}

impl std::fmt::Debug for Traverser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = &self.shared;
        f.debug_struct("Traverser")
            .field("chain", &s.chain.dag().name())
            .field("request_id", &s.chain.request_id())
            .field("running", &s.repo.count())
            .field("stopped", &s.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}
