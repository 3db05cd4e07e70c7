//! The reaper: interprets finished jobs and decides what runs next.

use crate::cancellation::CancellationToken;
use crate::chain::{Chain, Job};
use crate::core::AtomId;
use crate::events::{
    EventSink, CHAIN_FINALIZED, JOB_ENQUEUED, JOB_NOT_RUNNABLE, SEQUENCE_EXHAUSTED, SEQUENCE_RETRY,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Consumes finished jobs, records their state and enqueues what they unlock.
pub struct Reaper {
    chain: Arc<Chain>,
    sink: Arc<dyn EventSink>,
    stop: CancellationToken,
    done: CancellationToken,
    started: AtomicBool,
    verdict: Mutex<Option<bool>>,
}

impl Reaper {
    /// Creates a reaper for a chain.
    #[must_use]
    pub fn new(chain: Arc<Chain>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            chain,
            sink,
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
            started: AtomicBool::new(false),
            verdict: Mutex::new(None),
        }
    }

    /// Returns the verdict recorded by [`Reaper::finalize`], if the chain
    /// finished on its own: `Some(true)` when every job completed.
    #[must_use]
    pub fn verdict(&self) -> Option<bool> {
        *self.verdict.lock()
    }

    /// Reaps finished jobs from `done_rx` until the chain is done or the
    /// reaper is stopped. Jobs to run next are sent on `run_tx`, which is
    /// dropped on return.
    ///
    /// A stopped reaper returns without finalizing. Jobs already handed over
    /// but not yet reaped still get their state recorded.
    pub async fn run(&self, mut done_rx: mpsc::Receiver<Job>, run_tx: mpsc::Sender<Job>) {
        self.started.store(true, Ordering::SeqCst);
        if let Some(complete) = self.reap_until_done(&mut done_rx, &run_tx).await {
            self.finalize(complete);
        }
        self.record_unreaped(&mut done_rx);
        // Late senders must see the channel closed once `stop` returns.
        drop(done_rx);
        drop(run_tx);
        self.done.cancel("reaper returned");
    }

    /// Closes the completion channel and records the state of every job
    /// left in its buffer. Nothing is enqueued from them.
    fn record_unreaped(&self, done_rx: &mut mpsc::Receiver<Job>) {
        done_rx.close();
        while let Ok(job) = done_rx.try_recv() {
            info!(job_id = %job.id(), state = %job.state, "Recording unreaped job");
            self.chain.set_job_state(job.id(), job.state);
        }
    }

    async fn reap_until_done(
        &self,
        done_rx: &mut mpsc::Receiver<Job>,
        run_tx: &mpsc::Sender<Job>,
    ) -> Option<bool> {
        if self.stop.is_cancelled() {
            return None;
        }

        let (done, complete) = self.chain.is_done_running();
        if done {
            return Some(complete);
        }

        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => return None,
                job = done_rx.recv() => {
                    let job = job?;
                    self.reap(job, run_tx).await;
                    let (done, complete) = self.chain.is_done_running();
                    if done {
                        return Some(complete);
                    }
                }
            }
        }
    }

    /// Stops the reaper and waits until `run` has returned.
    ///
    /// Returns at once if `run` was never started. Idempotent.
    pub async fn stop(&self) {
        self.stop.cancel("reaper stopped");
        if self.started.load(Ordering::SeqCst) {
            self.done.cancelled().await;
        }
    }

    /// Records a finished job and continues the chain from it.
    ///
    /// A complete job enqueues every successor that became runnable. A job
    /// that did not complete rolls back its sequence and enqueues the
    /// sequence start, if its sequence has retries left; otherwise its
    /// branch stays failed.
    pub async fn reap(&self, job: Job, run_tx: &mpsc::Sender<Job>) {
        let id = job.id().clone();
        let node = self.chain.dag().must_get_node(&id);
        let sequence_id = node.sequence_id().map(ToString::to_string).unwrap_or_default();
        info!(
            job_id = %id,
            state = %job.state,
            sequence_id = %sequence_id,
            sequence_try = self.chain.sequence_tries(&id),
            "Got job"
        );

        if job.state.is_complete() {
            self.chain.set_job_state(&id, job.state);
            for next in self.chain.next_jobs(&id) {
                if !self.chain.is_runnable(next.id()) {
                    info!(job_id = %id, next_job_id = %next.id(), "Next job not runnable");
                    self.sink.try_emit(
                        JOB_NOT_RUNNABLE,
                        Some(json!({"job_id": next.id().to_string(), "after": id.to_string()})),
                    );
                    continue;
                }
                info!(job_id = %id, next_job_id = %next.id(), "Enqueueing next job");
                self.enqueue(next, run_tx).await;
            }
            return;
        }

        // The runner already spent the job's own retries.
        if !self.chain.can_retry_sequence(&id) {
            warn!(job_id = %id, state = %job.state, "Job failed, no sequence tries left");
            self.chain.set_job_state(&id, job.state);
            self.sink.try_emit(
                SEQUENCE_EXHAUSTED,
                Some(json!({"job_id": id.to_string(), "state": job.state})),
            );
            return;
        }

        warn!(job_id = %id, state = %job.state, "Job failed, retrying sequence");
        if let Some(start) = self.prepare_sequence_retry(&job) {
            self.enqueue(start, run_tx).await;
        }
    }

    async fn enqueue(&self, job: Job, run_tx: &mpsc::Sender<Job>) {
        let job_id = job.id().to_string();
        if run_tx.send(job).await.is_err() {
            warn!(%job_id, "Dispatch loop is gone, job not enqueued");
            return;
        }
        self.sink.try_emit(JOB_ENQUEUED, Some(json!({"job_id": job_id})));
    }

    /// Rolls back the failed job and every job of its sequence that already
    /// completed, then returns the sequence start job to re-enqueue.
    ///
    /// Does not check or count sequence tries: the caller checks, and the
    /// count goes up when the start job is dispatched. The failed job moves
    /// straight from running to up-for-retry in the same write as the rest
    /// of the rollback, so the chain never looks done in between.
    pub fn prepare_sequence_retry(&self, failed: &Job) -> Option<Job> {
        let start = self.chain.sequence_start_job(failed.id())?;
        info!(sequence_id = %start.id(), "Preparing sequence retry");

        let mut to_retry = self.sequence_jobs_completed(start.id());
        if !to_retry.contains(failed.id()) {
            to_retry.push(failed.id().clone());
        }
        self.chain.rollback_to_retry(&to_retry);

        self.sink.try_emit(
            SEQUENCE_RETRY,
            Some(json!({
                "sequence_id": start.id().to_string(),
                "failed_job_id": failed.id().to_string(),
                "rolled_back": to_retry.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })),
        );
        Some(start)
    }

    /// Breadth-first walk from the sequence start collecting the start and
    /// every complete job reachable through complete jobs.
    ///
    /// Expansion stops at jobs that are not complete, so the walk never
    /// passes the point of failure. Fan-in jobs are visited once.
    #[must_use]
    pub fn sequence_jobs_completed(&self, start: &AtomId) -> Vec<AtomId> {
        let mut visited: HashSet<AtomId> = HashSet::from([start.clone()]);
        let mut order = vec![start.clone()];
        let mut to_visit: VecDeque<AtomId> = VecDeque::new();

        let mut push_complete = |from: &AtomId, to_visit: &mut VecDeque<AtomId>| {
            for next in self.chain.next_jobs(from) {
                if next.state.is_complete() && visited.insert(next.id().clone()) {
                    order.push(next.id().clone());
                    to_visit.push_back(next.id().clone());
                }
            }
        };

        push_complete(start, &mut to_visit);
        while let Some(current) = to_visit.pop_front() {
            push_complete(&current, &mut to_visit);
        }
        order
    }

    /// Records the chain's verdict after it finished on its own.
    pub fn finalize(&self, complete: bool) {
        *self.verdict.lock() = Some(complete);
        info!(
            chain = self.chain.dag().name(),
            request_id = %self.chain.request_id(),
            complete,
            "Chain finalized"
        );
        self.sink.try_emit(
            CHAIN_FINALIZED,
            Some(json!({
                "request_id": self.chain.request_id().to_string(),
                "complete": complete,
            })),
        );
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("chain", &self.chain.dag().name())
            .field("stopped", &self.stop.is_cancelled())
            .field("done", &self.done.is_cancelled())
            .field("verdict", &self.verdict())
            .finish()
    }
}
