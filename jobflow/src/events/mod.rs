//! Event sinks for chain observability.
//!
//! The traverser and reaper are handed a sink at construction and report
//! job and chain lifecycle events to it. Nothing here is global.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A job was handed to the dispatch loop.
pub const JOB_ENQUEUED: &str = "job.enqueued";
/// A job's runner started.
pub const JOB_STARTED: &str = "job.started";
/// A job's runner returned, before the job is handed to the reaper.
pub const JOB_FINISHED: &str = "job.finished";
/// A finished job could not be handed to the reaper; its state was recorded directly.
pub const JOB_UNREAPED: &str = "job.unreaped";
/// A successor was examined after a completion but is still blocked.
pub const JOB_NOT_RUNNABLE: &str = "job.not_runnable";
/// A failed sequence was rolled back and its first job re-enqueued.
pub const SEQUENCE_RETRY: &str = "sequence.retry";
/// A job failed for good: it is in no sequence or its sequence has no retries left.
pub const SEQUENCE_EXHAUSTED: &str = "sequence.exhausted";
/// The chain finished on its own.
pub const CHAIN_FINALIZED: &str = "chain.finalized";
/// The traverser completed its stop sequence.
pub const TRAVERSER_STOPPED: &str = "traverser.stopped";
