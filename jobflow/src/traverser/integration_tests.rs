//! End-to-end chain runs.

use super::{ChainOutcome, Traverser};
use crate::chain::{Chain, ChainBuilder, NodeOptions};
use crate::config::TraverserConfig;
use crate::context::Request;
use crate::core::{AtomId, State};
use crate::errors::StopError;
use crate::events::{
    CollectingEventSink, JOB_NOT_RUNNABLE, SEQUENCE_EXHAUSTED, SEQUENCE_RETRY, TRAVERSER_STOPPED,
};
use crate::steps::{NumberGuessStep, PingStep, SleepStep, Step};
use crate::testing::{linear_chain, MockStep};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn config() -> TraverserConfig {
    TraverserConfig::new()
        .with_stop_timeout(2.0)
        .with_send_timeout(2.0)
        .with_shutdown_wait(2.0)
}

fn traverser(chain: &Arc<Chain>) -> (Traverser, Arc<CollectingEventSink>) {
    let sink = Arc::new(CollectingEventSink::new());
    let traverser = Traverser::with_event_sink(chain.clone(), config(), sink.clone());
    (traverser, sink)
}

fn as_steps(mocks: &[Arc<MockStep>]) -> Vec<Arc<dyn Step>> {
    mocks.iter().map(|m| m.clone() as Arc<dyn Step>).collect()
}

/// Waits for in-flight job tasks to record their state and unregister.
async fn wait_for_runners(traverser: &Traverser) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !traverser.runners().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("runners should unregister");
}

async fn run_with_timeout(traverser: &Traverser) -> ChainOutcome {
    tokio::time::timeout(Duration::from_secs(5), traverser.run())
        .await
        .expect("chain should finish")
}

#[tokio::test]
async fn test_ping_chain_completes() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let ping = Arc::new(PingStep::new("ping", ""));
    let request = Request::new()
        .with_arg("hostname", json!(addr))
        .with_arg("count", json!(2))
        .with_arg("interval_ms", json!(5));
    let chain = ChainBuilder::new("ping", 1, request)
        .add_step(ping.clone(), NodeOptions::new())
        .build()
        .await
        .unwrap();
    let chain = Arc::new(chain);
    let (traverser, _) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Completed);
    assert_eq!(chain.is_done_running(), (true, true));
    assert_eq!(chain.job_state(ping.id()), Some(State::Success));
    assert_eq!(ping.last_statistics().unwrap().packets_recv, 2);
}

#[tokio::test]
async fn test_number_guess_within_retry_budget() {
    let guess = Arc::new(NumberGuessStep::new("guess", ""));
    let chain = ChainBuilder::new("guess", 1, Request::new().with_arg("secret", json!(1)))
        .add_step(guess.clone(), NodeOptions::new().with_retry(6))
        .build()
        .await
        .unwrap();
    let chain = Arc::new(chain);
    let (traverser, _) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Completed);
    assert_eq!(chain.job_state(guess.id()), Some(State::Success));
    assert_eq!(chain.job_tries(guess.id()), 7);
}

#[tokio::test]
async fn test_number_guess_out_of_tries() {
    let guess = Arc::new(NumberGuessStep::new("guess", ""));
    let chain = ChainBuilder::new("guess", 1, Request::new().with_arg("secret", json!(1)))
        .add_step(guess.clone(), NodeOptions::new().with_retry(5))
        .build()
        .await
        .unwrap();
    let chain = Arc::new(chain);
    let (traverser, sink) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Failed);
    assert_eq!(chain.job_state(guess.id()), Some(State::Fail));
    assert_eq!(chain.job_tries(guess.id()), 6);
    assert_eq!(chain.is_done_running(), (true, false));
    assert_eq!(sink.count_of(SEQUENCE_EXHAUSTED), 1);
}

#[tokio::test]
async fn test_sequence_retry_reruns_only_completed_part() {
    let mocks = vec![
        Arc::new(MockStep::new("a")),
        Arc::new(MockStep::new("b")),
        Arc::new(MockStep::new("c").with_results(vec![State::Fail])),
        Arc::new(MockStep::new("d")),
    ];
    let chain = Arc::new(
        linear_chain(&as_steps(&mocks), NodeOptions::new(), Some(1))
            .await
            .unwrap(),
    );
    let (traverser, sink) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Completed);
    let calls: Vec<usize> = mocks.iter().map(|m| m.call_count()).collect();
    assert_eq!(calls, vec![2, 2, 2, 1]);
    assert_eq!(chain.sequence_tries(mocks[0].id()), 2);

    let retries = sink.data_of(SEQUENCE_RETRY);
    assert_eq!(retries.len(), 1);
    let mut rolled_back: Vec<String> = retries[0]["rolled_back"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    rolled_back.sort();
    let mut expected: Vec<String> = mocks[..3].iter().map(|m| m.id().to_string()).collect();
    expected.sort();
    assert_eq!(rolled_back, expected);
}

#[tokio::test]
async fn test_sequence_retry_exhausted() {
    let mocks = vec![
        Arc::new(MockStep::new("a")),
        Arc::new(MockStep::new("b").with_default(State::Fail)),
        Arc::new(MockStep::new("c")),
    ];
    let chain = Arc::new(
        linear_chain(&as_steps(&mocks), NodeOptions::new(), Some(1))
            .await
            .unwrap(),
    );
    let (traverser, sink) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Failed);
    assert_eq!(mocks[0].call_count(), 2);
    assert_eq!(mocks[1].call_count(), 2);
    assert_eq!(mocks[2].call_count(), 0);
    assert_eq!(chain.job_state(mocks[1].id()), Some(State::Fail));
    assert_eq!(chain.job_state(mocks[2].id()), Some(State::Unknown));
    assert_eq!(sink.count_of(SEQUENCE_RETRY), 1);
    assert_eq!(sink.count_of(SEQUENCE_EXHAUSTED), 1);
}

#[tokio::test]
async fn test_job_tries_accumulate_across_sequence_retries() {
    let mocks = vec![
        Arc::new(MockStep::new("a")),
        Arc::new(MockStep::new("b").with_results(vec![State::Fail, State::Fail])),
    ];
    let chain = Arc::new(
        linear_chain(&as_steps(&mocks), NodeOptions::new().with_retry(1), Some(1))
            .await
            .unwrap(),
    );
    let (traverser, _) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Completed);
    assert_eq!(mocks[1].tries_seen(), vec![(1, 2), (2, 2), (3, 2)]);
    assert_eq!(chain.job_tries(mocks[1].id()), 3);
    assert_eq!(chain.job_tries(mocks[0].id()), 2);
}

#[tokio::test]
async fn test_fan_in_job_runs_once() {
    let mocks: Vec<Arc<MockStep>> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| Arc::new(MockStep::new(*id)))
        .collect();
    let ids: Vec<AtomId> = mocks.iter().map(|m| m.id().clone()).collect();
    let mut builder = ChainBuilder::new("fan-in", 1, Request::new());
    for step in as_steps(&mocks) {
        builder = builder.add_step(step, NodeOptions::new());
    }
    let chain = builder
        .depends_on(&ids[1], &ids[0])
        .depends_on(&ids[2], &ids[0])
        .depends_on(&ids[3], &ids[1])
        .depends_on(&ids[3], &ids[2])
        .build()
        .await
        .unwrap();
    let chain = Arc::new(chain);
    let (traverser, sink) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Completed);
    assert_eq!(mocks[3].call_count(), 1);
    assert_eq!(sink.count_of(JOB_NOT_RUNNABLE), 1);
}

#[tokio::test]
async fn test_independent_branch_finishes_after_failure() {
    let bad = Arc::new(MockStep::new("bad").with_default(State::Fail));
    let after_bad = Arc::new(MockStep::new("after-bad"));
    let good = Arc::new(MockStep::new("good"));
    let chain = ChainBuilder::new("branches", 1, Request::new())
        .add_step(bad.clone(), NodeOptions::new())
        .add_step(after_bad.clone(), NodeOptions::new())
        .add_step(good.clone(), NodeOptions::new())
        .depends_on(after_bad.id(), bad.id())
        .build()
        .await
        .unwrap();
    let chain = Arc::new(chain);
    let (traverser, _) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Failed);
    assert_eq!(chain.job_state(good.id()), Some(State::Success));
    assert_eq!(chain.job_state(bad.id()), Some(State::Fail));
    assert_eq!(chain.job_state(after_bad.id()), Some(State::Unknown));
    assert_eq!(after_bad.call_count(), 0);
}

#[tokio::test]
async fn test_panicking_step_ends_as_exception() {
    let boom = Arc::new(MockStep::new("boom").with_panic("kaboom"));
    let chain = Arc::new(
        linear_chain(&[boom.clone() as Arc<dyn Step>], NodeOptions::new(), None)
            .await
            .unwrap(),
    );
    let (traverser, _) = traverser(&chain);

    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Failed);
    assert_eq!(chain.job_state(boom.id()), Some(State::Exception));
}

#[tokio::test]
async fn test_empty_chain_completes() {
    let chain = Arc::new(
        ChainBuilder::new("empty", 1, Request::new())
            .build()
            .await
            .unwrap(),
    );
    let (traverser, _) = traverser(&chain);
    assert_eq!(run_with_timeout(&traverser).await, ChainOutcome::Completed);
}

#[tokio::test]
async fn test_stop_mid_run() {
    let first = Arc::new(MockStep::new("first").blocking());
    let second = Arc::new(MockStep::new("second"));
    let chain = Arc::new(
        linear_chain(
            &as_steps(&[first.clone(), second.clone()]),
            NodeOptions::new().with_retry(3),
            None,
        )
        .await
        .unwrap(),
    );
    let (traverser, sink) = traverser(&chain);

    let running = {
        let traverser = traverser.clone();
        tokio::spawn(async move { traverser.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(traverser.runners().count(), 1);

    tokio::time::timeout(Duration::from_secs(3), traverser.stop())
        .await
        .expect("stop should finish")
        .unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(3), running)
        .await
        .expect("run should return after stop")
        .unwrap();

    assert_eq!(outcome, ChainOutcome::Stopped);
    wait_for_runners(&traverser).await;
    assert_eq!(first.stop_count(), 1);
    assert_eq!(first.call_count(), 1);
    assert_eq!(second.call_count(), 0);
    assert_eq!(chain.job_state(first.id()), Some(State::Canceled));
    assert_eq!(sink.count_of(TRAVERSER_STOPPED), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let step = Arc::new(MockStep::new("wait").blocking());
    let chain = Arc::new(
        linear_chain(&[step.clone() as Arc<dyn Step>], NodeOptions::new(), None)
            .await
            .unwrap(),
    );
    let (traverser, sink) = traverser(&chain);
    let running = {
        let traverser = traverser.clone();
        tokio::spawn(async move { traverser.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (first, second) = tokio::join!(traverser.stop(), traverser.stop());
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(traverser.stop().await.is_ok());
    assert_eq!(running.await.unwrap(), ChainOutcome::Stopped);
    assert_eq!(step.stop_count(), 1);
    assert_eq!(sink.count_of(TRAVERSER_STOPPED), 1);
}

#[tokio::test]
async fn test_stop_errors_are_aggregated() {
    let stuck = Arc::new(MockStep::new("stuck").blocking().with_stop_error("will not stop"));
    let fine = Arc::new(MockStep::new("fine").blocking());
    let chain = ChainBuilder::new("stuck", 1, Request::new())
        .add_step(stuck.clone(), NodeOptions::new())
        .add_step(fine.clone(), NodeOptions::new())
        .build()
        .await
        .unwrap();
    let chain = Arc::new(chain);
    let (traverser, _) = traverser(&chain);
    let running = {
        let traverser = traverser.clone();
        tokio::spawn(async move { traverser.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = traverser.stop().await.unwrap_err();
    match err {
        StopError::Runners { failed } => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, stuck.id().to_string());
            assert!(failed[0].1.contains("will not stop"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fine.stop_count(), 1);
    assert_eq!(running.await.unwrap(), ChainOutcome::Stopped);
}

#[tokio::test]
async fn test_stop_interrupts_sleeping_job() {
    let sleep = Arc::new(SleepStep::new("nap", ""));
    let chain = ChainBuilder::new("nap", 1, Request::new().with_arg("duration_ms", json!(60_000)))
        .add_step(sleep.clone(), NodeOptions::new())
        .build()
        .await
        .unwrap();
    let chain = Arc::new(chain);
    let (traverser, _) = traverser(&chain);
    let running = {
        let traverser = traverser.clone();
        tokio::spawn(async move { traverser.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    traverser.stop().await.unwrap();
    assert!(started.elapsed() < config().stop_timeout());
    assert_eq!(running.await.unwrap(), ChainOutcome::Stopped);

    wait_for_runners(&traverser).await;
    assert_eq!(chain.job_state(sleep.id()), Some(State::Canceled));
}

#[tokio::test]
async fn test_job_finishing_during_stop_is_recorded() {
    let release = Arc::new(Notify::new());
    let step = Arc::new(MockStep::new("gated").with_gate(release.clone()));
    let chain = Arc::new(
        linear_chain(&[step.clone() as Arc<dyn Step>], NodeOptions::new(), None)
            .await
            .unwrap(),
    );
    let (traverser, _) = traverser(&chain);
    let running = {
        let traverser = traverser.clone();
        tokio::spawn(async move { traverser.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(traverser.runners().count(), 1);

    release.notify_one();
    traverser.stop().await.unwrap();
    let outcome = running.await.unwrap();
    assert!(
        matches!(outcome, ChainOutcome::Stopped | ChainOutcome::Completed),
        "{outcome:?}"
    );

    wait_for_runners(&traverser).await;
    let state = chain.job_state(step.id());
    assert!(
        matches!(state, Some(State::Success | State::Canceled)),
        "job left in {state:?}"
    );
    assert!(chain.is_done_running().0);
}

#[tokio::test]
async fn test_stop_times_out_on_hanging_runner() {
    let step = Arc::new(MockStep::new("hang").blocking().with_hanging_stop());
    let chain = Arc::new(
        linear_chain(&[step.clone() as Arc<dyn Step>], NodeOptions::new(), None)
            .await
            .unwrap(),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let traverser = Traverser::with_event_sink(
        chain.clone(),
        config().with_stop_timeout(0.2),
        sink.clone(),
    );
    let running = {
        let traverser = traverser.clone();
        tokio::spawn(async move { traverser.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let err = tokio::time::timeout(Duration::from_secs(2), traverser.stop())
        .await
        .expect("stop should give up at its deadline")
        .unwrap_err();
    assert!(matches!(err, StopError::Timeout("runners")), "{err}");
    assert!(started.elapsed() < Duration::from_secs(1));

    let outcome = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("run should return after stop")
        .unwrap();
    assert_eq!(outcome, ChainOutcome::Stopped);

    wait_for_runners(&traverser).await;
    assert_eq!(chain.job_state(step.id()), Some(State::Canceled));
    assert_eq!(step.stop_count(), 1);
    let data = sink.data_of(TRAVERSER_STOPPED);
    assert_eq!(data[0]["clean"], json!(false));
    assert_eq!(data[0]["error"]["waiting_for"], json!("runners"));
}

#[tokio::test]
async fn test_run_stops_waiting_after_shutdown_wait() {
    let step = Arc::new(MockStep::new("hang").blocking().with_hanging_stop());
    let chain = Arc::new(
        linear_chain(&[step.clone() as Arc<dyn Step>], NodeOptions::new(), None)
            .await
            .unwrap(),
    );
    let traverser = Traverser::new(
        chain.clone(),
        config().with_stop_timeout(1.0).with_shutdown_wait(0.1),
    );
    let running = {
        let traverser = traverser.clone();
        tokio::spawn(async move { traverser.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopping = {
        let traverser = traverser.clone();
        tokio::spawn(async move { traverser.stop().await })
    };
    let outcome = tokio::time::timeout(Duration::from_millis(600), running)
        .await
        .expect("run should stop waiting after the shutdown wait")
        .unwrap();
    assert_eq!(outcome, ChainOutcome::Stopped);
    assert!(!stopping.is_finished());

    let result = tokio::time::timeout(Duration::from_secs(2), stopping)
        .await
        .expect("stop should give up at its deadline")
        .unwrap();
    assert!(matches!(result, Err(StopError::Timeout("runners"))));
    wait_for_runners(&traverser).await;
}
