use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::{RetryConfig, YadlConfig};
use crate::source_list::{SourceLine, SourceList};
use crate::test_support::{ScriptedFetcher, Step};

fn list(urls: &[&str]) -> SourceList {
    SourceList {
        sources: urls
            .iter()
            .enumerate()
            .map(|(i, u)| SourceLine {
                line: i as u32 + 1,
                url: (*u).to_string(),
            })
            .collect(),
        rejected: Vec::new(),
    }
}

/// Config with instant retries so scenario tests don't sleep.
fn fast_config() -> YadlConfig {
    let mut cfg = YadlConfig::default();
    cfg.max_concurrent_items = 2;
    cfg.output_dir = Some("/tmp/yadl-test-out".into());
    cfg.retry = Some(RetryConfig {
        max_attempts: 4,
        base_delay_secs: 0.0,
        max_delay_secs: 0,
        rate_limit_delay_secs: 0,
        max_rate_limit_hits: 3,
    });
    cfg
}

struct Harness {
    _dir: tempfile::TempDir,
    store: LedgerStore,
    fetcher: Arc<ScriptedFetcher>,
    controller: BatchController,
}

fn harness(cfg: YadlConfig) -> Harness {
    harness_with(cfg, Arc::new(ScriptedFetcher::new()))
}

fn harness_with(cfg: YadlConfig, fetcher: Arc<ScriptedFetcher>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = LedgerStore::open_at(dir.path().join("ledgers")).unwrap();
    let controller =
        BatchController::new(store.clone(), Arc::clone(&fetcher) as Arc<dyn AudioFetcher>, cfg)
            .unwrap();
    Harness {
        _dir: dir,
        store,
        fetcher,
        controller,
    }
}

#[tokio::test]
async fn clean_batch_succeeds_end_to_end() {
    let h = harness(fast_config());
    let input = list(&["https://v/1", "https://v/2", "https://v/3"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();

    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.counts.succeeded, 3);
    assert_eq!(summary.counts.failed, 0);
    assert!(summary.failed.is_empty());
    assert!(job.is_complete());
    assert!(job.items.iter().all(|i| i.output_path.is_some()));
    assert!(summary.bytes_transferred > 0);

    // The final state is durable.
    let reloaded = h.store.load(&job.id).unwrap();
    assert!(reloaded.is_complete());
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let h = harness(fast_config());
    // Item 3 fails twice with transient errors, then succeeds.
    h.fetcher.script(
        "https://v/3",
        vec![
            Step::Fail(FetchError::Network("connection reset".into())),
            Step::Fail(FetchError::Timeout),
            Step::Succeed { bytes: 2048 },
        ],
    );
    let input = list(&[
        "https://v/1",
        "https://v/2",
        "https://v/3",
        "https://v/4",
        "https://v/5",
    ]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();

    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.counts.succeeded, 5);
    assert_eq!(summary.counts.failed, 0);
    let item3 = &job.items[2];
    assert_eq!(item3.state, ItemState::Succeeded);
    assert_eq!(item3.attempts, 3);
    assert_eq!(h.fetcher.attempts_for("https://v/3"), 3);
}

#[tokio::test]
async fn transient_budget_forces_failed() {
    let mut cfg = fast_config();
    cfg.retry.as_mut().unwrap().max_attempts = 2;
    let h = harness(cfg);
    h.fetcher.script(
        "https://v/1",
        vec![
            Step::Fail(FetchError::Network("reset".into())),
            Step::Fail(FetchError::Network("reset".into())),
            Step::Succeed { bytes: 1 },
        ],
    );
    let input = list(&["https://v/1"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();

    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.counts.failed, 1);
    let item = &job.items[0];
    assert_eq!(item.state, ItemState::Failed);
    // attempts never exceeds the budget.
    assert_eq!(item.attempts, 2);
    assert_eq!(h.fetcher.attempts_for("https://v/1"), 2);
    assert_eq!(
        item.last_error.as_ref().unwrap().class,
        FailureClass::Transient
    );
}

#[tokio::test]
async fn permanent_failure_gets_exactly_one_attempt() {
    let h = harness(fast_config());
    h.fetcher.script(
        "https://v/gone",
        vec![Step::Fail(FetchError::NotFound("video unavailable".into()))],
    );
    let input = list(&["https://v/gone", "https://v/ok"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();

    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.counts.succeeded, 1);
    assert_eq!(summary.counts.failed, 1);
    assert_eq!(h.fetcher.attempts_for("https://v/gone"), 1);
    assert_eq!(job.items[0].attempts, 1);
    assert_eq!(
        job.items[0].last_error.as_ref().unwrap().class,
        FailureClass::Permanent
    );
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].source, "https://v/gone");
    assert_eq!(summary.failed[0].line, Some(1));
}

#[tokio::test]
async fn rate_limiting_spares_the_transient_budget() {
    let mut cfg = fast_config();
    // A transient budget of 2 that throttling must not consume.
    cfg.retry.as_mut().unwrap().max_attempts = 2;
    let h = harness(cfg);
    h.fetcher.script(
        "https://v/1",
        vec![
            Step::Fail(FetchError::RateLimited { retry_after: None }),
            Step::Fail(FetchError::RateLimited {
                retry_after: Some(Duration::ZERO),
            }),
            Step::Succeed { bytes: 512 },
        ],
    );
    let input = list(&["https://v/1"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();

    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.counts.succeeded, 1);
    let item = &job.items[0];
    assert_eq!(item.state, ItemState::Succeeded);
    // Both throttled attempts were handed back.
    assert_eq!(item.attempts, 1);
    assert_eq!(item.rate_limit_hits, 2);
    assert_eq!(h.fetcher.attempts_for("https://v/1"), 3);
}

#[tokio::test]
async fn resume_processes_only_unfinished_items() {
    let h = harness(fast_config());
    let input = list(&["https://v/1", "https://v/2", "https://v/3"]);
    let path = Path::new("/tmp/urls.txt");

    // Simulate a run interrupted after item 1 finished while item 2 was
    // mid-flight: that is exactly what the ledger on disk looks like.
    let mut job = h.controller.prepare(path, &input, false).unwrap();
    job.begin_attempt(0);
    job.record_success(0, "/music/1.mp3".into());
    job.begin_attempt(1);
    h.store.persist(&mut job).unwrap();
    drop(job);

    let mut resumed = h.controller.prepare(path, &input, true).unwrap();
    assert_eq!(resumed.items[0].state, ItemState::Succeeded);
    assert_eq!(resumed.items[1].state, ItemState::Pending);
    assert_eq!(resumed.items[2].state, ItemState::Pending);

    let summary = h.controller.run(&mut resumed).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.counts.succeeded, 3);
    // Item 1 was never re-fetched.
    assert_eq!(h.fetcher.attempts_for("https://v/1"), 0);
    assert_eq!(h.fetcher.attempts_for("https://v/2"), 1);
    assert_eq!(h.fetcher.attempts_for("https://v/3"), 1);
    // The interrupted attempt stayed counted; the resumed one adds to it.
    assert_eq!(resumed.items[1].attempts, 2);
}

#[tokio::test]
async fn resume_never_runs_past_the_attempt_budget() {
    let mut cfg = fast_config();
    cfg.retry.as_mut().unwrap().max_attempts = 2;
    let h = harness(cfg);
    let input = list(&["https://v/1", "https://v/2"]);
    let path = Path::new("/tmp/urls.txt");

    // The first attempt failed transiently and the second (last budgeted)
    // was in flight when the run died.
    let mut job = h.controller.prepare(path, &input, false).unwrap();
    job.begin_attempt(0);
    job.record_retryable(
        0,
        ItemFailure {
            class: FailureClass::Transient,
            message: "connection reset".into(),
        },
    );
    job.begin_attempt(0);
    h.store.persist(&mut job).unwrap();
    drop(job);

    let mut resumed = h.controller.prepare(path, &input, true).unwrap();
    assert_eq!(resumed.items[0].state, ItemState::Pending);
    assert_eq!(resumed.items[0].attempts, 2);

    let summary = h.controller.run(&mut resumed).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    // The exhausted item fails without being fetched again.
    assert_eq!(resumed.items[0].state, ItemState::Failed);
    assert_eq!(resumed.items[0].attempts, 2);
    assert_eq!(h.fetcher.attempts_for("https://v/1"), 0);
    assert_eq!(
        resumed.items[0].last_error.as_ref().unwrap().message,
        "connection reset"
    );
    assert_eq!(resumed.items[1].state, ItemState::Succeeded);

    let stored = h.store.load(&resumed.id).unwrap();
    assert_eq!(stored.items[0].state, ItemState::Failed);
    assert_eq!(stored.items[0].attempts, 2);
}

#[tokio::test]
async fn fresh_run_refuses_existing_ledger() {
    let h = harness(fast_config());
    let input = list(&["https://v/1"]);
    let path = Path::new("/tmp/urls.txt");
    let _job = h.controller.prepare(path, &input, false).unwrap();

    let err = h.controller.prepare(path, &input, false).unwrap_err();
    assert!(matches!(
        err,
        RunError::Ledger(LedgerError::AlreadyExists(_))
    ));
    assert!(err.resume_is_safe());
}

#[tokio::test]
async fn resume_without_ledger_creates_one() {
    let h = harness(fast_config());
    let input = list(&["https://v/1"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, true)
        .unwrap();
    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.counts.succeeded, 1);
}

#[tokio::test]
async fn drift_refuses_resume_and_mutates_nothing() {
    let h = harness(fast_config());
    let path = Path::new("/tmp/urls.txt");
    let original = list(&["https://v/1", "https://v/2"]);
    let mut job = h.controller.prepare(path, &original, false).unwrap();
    job.begin_attempt(0);
    job.record_success(0, "/music/1.mp3".into());
    h.store.persist(&mut job).unwrap();
    let stored_before = h.store.load(&job.id).unwrap();

    let changed = list(&["https://v/1", "https://v/2", "https://v/new"]);
    let err = h.controller.prepare(path, &changed, true).unwrap_err();
    assert!(matches!(err, RunError::Drift(_)));
    assert!(err.resume_is_safe());

    // Zero mutations to the stored ledger.
    let stored_after = h.store.load(&job.id).unwrap();
    assert_eq!(stored_after.updated_at, stored_before.updated_at);
    assert_eq!(stored_after.items.len(), stored_before.items.len());
    assert_eq!(stored_after.items[0].state, ItemState::Succeeded);
}

#[tokio::test]
async fn playlist_expands_and_parent_settles() {
    let mut cfg = fast_config();
    cfg.expand_playlists = true;
    let h = harness(cfg);
    h.fetcher.script(
        "https://v/playlist",
        vec![Step::Expand(vec![
            "https://v/p1".into(),
            "https://v/p2".into(),
        ])],
    );
    let input = list(&["https://v/playlist", "https://v/solo"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();

    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    // Parent + 2 children + solo.
    assert_eq!(summary.counts.succeeded, 4);
    assert_eq!(job.items.len(), 4);
    let parent = &job.items[0];
    assert_eq!(parent.kind, ItemKind::PlaylistParent);
    assert_eq!(parent.state, ItemState::Succeeded);
    assert!(parent.output_path.is_none());
    assert_eq!(h.fetcher.attempts_for("https://v/p1"), 1);
    assert_eq!(h.fetcher.attempts_for("https://v/p2"), 1);
}

#[tokio::test]
async fn playlist_parent_fails_when_a_child_fails() {
    let mut cfg = fast_config();
    cfg.expand_playlists = true;
    let h = harness(cfg);
    h.fetcher.script(
        "https://v/playlist",
        vec![Step::Expand(vec![
            "https://v/p1".into(),
            "https://v/p2".into(),
        ])],
    );
    h.fetcher.script(
        "https://v/p2",
        vec![Step::Fail(FetchError::NotFound("deleted".into()))],
    );
    let input = list(&["https://v/playlist"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();

    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(job.items[0].state, ItemState::Failed);
    assert_eq!(summary.counts.failed, 2);
    assert_eq!(summary.counts.succeeded, 1);
}

#[tokio::test]
async fn empty_playlist_is_skipped() {
    let mut cfg = fast_config();
    cfg.expand_playlists = true;
    let h = harness(cfg);
    h.fetcher
        .script("https://v/playlist", vec![Step::Expand(Vec::new())]);
    let input = list(&["https://v/playlist"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();

    let summary = h.controller.run(&mut job).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.counts.skipped, 1);
    assert!(job.is_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_stops_dispatch_and_resume_finishes() {
    let mut cfg = fast_config();
    cfg.max_concurrent_items = 1;
    let fetcher = Arc::new(ScriptedFetcher::with_work_delay(Duration::from_millis(50)));
    let h = harness_with(cfg.clone(), fetcher);
    let input = list(&["https://v/1", "https://v/2", "https://v/3"]);
    let path = Path::new("/tmp/urls.txt");
    let mut job = h.controller.prepare(path, &input, false).unwrap();

    let cancel = h.controller.cancel_flag();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let summary = h.controller.run(&mut job).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Aborted);
    // Nothing is left mid-flight, undispatched items stay pending.
    assert!(job.items.iter().all(|i| i.state != ItemState::InProgress));
    assert!(summary.counts.pending >= 1);

    // A fresh controller (no cancellation) resumes and finishes the rest.
    let h2_controller = BatchController::new(
        h.store.clone(),
        Arc::clone(&h.fetcher) as Arc<dyn AudioFetcher>,
        cfg,
    )
    .unwrap();
    let mut resumed = h2_controller.prepare(path, &input, true).unwrap();
    let summary = h2_controller.run(&mut resumed).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.counts.succeeded, 3);
}

#[tokio::test]
async fn ledger_is_persisted_after_every_result() {
    let h = harness(fast_config());
    let input = list(&["https://v/1", "https://v/2"]);
    let mut job = h
        .controller
        .prepare(Path::new("/tmp/urls.txt"), &input, false)
        .unwrap();
    h.controller.run(&mut job).await.unwrap();

    // What's on disk matches what the controller ended with.
    let stored = h.store.load(&job.id).unwrap();
    assert_eq!(stored.counts(), job.counts());
    assert_eq!(
        stored.items[0].output_path, job.items[0].output_path
    );
}

#[tokio::test]
async fn invalid_config_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let store = LedgerStore::open_at(dir.path().join("ledgers")).unwrap();
    let mut cfg = fast_config();
    cfg.max_concurrent_items = 0;
    match BatchController::new(store, Arc::new(ScriptedFetcher::new()), cfg) {
        Err(RunError::Config(_)) => {}
        Err(other) => panic!("expected config error, got {:?}", other),
        Ok(_) => panic!("expected config error, got a controller"),
    }
}
