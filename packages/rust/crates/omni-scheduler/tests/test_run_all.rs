#![allow(missing_docs)]

//! Batch completion: outcome counts, concurrency ceiling, failure reporting.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::FutureExt;
use omni_scheduler::{
    CancellationToken, Outcome, Scheduler, SchedulerConfig, SchedulerError, run_all,
    run_all_outcomes,
};

/// Tracks how many jobs are running right now and the highest value seen.
#[derive(Default)]
struct Probe {
    running: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

struct ProbeGuard(Arc<Probe>);

impl Probe {
    fn enter(self: &Arc<Self>) -> ProbeGuard {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        ProbeGuard(Arc::clone(self))
    }

    fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

fn scripted(
    probe: &Arc<Probe>,
    delay_ms: u64,
    result: Result<u32, String>,
) -> impl Future<Output = Result<u32, String>> + Send + 'static {
    let probe = Arc::clone(probe);
    async move {
        let _guard = probe.enter();
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        result
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_all_outcomes_returns_one_outcome_per_job() -> Result<()> {
    for limit in [1, 2, 3, 7, 20] {
        let probe = Arc::new(Probe::default());
        let jobs: Vec<_> = (0..10_u32)
            .map(|i| {
                let result = if i % 3 == 0 {
                    Err(format!("job {i} failed"))
                } else {
                    Ok(i)
                };
                scripted(&probe, u64::from(i % 4), result)
            })
            .collect();

        let outcomes = run_all_outcomes(jobs, limit).await?;
        assert_eq!(outcomes.len(), 10, "limit {limit}");
        assert_eq!(outcomes.iter().filter(|o| o.is_failure()).count(), 4);
        assert_eq!(probe.running(), 0);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_limit() -> Result<()> {
    let jobs_count = 12_u32;
    for limit in [1, 3, 16] {
        let probe = Arc::new(Probe::default());
        let jobs: Vec<_> = (0..jobs_count)
            .map(|i| scripted(&probe, 20, Ok(i)))
            .collect();

        let values = run_all(jobs, limit).await?;
        assert_eq!(values.len(), 12);
        assert!(probe.peak() <= limit, "peak {} > limit {limit}", probe.peak());
        assert_eq!(probe.peak(), limit.min(jobs_count as usize));
    }
    Ok(())
}

#[tokio::test]
async fn serial_limit_never_overlaps_jobs() -> Result<()> {
    let intervals = Arc::new(Mutex::new(Vec::new()));
    let jobs: Vec<_> = (0..5_u32)
        .map(|i| {
            let intervals = Arc::clone(&intervals);
            async move {
                let start = Instant::now();
                tokio::time::sleep(Duration::from_millis(5)).await;
                let end = Instant::now();
                if let Ok(mut guard) = intervals.lock() {
                    guard.push((start, end));
                }
                Ok::<_, String>(i)
            }
        })
        .collect();

    run_all(jobs, 1).await?;

    let mut recorded = intervals
        .lock()
        .map_err(|_| anyhow::anyhow!("interval log poisoned"))?
        .clone();
    assert_eq!(recorded.len(), 5);
    recorded.sort_by_key(|(start, _)| *start);
    for pair in recorded.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "job intervals overlap");
    }
    Ok(())
}

#[tokio::test]
async fn empty_job_set_returns_empty() -> Result<()> {
    let none = std::iter::empty::<futures::future::Ready<Result<u32, String>>>();
    assert!(run_all(none, 4).await?.is_empty());

    let none = std::iter::empty::<futures::future::Ready<Result<u32, String>>>();
    assert!(run_all_outcomes(none, 1).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn zero_limit_is_rejected_before_running_anything() {
    let probe = Arc::new(Probe::default());
    let jobs = vec![scripted(&probe, 0, Ok(1))];
    let result = run_all(jobs, 0).await;
    assert!(matches!(result, Err(SchedulerError::InvalidLimit(0))));
    assert_eq!(probe.started(), 0);
}

#[tokio::test]
async fn collect_mode_keeps_every_failure() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let jobs = vec![
        scripted(&probe, 0, Ok(1)),
        scripted(&probe, 10, Err("A".to_string())),
        scripted(&probe, 0, Ok(2)),
        scripted(&probe, 40, Err("B".to_string())),
    ];

    let outcomes = run_all_outcomes(jobs, 4).await?;
    assert_eq!(outcomes.len(), 4);
    let mut values: Vec<u32> = outcomes.iter().filter_map(|o| o.clone().value()).collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2]);
    let mut failures: Vec<String> = outcomes.into_iter().filter_map(Outcome::failure).collect();
    failures.sort();
    assert_eq!(failures, vec!["A".to_string(), "B".to_string()]);
    Ok(())
}

#[tokio::test]
async fn raise_mode_reports_last_failure_and_keeps_the_rest() {
    let probe = Arc::new(Probe::default());
    let jobs = vec![
        scripted(&probe, 0, Ok(1)),
        scripted(&probe, 10, Err("A".to_string())),
        scripted(&probe, 0, Ok(2)),
        scripted(&probe, 40, Err("B".to_string())),
    ];

    let error = match run_all(jobs, 4).await {
        Ok(values) => panic!("expected failure, got {values:?}"),
        Err(error) => error,
    };
    assert!(error.to_string().contains('B'), "{error}");
    assert_eq!(error.primary().map(String::as_str), Some("B"));
    match &error {
        SchedulerError::Aggregate { secondary, .. } => {
            assert_eq!(secondary, &vec!["A".to_string()]);
        }
        other => panic!("expected aggregate error, got {other:?}"),
    }
    assert_eq!(error.failures().len(), 2);
    assert_eq!(probe.started(), 4, "all jobs run without fail-fast");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fail_fast_stops_remaining_jobs() {
    let probe = Arc::new(Probe::default());
    let mut jobs = vec![scripted(&probe, 5, Err("first".to_string()))];
    jobs.extend((0..10).map(|i| scripted(&probe, 300, Ok(i))));

    let scheduler = Scheduler::new(SchedulerConfig {
        limit: 2,
        cancel_on_first_failure: true,
        ..SchedulerConfig::default()
    });
    let started = Instant::now();
    let result = scheduler.run_all(jobs).await;

    assert!(matches!(result, Err(SchedulerError::Job(ref e)) if e == "first"));
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(probe.started() < 11);
    assert_eq!(probe.running(), 0, "in-flight jobs abandoned");
}

#[tokio::test]
async fn fail_fast_drains_an_unbounded_source() {
    let jobs = (0_u64..).map(|i| async move {
        if i == 5 {
            Err(format!("job {i} failed"))
        } else {
            Ok(i)
        }
    });
    let scheduler = Scheduler::new(SchedulerConfig {
        limit: 3,
        cancel_on_first_failure: true,
        ..SchedulerConfig::default()
    });

    let result = tokio::time::timeout(Duration::from_secs(5), scheduler.run_all(jobs)).await;
    assert!(matches!(result, Ok(Err(SchedulerError::Job(_)))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_cancellation_outranks_job_failures() {
    let probe = Arc::new(Probe::default());
    let mut jobs = vec![scripted(&probe, 0, Err("ignored".to_string()))];
    jobs.extend((0..4).map(|i| scripted(&probe, 2_000, Ok(i))));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = Scheduler::new(SchedulerConfig::with_limit(5))
        .with_cancellation(token)
        .run_all(jobs)
        .await;

    assert!(matches!(result, Err(SchedulerError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(probe.running(), 0);
}

async fn explode() -> Result<u32, String> {
    panic!("kaboom")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_job_is_reported_after_siblings_settle() {
    let completed = Arc::new(AtomicUsize::new(0));
    let mut jobs: Vec<futures::future::BoxFuture<'static, Result<u32, String>>> =
        vec![Box::pin(explode())];
    for i in 0..3_u32 {
        let completed = Arc::clone(&completed);
        jobs.push(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            completed.fetch_add(1, Ordering::SeqCst);
            Ok::<u32, String>(i)
        }));
    }

    let result = run_all_outcomes(jobs, 4).await;
    match result {
        Err(SchedulerError::Panicked(message)) => assert!(message.contains("kaboom")),
        other => panic!("expected panic report, got {other:?}"),
    }
    assert_eq!(completed.load(Ordering::SeqCst), 3, "siblings ran to completion");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panic_with_fail_fast_abandons_siblings() {
    let probe = Arc::new(Probe::default());
    let mut jobs: Vec<futures::future::BoxFuture<'static, Result<u32, String>>> =
        vec![Box::pin(explode())];
    jobs.extend((0..3).map(|i| scripted(&probe, 2_000, Ok(i)).boxed()));

    let scheduler = Scheduler::new(SchedulerConfig {
        limit: 4,
        cancel_on_first_failure: true,
        ..SchedulerConfig::default()
    });
    let started = Instant::now();
    let result = scheduler.run_all(jobs).await;

    assert!(matches!(result, Err(SchedulerError::Panicked(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(probe.running(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn limit_beyond_worker_cap_runs_everything() -> Result<()> {
    let single = run_all(vec![async { Ok::<u32, String>(1) }], 100_000).await?;
    assert_eq!(single, vec![1]);

    let probe = Arc::new(Probe::default());
    let jobs: Vec<_> = (0..50_u32).map(|i| scripted(&probe, 5, Ok(i))).collect();
    let outcomes = run_all_outcomes(jobs, 100_000).await?;
    assert_eq!(outcomes.len(), 50);
    assert!(probe.peak() <= 50);
    Ok(())
}

#[tokio::test]
async fn collect_failures_does_not_change_batch_raising() {
    let probe = Arc::new(Probe::default());
    let jobs = vec![scripted(&probe, 0, Ok(1)), scripted(&probe, 0, Err("A".to_string()))];
    let scheduler = Scheduler::new(SchedulerConfig {
        limit: 2,
        collect_failures: true,
        ..SchedulerConfig::default()
    });

    let result = scheduler.run_all(jobs).await;
    assert!(matches!(result, Err(SchedulerError::Job(ref e)) if e == "A"));
}
