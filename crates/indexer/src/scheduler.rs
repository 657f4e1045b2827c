//! Poll scheduler: runs each registered task on its own interval until stopped.
//!
//! Tasks are isolated from each other. A failing tick is logged and retried
//! after the backoff given by [`FailureTracker`]; it never delays other tasks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::retry::{FailureTracker, Outcome, RetryPolicy};

/// A unit of periodic work.
#[async_trait]
pub trait PollTask: Send + 'static {
    fn name(&self) -> &str;

    /// Delay between successful ticks.
    fn interval(&self) -> Duration;

    async fn tick(&mut self) -> anyhow::Result<()>;
}

pub struct PollScheduler {
    policy: RetryPolicy,
    pending: Vec<Box<dyn PollTask>>,
    running: JoinSet<String>,
    token: CancellationToken,
}

impl PollScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
            running: JoinSet::new(),
            token: CancellationToken::new(),
        }
    }

    /// Add a task. It starts ticking on the next [`start`](Self::start).
    pub fn register(&mut self, task: Box<dyn PollTask>) {
        tracing::debug!(task = task.name(), "Task registered");
        self.pending.push(task);
    }

    /// Spawn every registered task. The first tick of each runs immediately.
    pub fn start(&mut self) {
        for task in self.pending.drain(..) {
            tracing::info!(
                task = task.name(),
                interval_secs = task.interval().as_secs(),
                "Starting task"
            );
            self.running
                .spawn(run_task(task, self.policy, self.token.child_token()));
        }
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Wait until a task ends without being stopped, which only happens on panic.
    ///
    /// Returns `Ok(())` straight away when nothing is running.
    pub async fn supervise(&mut self) -> anyhow::Result<()> {
        match self.running.join_next().await {
            None => Ok(()),
            Some(Ok(name)) => anyhow::bail!("task {name} exited unexpectedly"),
            Some(Err(e)) => Err(anyhow::anyhow!("task failed: {e}")),
        }
    }

    /// Cancel every task and wait for all of them to exit.
    ///
    /// An in-flight tick is dropped at its next await point. Processors only
    /// advance their cursor at the end of a sweep, so nothing is skipped.
    pub async fn stop(&mut self) {
        self.token.cancel();
        while let Some(result) = self.running.join_next().await {
            match result {
                Ok(name) => tracing::info!(task = %name, "Task stopped"),
                Err(e) => tracing::error!(error = %e, "Task ended abnormally"),
            }
        }
    }
}

async fn run_task(
    mut task: Box<dyn PollTask>,
    policy: RetryPolicy,
    token: CancellationToken,
) -> String {
    let name = task.name().to_string();
    let mut failures = FailureTracker::new(policy, task.interval());

    loop {
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = task.tick() => result,
        };

        let outcome = match result {
            Ok(()) => failures.record_success(),
            Err(e) => {
                let outcome = failures.record_failure();
                tracing::warn!(
                    task = %name,
                    error = %e,
                    consecutive_failures = failures.consecutive_failures(),
                    retry_in_secs = outcome.delay().as_secs(),
                    "Tick failed"
                );
                outcome
            }
        };

        match outcome {
            Outcome::Stalled(_) => tracing::error!(
                task = %name,
                consecutive_failures = failures.consecutive_failures(),
                "Task stalled, no progress since repeated failures"
            ),
            Outcome::Recovered(_) => tracing::info!(task = %name, "Task recovered"),
            Outcome::Wait(_) => {}
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(outcome.delay()) => {}
        }
    }

    name
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counter {
        name: &'static str,
        ticks: Arc<AtomicUsize>,
        fail: bool,
        panic_on: Option<usize>,
    }

    impl Counter {
        fn new(name: &'static str, fail: bool) -> (Self, Arc<AtomicUsize>) {
            let ticks = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    ticks: ticks.clone(),
                    fail,
                    panic_on: None,
                },
                ticks,
            )
        }
    }

    #[async_trait]
    impl PollTask for Counter {
        fn name(&self) -> &str {
            self.name
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(10)
        }

        async fn tick(&mut self) -> anyhow::Result<()> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panic_on == Some(n) {
                panic!("tick {n} panicked");
            }
            if self.fail {
                anyhow::bail!("rpc unavailable");
            }
            Ok(())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_backoff: Duration::from_secs(300),
            failure_threshold: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_tick_on_interval() {
        let (task, ticks) = Counter::new("counter", false);
        let mut scheduler = PollScheduler::new(policy());
        scheduler.register(Box::new(task));
        scheduler.start();
        assert_eq!(scheduler.running(), 1);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 4);

        scheduler.stop().await;
        assert_eq!(scheduler.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_backs_off_without_blocking_others() {
        let (healthy, healthy_ticks) = Counter::new("healthy", false);
        let (failing, failing_ticks) = Counter::new("failing", true);
        let mut scheduler = PollScheduler::new(policy());
        scheduler.register(Box::new(healthy));
        scheduler.register(Box::new(failing));
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(75)).await;

        // healthy: t=0,10,...,70; failing: t=0,10,30,70
        assert_eq!(healthy_ticks.load(Ordering::SeqCst), 8);
        assert_eq!(failing_ticks.load(Ordering::SeqCst), 4);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_reports_panicked_task() {
        let (mut task, _) = Counter::new("panicky", false);
        task.panic_on = Some(2);
        let (healthy, healthy_ticks) = Counter::new("healthy", false);

        let mut scheduler = PollScheduler::new(policy());
        scheduler.register(Box::new(task));
        scheduler.register(Box::new(healthy));
        scheduler.start();

        assert!(scheduler.supervise().await.is_err());
        assert!(healthy_ticks.load(Ordering::SeqCst) >= 1);

        scheduler.stop().await;
        assert_eq!(scheduler.running(), 0);
    }

    /// Never finishes its first tick.
    struct Hung {
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PollTask for Hung {
        fn name(&self) -> &str {
            "hung"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(10)
        }

        async fn tick(&mut self) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_in_flight_tick() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollScheduler::new(policy());
        scheduler.register(Box::new(Hung {
            started: started.clone(),
        }));
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
            .await
            .expect("stop did not return");
        assert_eq!(scheduler.running(), 0);
    }

    #[tokio::test]
    async fn test_supervise_without_tasks_returns() {
        let mut scheduler = PollScheduler::new(policy());
        scheduler.start();
        assert!(scheduler.supervise().await.is_ok());
        scheduler.stop().await;
    }
}
