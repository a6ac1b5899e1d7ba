//! Bounded worker pool for dispatching job segments.
//!
//! A parallel segment is dispatched as one future per command, gated by a
//! semaphore with `num_workers` permits, and awaited as a whole. Siblings of a
//! failed command keep running; the segment reports the first failure once
//! every command has finished. Sequential segments stop at the first failure.
//!
//! # Features
//!
//! - Concurrency bounded by the configured CPU count
//! - No cancellation of dispatched commands
//! - Pool statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::job::{Dispatch, JobPlan, JobSegment};
use crate::error::{PipelineError, Result};
use crate::runner::{CommandRunner, ShellCommand};

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Maximum number of concurrently running commands.
    pub num_workers: usize,
    /// Number of commands currently running.
    pub active_workers: usize,
    /// Total number of commands that exited successfully.
    pub commands_completed: u64,
    /// Total number of commands that failed.
    pub commands_failed: u64,
    /// Highest number of commands observed running at once.
    pub peak_active: usize,
    /// Average command duration.
    pub average_command_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of commands run (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.commands_completed + self.commands_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.commands_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    commands_completed: AtomicU64,
    commands_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
    peak_active: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            commands_completed: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            peak_active: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.commands_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.commands_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        let now = self.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.commands_completed.load(Ordering::SeqCst);
        let failed = self.commands_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);
        let peak = self.peak_active.load(Ordering::SeqCst);

        let total = completed + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            commands_completed: completed,
            commands_failed: failed,
            peak_active: peak as usize,
            average_command_duration: average_duration,
        }
    }
}

/// Dispatches job segments through a [`CommandRunner`].
pub struct WorkerPool {
    runner: Arc<dyn CommandRunner>,
    num_workers: usize,
    stats: Arc<SharedPoolStats>,
}

impl WorkerPool {
    /// Creates a pool running at most `num_workers` commands at once.
    ///
    /// A size of zero is treated as one.
    pub fn new(runner: Arc<dyn CommandRunner>, num_workers: usize) -> Self {
        Self {
            runner,
            num_workers: num_workers.max(1),
            stats: Arc::new(SharedPoolStats::new()),
        }
    }

    /// A pool of size one: every segment effectively runs sequentially.
    pub fn sequential(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, 1)
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.num_workers)
    }

    /// Runs every segment of a plan in order. A failed segment stops the plan.
    pub async fn run_plan(&self, plan: &JobPlan) -> Result<()> {
        info!(
            subject = %plan.subject,
            stage = %plan.stage,
            segments = plan.segments.len(),
            commands = plan.command_count(),
            "Running stage"
        );
        for segment in &plan.segments {
            self.run_segment(segment).await.map_err(|e| {
                error!(
                    subject = %plan.subject,
                    stage = %plan.stage,
                    segment = %segment.name,
                    error = %e,
                    "Segment failed"
                );
                e
            })?;
        }
        Ok(())
    }

    /// Runs one segment to completion.
    pub async fn run_segment(&self, segment: &JobSegment) -> Result<()> {
        debug!(
            segment = %segment.name,
            dispatch = ?segment.dispatch,
            commands = segment.commands.len(),
            workers = self.num_workers,
            "Dispatching segment"
        );
        match segment.dispatch {
            Dispatch::Sequential => {
                for command in &segment.commands {
                    self.run_one(command).await?;
                }
                Ok(())
            }
            Dispatch::Parallel => self.run_parallel(&segment.commands).await,
        }
    }

    async fn run_parallel(&self, commands: &[String]) -> Result<()> {
        let semaphore = Semaphore::new(self.num_workers);

        let futures = commands.iter().map(|command| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.map_err(|_| {
                    PipelineError::Io(std::io::Error::other("worker pool semaphore closed"))
                })?;
                self.run_one(command).await
            }
        });

        let results = join_all(futures).await;

        // Surface a fatal failure before any other.
        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                match &first_error {
                    None => first_error = Some(e),
                    Some(prev) if !prev.is_fatal() && e.is_fatal() => first_error = Some(e),
                    Some(_) => {}
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_one(&self, command: &str) -> Result<()> {
        self.stats.increment_active();
        let start = Instant::now();
        let result = self.runner.run(&ShellCommand::new(command)).await;
        self.stats.decrement_active();

        match result {
            Ok(_) => {
                self.stats.record_completion(start.elapsed());
                Ok(())
            }
            Err(e) => {
                self.stats.record_failure(start.elapsed());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the order commands start and finish; fails commands
    /// containing "fail".
    struct SlowRunner {
        events: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl SlowRunner {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                delay: Duration::from_millis(delay_ms),
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for SlowRunner {
        async fn run(&self, command: &ShellCommand) -> Result<CommandOutcome> {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {}", command.command));
            tokio::time::sleep(self.delay).await;
            self.events
                .lock()
                .unwrap()
                .push(format!("end {}", command.command));
            if command.command.contains("fail") {
                return Err(PipelineError::CommandFailed {
                    command: command.command.clone(),
                    code: 1,
                });
            }
            Ok(CommandOutcome { exit_code: 0 })
        }
    }

    fn cmds(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            num_workers: 4,
            active_workers: 0,
            commands_completed: 3,
            commands_failed: 1,
            peak_active: 4,
            average_command_duration: Duration::from_secs(60),
        };

        assert_eq!(stats.total_processed(), 4);
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert!((PoolStats::default().success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();

        stats.increment_active();
        stats.increment_active();
        stats.decrement_active();
        stats.record_completion(Duration::from_secs(10));
        stats.record_failure(Duration::from_secs(20));

        let pool_stats = stats.to_pool_stats(2);
        assert_eq!(pool_stats.active_workers, 1);
        assert_eq!(pool_stats.peak_active, 2);
        assert_eq!(pool_stats.commands_completed, 1);
        assert_eq!(pool_stats.commands_failed, 1);
        assert_eq!(pool_stats.average_command_duration, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_parallel_segment_respects_worker_bound() {
        let runner = SlowRunner::new(30);
        let pool = WorkerPool::new(runner.clone(), 2);
        let segment = JobSegment::parallel("main", cmds(&["a", "b", "c", "d", "e"]));

        pool.run_segment(&segment).await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.commands_completed, 5);
        assert_eq!(stats.peak_active, 2);
        assert_eq!(stats.active_workers, 0);
    }

    #[tokio::test]
    async fn test_parallel_failure_does_not_cancel_siblings() {
        let runner = SlowRunner::new(10);
        let pool = WorkerPool::new(runner.clone(), 4);
        let segment = JobSegment::parallel("main", cmds(&["fail-1", "ok-2", "ok-3"]));

        let err = pool.run_segment(&segment).await.unwrap_err();
        assert!(matches!(err, PipelineError::CommandFailed { ref command, .. } if command == "fail-1"));

        let events = runner.events();
        assert!(events.contains(&"end ok-2".to_string()));
        assert!(events.contains(&"end ok-3".to_string()));
        assert_eq!(pool.stats().commands_failed, 1);
    }

    #[tokio::test]
    async fn test_sequential_segment_stops_at_first_failure() {
        let runner = SlowRunner::new(1);
        let pool = WorkerPool::new(runner.clone(), 4);
        let segment = JobSegment::sequential("direct", cmds(&["one", "fail-two", "three"]));

        assert!(pool.run_segment(&segment).await.is_err());
        assert_eq!(
            runner.events(),
            vec!["start one", "end one", "start fail-two", "end fail-two"]
        );
    }

    #[tokio::test]
    async fn test_plan_segments_run_in_order() {
        let runner = SlowRunner::new(5);
        let pool = WorkerPool::new(runner.clone(), 3);
        let plan = JobPlan::prep("01", cmds(&["c1", "c2", "c3"]));

        pool.run_plan(&plan).await.unwrap();

        let events = runner.events();
        let c3_start = events.iter().position(|e| e == "start c3").unwrap();
        let c1_end = events.iter().position(|e| e == "end c1").unwrap();
        let c2_end = events.iter().position(|e| e == "end c2").unwrap();
        assert!(c3_start > c1_end && c3_start > c2_end);
    }

    #[tokio::test]
    async fn test_sequential_pool_has_one_worker() {
        let runner = SlowRunner::new(5);
        let pool = WorkerPool::sequential(runner.clone());
        assert_eq!(pool.num_workers(), 1);

        let segment = JobSegment::parallel("main", cmds(&["a", "b", "c"]));
        pool.run_segment(&segment).await.unwrap();
        assert_eq!(pool.stats().peak_active, 1);
        assert_eq!(WorkerPool::new(runner, 0).num_workers(), 1);
    }
}
