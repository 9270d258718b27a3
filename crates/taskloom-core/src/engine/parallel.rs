//! Fan-out / fan-in of independent branches.
//!
//! Every branch is spawned as its own tokio task. Results are reported in
//! input order whatever the completion order. Under `fail_fast` the first
//! failure ends the group: branches still running are detached (they run to
//! completion and their records still land) but their results are not
//! awaited. Under `wait_all` every branch finishes and all failures are
//! reported.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use taskloom_types::process::ParallelPolicy;
use tokio::task::JoinSet;

/// A branch panicked instead of returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPanic(pub String);

impl From<BranchPanic> for String {
    fn from(panic: BranchPanic) -> Self {
        format!("branch panicked: {}", panic.0)
    }
}

/// A parallel group failed.
#[derive(Debug)]
pub struct ParallelFailure<T, E> {
    /// Input index of the branch whose failure ended the group (the first
    /// failure observed).
    pub failed_index: usize,
    pub error: E,
    /// Results of branches that completed successfully before the group
    /// ended, by input index.
    pub completed: Vec<Option<T>>,
    /// Any further failures (only under `wait_all`), in completion order.
    pub other_failures: Vec<(usize, E)>,
}

impl<T, E> ParallelFailure<T, E> {
    /// Completed results in input order, skipping branches without one.
    pub fn completed_results(&self) -> impl Iterator<Item = &T> {
        self.completed.iter().flatten()
    }

    /// Every failure: the one that ended the group, then the rest.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &E)> {
        std::iter::once((self.failed_index, &self.error))
            .chain(self.other_failures.iter().map(|(i, e)| (*i, e)))
    }
}

impl<T, E: fmt::Display> fmt::Display for ParallelFailure<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch {} failed: {}", self.failed_index, self.error)?;
        if !self.other_failures.is_empty() {
            write!(f, " (+{} more failed)", self.other_failures.len())?;
        }
        Ok(())
    }
}

impl<T: fmt::Debug, E: fmt::Debug + fmt::Display> std::error::Error for ParallelFailure<T, E> {}

pub struct ParallelCoordinator;

impl ParallelCoordinator {
    /// Run `branches` concurrently and fan back in under `policy`.
    pub async fn all<T, E, F>(branches: Vec<F>, policy: ParallelPolicy) -> Result<Vec<T>, ParallelFailure<T, E>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<BranchPanic> + Send + 'static,
    {
        let total = branches.len();
        let mut join_set = JoinSet::new();
        for (index, branch) in branches.into_iter().enumerate() {
            join_set.spawn(async move {
                let outcome = AssertUnwindSafe(branch)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(E::from(BranchPanic(panic_message(payload)))));
                (index, outcome)
            });
        }

        let mut completed: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut failures: Vec<(usize, E)> = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            let (index, outcome) = match joined {
                Ok(pair) => pair,
                // Panics are caught inside the task; only runtime shutdown lands here.
                Err(join_error) => {
                    tracing::warn!(error = %join_error, "parallel branch did not complete");
                    continue;
                }
            };
            match outcome {
                Ok(value) => completed[index] = Some(value),
                Err(error) => {
                    tracing::debug!(branch = index, "parallel branch failed");
                    if policy == ParallelPolicy::FailFast {
                        join_set.detach_all();
                        return Err(ParallelFailure {
                            failed_index: index,
                            error,
                            completed,
                            other_failures: Vec::new(),
                        });
                    }
                    failures.push((index, error));
                }
            }
        }

        let mut failures = failures.into_iter();
        match failures.next() {
            None => Ok(completed.into_iter().flatten().collect()),
            Some((failed_index, error)) => Err(ParallelFailure {
                failed_index,
                error,
                completed,
                other_failures: failures.collect(),
            }),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    type Branch = BoxFuture<'static, Result<u32, String>>;

    fn ok_after(value: u32, ms: u64) -> Branch {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    fn fail_after(message: &str, ms: u64) -> Branch {
        let message = message.to_string();
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Err(message)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_in_input_order() {
        let branches = vec![ok_after(1, 30), ok_after(2, 10), ok_after(3, 20)];
        let results = ParallelCoordinator::all(branches, ParallelPolicy::FailFast)
            .await
            .unwrap();
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_keeps_completed_results() {
        let branches = vec![ok_after(1, 5), fail_after("branch two broke", 10), ok_after(3, 1_000)];
        let failure = ParallelCoordinator::all(branches, ParallelPolicy::FailFast)
            .await
            .unwrap_err();

        assert_eq!(failure.failed_index, 1);
        assert_eq!(failure.error, "branch two broke");
        assert_eq!(failure.completed, vec![Some(1), None, None]);
        assert!(failure.other_failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_detaches_in_flight_branches() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let slow: Branch = Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(9)
        });

        let failure = ParallelCoordinator::all(vec![fail_after("x", 1), slow], ParallelPolicy::FailFast)
            .await
            .unwrap_err();
        assert_eq!(failure.failed_index, 0);
        assert!(!finished.load(Ordering::SeqCst));

        // The detached branch keeps running to completion.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_all_reports_every_failure() {
        let branches = vec![
            fail_after("late", 30),
            ok_after(2, 5),
            fail_after("early", 10),
        ];
        let failure = ParallelCoordinator::all(branches, ParallelPolicy::WaitAll)
            .await
            .unwrap_err();

        assert_eq!(failure.failed_index, 2);
        assert_eq!(failure.error, "early");
        assert_eq!(failure.other_failures, vec![(0, "late".to_string())]);
        assert_eq!(failure.completed_results().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(failure.failures().count(), 2);
    }

    #[tokio::test]
    async fn test_empty_group_succeeds() {
        let branches: Vec<Branch> = Vec::new();
        let results = ParallelCoordinator::all(branches, ParallelPolicy::FailFast)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_branch_becomes_failure() {
        let boom: Branch = Box::pin(async { panic!("kaboom") });
        let failure = ParallelCoordinator::all(vec![ok_after(1, 0), boom], ParallelPolicy::WaitAll)
            .await
            .unwrap_err();
        assert_eq!(failure.failed_index, 1);
        assert!(failure.error.contains("kaboom"));
    }
}
