//! Ordered parallel fan-out.
//!
//! The only concurrency primitive shared by the activation engine, the
//! cluster repository and the reconciliation loops. All workers run
//! concurrently, results come back in input order, and a failing worker
//! never short-circuits its siblings. Cancellation is cooperative: dropping
//! the returned future drops every in-flight worker.

use crate::error::Result;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Per-task outcome, tagged with the task's input position.
#[derive(Debug)]
pub struct TaskResult<T> {
    pub index: usize,
    pub result: Result<T>,
}

impl<T> TaskResult<T> {
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

/// Run `f` over every item concurrently, preserving input order.
///
/// Waits for all workers unconditionally.
pub async fn parallel_map<T, R, F, Fut>(items: Vec<T>, f: F) -> Vec<TaskResult<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let tasks = items.into_iter().enumerate().map(|(index, item)| {
        let fut = f(item);
        async move {
            TaskResult {
                index,
                result: fut.await,
            }
        }
    });
    join_all(tasks).await
}

/// Like [`parallel_map`] but with at most `limit` workers in flight.
///
/// A zero `limit` means unbounded.
pub async fn parallel_map_limit<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    f: F,
) -> Vec<TaskResult<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    if limit == 0 {
        return parallel_map(items, f).await;
    }

    let tasks = items.into_iter().enumerate().map(|(index, item)| {
        let fut = f(item);
        async move {
            TaskResult {
                index,
                result: fut.await,
            }
        }
    });

    let mut results: Vec<TaskResult<R>> = stream::iter(tasks)
        .buffer_unordered(limit)
        .collect()
        .await;
    results.sort_unstable_by_key(|r| r.index);
    results
}

/// Collect error messages from a result set, in input order.
pub fn collect_errors<T>(results: &[TaskResult<T>]) -> Vec<String> {
    results
        .iter()
        .filter_map(|r| r.result.as_ref().err().map(|e| e.to_string()))
        .collect()
}
