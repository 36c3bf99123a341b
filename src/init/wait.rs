// SPDX-License-Identifier: Apache-2.0

//! Joining the shipper's component tasks.
//!
//! Every task is spawned under the name of the component it runs, so a
//! failure can say which part of the pipeline stopped.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::{debug, error, warn};

pub type TaskResult = Result<(), BoxError>;

/// Component tasks tagged with their name.
pub type TaskSet = JoinSet<(&'static str, TaskResult)>;

pub fn spawn_named<F>(tasks: &mut TaskSet, name: &'static str, task: F)
where
    F: Future<Output = TaskResult> + Send + 'static,
{
    tasks.spawn(async move { (name, task.await) });
}

/// Wait for the first task to exit and return its name. A task that failed or
/// panicked is an error. Returns `Ok(None)` when the set is empty.
pub async fn wait_for_any_task(tasks: &mut TaskSet) -> Result<Option<&'static str>, BoxError> {
    match tasks.join_next().await {
        None => Ok(None),
        Some(Ok((name, Ok(())))) => Ok(Some(name)),
        Some(Ok((name, Err(e)))) => Err(format!("{} failed: {}", name, e).into()),
        Some(Err(e)) => Err(format!("component task did not complete: {}", e).into()),
    }
}

/// Join every task until the set is empty or `timeout` passes. Tasks still
/// running at the deadline are aborted. Returns the first failure seen.
pub async fn drain_tasks(tasks: &mut TaskSet, timeout: Duration) -> TaskResult {
    let stop_at = Instant::now() + timeout;
    let mut first_err: Option<BoxError> = None;

    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Ok(None) => break,
            Ok(Some(Ok((name, Ok(()))))) => debug!(task = name, "Task stopped"),
            Ok(Some(Ok((name, Err(e))))) => {
                warn!(task = name, error = %e, "Task failed while stopping");
                if first_err.is_none() {
                    first_err = Some(format!("{} failed: {}", name, e).into());
                }
            }
            Ok(Some(Err(e))) => error!(error = %e, "Failed to join with task"),
            Err(_) => {
                warn!(remaining = tasks.len(), "Timed out stopping tasks, aborting them");
                tasks.abort_all();
                if first_err.is_none() {
                    first_err = Some("timed out waiting for tasks to complete".into());
                }
                break;
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn forever() -> TaskResult {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }

    async fn explode() -> TaskResult {
        panic!("receiver crashed")
    }

    #[tokio::test]
    async fn test_failure_names_the_component() {
        let mut tasks = TaskSet::new();
        spawn_named(&mut tasks, "supervisor", forever());
        spawn_named(&mut tasks, "receiver", async { Err("tail failed".into()) });

        let err = wait_for_any_task(&mut tasks).await.unwrap_err();
        assert_eq!(err.to_string(), "receiver failed: tail failed");
    }

    #[tokio::test]
    async fn test_clean_exit_reports_name() {
        let mut tasks = TaskSet::new();
        spawn_named(&mut tasks, "receiver", async { Ok(()) });

        assert_eq!(wait_for_any_task(&mut tasks).await.unwrap(), Some("receiver"));
        assert_eq!(wait_for_any_task(&mut tasks).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_panicked_task_is_an_error() {
        let mut tasks = TaskSet::new();
        spawn_named(&mut tasks, "receiver", explode());

        assert!(wait_for_any_task(&mut tasks).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_keeps_first_failure() {
        let mut tasks = TaskSet::new();
        spawn_named(&mut tasks, "supervisor", async { Ok(()) });
        spawn_named(&mut tasks, "receiver", async { Err("store gone".into()) });

        let err = drain_tasks(&mut tasks, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "receiver failed: store gone");
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_task() {
        let mut tasks = TaskSet::new();
        spawn_named(&mut tasks, "supervisor", forever());

        assert!(
            drain_tasks(&mut tasks, Duration::from_millis(10))
                .await
                .is_err()
        );
        // the aborted task reports as cancelled
        let joined = tasks.join_next().await.unwrap();
        assert!(joined.unwrap_err().is_cancelled());
    }
}
