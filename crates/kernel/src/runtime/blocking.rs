use crate::{AppError, AppResult};

/// Runs CPU- or disk-bound work off the async workers.
pub async fn run_blocking<T, F>(label: &'static str, job: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(result) => result,
        Err(error) if error.is_cancelled() => {
            Err(AppError::new("blocking_task_canceled", "blocking task was canceled")
                .with_context("blockingTask", label))
        }
        Err(error) if error.is_panic() => {
            Err(AppError::new("blocking_task_panicked", "blocking task panicked")
                .with_context("joinError", format!("{error:?}"))
                .with_context("blockingTask", label))
        }
        Err(error) => Err(AppError::new("blocking_task_failed", "blocking task failed")
            .with_context("joinError", format!("{error:?}"))
            .with_context("blockingTask", label)),
    }
}

#[cfg(test)]
#[path = "../../tests/runtime/blocking_tests.rs"]
mod tests;
