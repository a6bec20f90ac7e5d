use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinHandle;

use crate::{AppError, AppResult};

pub type TransferTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait TransferTaskSpawner: Send + Sync {
    fn spawn(&self, task_name: &'static str, task: TransferTask) -> AppResult<JoinHandle<()>>;
}

#[derive(Default)]
pub struct TokioTransferTaskSpawner;

impl TransferTaskSpawner for TokioTransferTaskSpawner {
    fn spawn(&self, task_name: &'static str, task: TransferTask) -> AppResult<JoinHandle<()>> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(runtime_unavailable(task_name));
        }
        Ok(tokio::spawn(task))
    }
}

#[derive(Default)]
pub struct NoopTransferTaskSpawner;

impl TransferTaskSpawner for NoopTransferTaskSpawner {
    fn spawn(&self, task_name: &'static str, _task: TransferTask) -> AppResult<JoinHandle<()>> {
        Err(runtime_unavailable(task_name))
    }
}

fn runtime_unavailable(task_name: &'static str) -> AppError {
    AppError::new(
        "transfer_runtime_unavailable",
        "background task runtime is unavailable",
    )
    .with_context("task", task_name)
}
