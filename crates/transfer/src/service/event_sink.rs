use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::models::TransferEvent;
use crate::{AppError, AppResult};

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub trait TransferEventSink: Send + Sync {
    fn emit(&self, event: TransferEvent) -> AppResult<()>;
}

pub struct NoopTransferEventSink;

impl TransferEventSink for NoopTransferEventSink {
    fn emit(&self, _event: TransferEvent) -> AppResult<()> {
        Ok(())
    }
}

/// Bounded queue feeding a single front-end subscriber.
///
/// When the queue is full, progress and statistics events are dropped and
/// counted; terminal events wait for capacity on a background task.
pub struct ChannelTransferEventSink {
    sender: mpsc::Sender<TransferEvent>,
    dropped: AtomicU64,
}

impl ChannelTransferEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TransferEventSink for ChannelTransferEventSink {
    fn emit(&self, event: TransferEvent) -> AppResult<()> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) if event.is_terminal() => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(AppError::new(
                        "transfer_runtime_unavailable",
                        "no runtime to deliver a queued event",
                    ));
                }
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    if sender.send(event).await.is_err() {
                        tracing::warn!(event = "transfer_event_channel_closed");
                    }
                });
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                if dropped == 1 || dropped % 1000 == 0 {
                    tracing::warn!(
                        event = "transfer_event_dropped",
                        dropped,
                        capacity = self.sender.max_capacity()
                    );
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(AppError::new(
                "transfer_event_channel_closed",
                "event subscriber is gone",
            )),
        }
    }
}
