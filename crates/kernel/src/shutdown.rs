use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Cooperative stop signal shared by every worker of one receive or send run.
///
/// Loops poll [`ShutdownSignal::is_triggered`] at record boundaries and race
/// blocking socket calls against [`ShutdownSignal::triggered`], which drops the
/// pending accept/read and with it the socket.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(notify),
        }
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.send_replace(true);
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn triggered(&self) {
        let mut receiver = self.notify.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
#[path = "../tests/shutdown/shutdown_tests.rs"]
mod tests;
