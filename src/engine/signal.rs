use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Create the single-slot account-update notification pair
///
/// A full slot means an update is already pending, so extra notifications
/// are dropped. The consumer reads the engine afterwards and only ever sees
/// the latest state.
pub fn account_signal() -> (AccountSignal, AccountSignalReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (AccountSignal { tx }, AccountSignalReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct AccountSignal {
    tx: mpsc::Sender<()>,
}

impl AccountSignal {
    /// Raise the signal; returns false when one was already pending.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Closed(())) => {
                tracing::debug!("Account-update receiver gone, signal dropped");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct AccountSignalReceiver {
    rx: mpsc::Receiver<()>,
}

impl AccountSignalReceiver {
    /// Wait for the next pending update. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Consume a pending update without waiting
    pub fn try_recv(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }
}
