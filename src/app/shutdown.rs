//! Cooperative shutdown signal.
//!
//! A `ShutdownController` is held by the process entry point; `Shutdown`
//! handles are cloned into long waits so an in-flight cycle can abort its
//! current sleep instead of running it to its own timeout.

use tokio::sync::watch;

pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for handles created without a controller.
    _own_tx: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl ShutdownController {
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx, _own_tx: None })
    }

    /// Signal all handles. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered. If the controller is gone,
    /// treats that as a trigger so waiters never hang.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// A handle that never fires, for one-shot invocations with no daemon.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _own_tx: Some(std::sync::Arc::new(tx)),
        }
    }
}
