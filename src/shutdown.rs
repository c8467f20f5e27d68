//! Process-wide cancellation shared by the sampler threads and the main loop.

use tokio::sync::watch;

/// Owning side; call [`Shutdown::trigger`] on interrupt.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Observer handed to every loop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    /// Non-blocking check, safe to call from a blocking sampler thread.
    /// A dropped [`Shutdown`] also counts as triggered.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&mut self) {
        // wait_for errs only when the sender is gone, which also means stop.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_seen_by_every_token() {
        let shutdown = Shutdown::new();
        let a = shutdown.token();
        let b = a.clone();
        assert!(!a.is_triggered());
        shutdown.trigger();
        shutdown.trigger();
        assert!(a.is_triggered());
        assert!(b.is_triggered());
    }

    #[test]
    fn dropping_owner_stops_loops() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();
        drop(shutdown);
        assert!(token.is_triggered());
    }

    #[tokio::test]
    async fn triggered_future_completes() {
        let shutdown = Shutdown::new();
        let mut token = shutdown.token();
        shutdown.trigger();
        token.triggered().await;
    }
}
