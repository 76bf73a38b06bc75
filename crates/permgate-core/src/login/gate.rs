use crate::errors::GateError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// One-shot "enable finished" signal.
///
/// Pre-auth can fire while the system is still starting; it awaits this gate
/// with a bound before touching any state.
#[derive(Clone)]
pub struct EnableGate {
    tx: Arc<watch::Sender<bool>>,
}

impl EnableGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self, limit: Duration) -> Result<(), GateError> {
        let mut rx = self.tx.subscribe();
        let opened = async move { rx.wait_for(|open| *open).await.map(|_| ()) };
        match tokio::time::timeout(limit, opened).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(GateError::Closed),
            Err(_) => Err(GateError::Timeout(limit)),
        }
    }
}

impl Default for EnableGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_releases_waiters() {
        let gate = EnableGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(Duration::from_secs(5)).await })
        };
        gate.open();
        assert_eq!(waiter.await.unwrap(), Ok(()));
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn test_already_open_returns_immediately() {
        let gate = EnableGate::new();
        gate.open();
        assert_eq!(gate.wait(Duration::from_millis(1)).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_opened() {
        let gate = EnableGate::new();
        let limit = Duration::from_secs(60);
        assert_eq!(gate.wait(limit).await, Err(GateError::Timeout(limit)));
    }
}
