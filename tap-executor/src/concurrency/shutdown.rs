use tokio::sync::watch;

use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};

/// Requests the cancellation of one or more runs.
#[derive(Debug, Clone)]
pub struct ShutdownTx(SignalTx);

impl ShutdownTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    /// Notifies every subscribed receiver.
    ///
    /// Fails only when no receiver is left, which means nothing is running anymore.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub type ShutdownRx = SignalRx;

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = create_signal();
    (ShutdownTx::wrap(tx), rx)
}

/// Resolves once shutdown is requested on `shutdown_rx`.
///
/// Dropping every [`ShutdownTx`] is not a shutdown request: in that case the future never
/// resolves.
pub async fn wait_for_shutdown(shutdown_rx: &mut ShutdownRx) {
    if shutdown_rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn shutdown_wakes_subscribers() {
        let (shutdown_tx, _rx) = create_shutdown_channel();
        let mut shutdown_rx = shutdown_tx.subscribe();

        shutdown_tx.shutdown().unwrap();

        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut shutdown_rx))
            .await
            .expect("shutdown should be observed");
    }

    #[tokio::test]
    async fn dropped_sender_is_not_a_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();
        drop(shutdown_tx);

        let result =
            tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(&mut shutdown_rx))
                .await;

        assert!(result.is_err());
    }
}
