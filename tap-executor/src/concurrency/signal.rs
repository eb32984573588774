use tokio::sync::watch;

/// Sending half of a one-shot style notification carried over a watch channel of `()`.
pub type SignalTx = watch::Sender<()>;

/// Receiving half of a notification created with [`create_signal`].
pub type SignalRx = watch::Receiver<()>;

/// Creates a new pair of [`SignalTx`] and [`SignalRx`].
pub fn create_signal() -> (SignalTx, SignalRx) {
    watch::channel(())
}
