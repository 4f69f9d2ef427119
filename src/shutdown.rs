use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// The side of the cancellation signal that triggers it.
///
/// Dropping the trigger (or calling [`Trigger::cancel`]) disconnects every
/// [`Shutdown`] handle at once.
#[derive(Debug)]
pub struct Trigger {
    _sender: Sender<()>,
}

impl Trigger {
    pub fn cancel(self) {}
}

/// A cancellation signal shared by the transmit and receive threads.
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: Receiver<()>,
}

impl Shutdown {
    pub fn channel() -> (Trigger, Self) {
        let (sender, receiver) = bounded(0);
        (Trigger { _sender: sender }, Self { receiver })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// A channel that becomes ready, as disconnected, once cancelled; for use in `select!`.
    pub fn signal(&self) -> &Receiver<()> {
        &self.receiver
    }
}
