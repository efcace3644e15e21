//! Graceful shutdown signalling between the signal handler and the sync loop.
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Trigger side, shutdown happens when the inner sender is dropped.
#[derive(Clone)]
pub struct Shutdown {
    sender: Arc<Mutex<Option<Sender<()>>>>,
}

/// Listener side, cheap to clone.
#[derive(Clone)]
pub struct ShutdownListener {
    receiver: Receiver<()>,
}

/// Create a connected trigger and listener.
pub fn channel() -> (Shutdown, ShutdownListener) {
    let (sender, receiver) = channel::bounded(0);
    (
        Shutdown {
            sender: Arc::new(Mutex::new(Some(sender))),
        },
        ShutdownListener { receiver },
    )
}

impl Shutdown {
    /// Ask every listener to stop, calling it more than once is fine.
    pub fn trigger(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }

    /// Trigger on SIGINT or SIGTERM.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let shutdown = self.clone();
        std::thread::Builder::new()
            .name("signal handler".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!(signal = sig, "Shutdown signal received, stopping after in-flight work");
                    shutdown.trigger();
                }
            })?;
        Ok(())
    }
}

impl ShutdownListener {
    pub fn is_shutdown(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep up to `timeout`, wake up early on shutdown.  Returns true when shutdown happened.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}
