//! Run-level cancellation

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::thread;
use tokio::sync::watch;
use tracing::warn;

/// Shared stop flag for one run.
///
/// Once cancelled the orchestrator admits no further units; units already
/// running are awaited.
#[derive(Clone)]
pub struct RunCancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for RunCancellation {
    fn default() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }
}

impl RunCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the run has been cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as self, so this only returns on cancel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Cancel on the first SIGINT/SIGTERM, exit immediately on the second
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let cancellation = self.clone();

        thread::spawn(move || {
            for signal in signals.forever() {
                if cancellation.is_cancelled() {
                    warn!("Second interrupt received, exiting without waiting for running units");
                    std::process::exit(130);
                }
                let name = if signal == SIGINT { "SIGINT" } else { "SIGTERM" };
                warn!(
                    "{} received: no new units will start, waiting for running units to finish",
                    name
                );
                cancellation.cancel();
            }
        });

        Ok(())
    }
}
