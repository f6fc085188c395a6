//! Process-wide cooperative stop signal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

/// Cloneable handle on a one-way flag. Once set it never clears.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    flag: Arc<AtomicBool>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns true only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag on the first Ctrl-C. In-flight transfers are left to finish.
    pub fn install_ctrl_c(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    if controller.cancel() {
                        log::warn!("Interrupt received: no new transfers will be started");
                    }
                }
                Err(e) => log::error!("Unable to listen for interrupt signal: {}", e),
            }
        })
    }
}
