//! Ctrl-C handling shared by hold windows and the plan runner
//!
//! The first Ctrl-C raises a flag. The running experiment cuts its hold
//! window short and still cleans up; the plan runner starts nothing new
//! after it. A second Ctrl-C exits the process straight away.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, warn};

/// Exit status for a process stopped by SIGINT
pub const INTERRUPTED_EXIT_CODE: u8 = 130;

/// Cloneable flag raised once per process on interrupt
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            warn!("Interrupt received, stopping after the current experiment cleans up");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`Interrupt::trigger`] has been called
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|raised| *raised).await;
    }

    /// Route Ctrl-C into this flag for the rest of the process
    ///
    /// Installing the handler disables the default SIGINT exit, so a second
    /// Ctrl-C is turned into an immediate exit here.
    pub fn listen_for_ctrl_c(&self) {
        let interrupt = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            interrupt.trigger();

            if tokio::signal::ctrl_c().await.is_ok() {
                error!("Interrupted again, exiting without cleanup");
                std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
            }
        });
    }
}
