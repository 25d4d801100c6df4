//! Cooperative shutdown on Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How often an interruptible sleep checks the flag.
const SLEEP_TICK: Duration = Duration::from_millis(250);

/// Shared shutdown flag.
///
/// Discovery engines hold a clone of [`Shutdown::flag`] and stop at the
/// next step boundary once it is set.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag handed to discovery engines.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Spawns a task that sets the flag on the first Ctrl-C and exits the
    /// process on the second.
    pub fn listen_for_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                log::warn!("Could not install Ctrl-C handler");
                return;
            }
            log::warn!("Shutdown requested, finishing the current step (Ctrl-C again to force)");
            shutdown.request();

            if tokio::signal::ctrl_c().await.is_ok() {
                log::error!("Forced shutdown");
                std::process::exit(130);
            }
        })
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(SLEEP_TICK)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_without_request() {
        let shutdown = Shutdown::new();
        assert!(shutdown.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn sleep_returns_early_once_requested() {
        let shutdown = Shutdown::new();
        shutdown.request();
        assert!(!shutdown.sleep(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn request_from_another_task_interrupts_sleep() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.request();
        });
        assert!(!shutdown.sleep(Duration::from_secs(3600)).await);
    }

    #[test]
    fn flag_is_shared() {
        let shutdown = Shutdown::new();
        let flag = shutdown.flag();
        shutdown.request();
        assert!(flag.load(Ordering::Relaxed));
    }
}
