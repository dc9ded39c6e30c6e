//! Keeping the host awake while a folder is being pushed.
//!
//! Platforms that suspend aggressively expose some form of wake lock. The pusher asks a
//! [`PowerManager`] for one named lock per run and holds it, through a [`WakeGuard`], from before
//! the initial sync until the worker thread has finished with the idle session.

use log::trace;

/// A named lock that keeps the host from sleeping while acquired.
pub trait WakeLock: Send {
    /// Take the lock.
    fn acquire(&mut self);

    /// Give the lock back. Releasing a lock that is not held must be harmless.
    fn release(&mut self);
}

/// Hands out [`WakeLock`]s.
pub trait PowerManager: Send + Sync {
    /// Create a new, not yet acquired, wake lock. `tag` identifies the holder for diagnostics.
    fn new_wake_lock(&self, tag: &str) -> Box<dyn WakeLock>;
}

/// A [`WakeLock`] that is acquired on creation and released exactly once, when the guard is
/// released or dropped.
pub struct WakeGuard {
    lock: Box<dyn WakeLock>,
    held: bool,
}

impl WakeGuard {
    /// Create a wake lock named `tag` and acquire it.
    pub fn acquire(power_manager: &dyn PowerManager, tag: &str) -> WakeGuard {
        let mut lock = power_manager.new_wake_lock(tag);
        lock.acquire();
        WakeGuard { lock, held: true }
    }

    /// Whether the lock is still held.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Release the lock early. Later calls, and the eventual drop, do nothing.
    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.lock.release();
        }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for WakeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeGuard").field("held", &self.held).finish()
    }
}

/// A [`PowerManager`] for hosts that never suspend a running process.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPowerManager;

struct NoopWakeLock {
    tag: String,
}

impl WakeLock for NoopWakeLock {
    fn acquire(&mut self) {
        trace!("wake lock {} acquired", self.tag);
    }

    fn release(&mut self) {
        trace!("wake lock {} released", self.tag);
    }
}

impl PowerManager for NoopPowerManager {
    fn new_wake_lock(&self, tag: &str) -> Box<dyn WakeLock> {
        Box::new(NoopWakeLock {
            tag: tag.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingPowerManager;

    #[test]
    fn guard_releases_on_drop() {
        let power_manager = CountingPowerManager::default();
        {
            let guard = WakeGuard::acquire(&power_manager, "test");
            assert!(guard.is_held());
            assert_eq!(power_manager.acquired(), 1);
            assert_eq!(power_manager.released(), 0);
        }
        assert_eq!(power_manager.released(), 1);
        assert_eq!(power_manager.tags(), vec!["test".to_string()]);
    }

    #[test]
    fn early_release_is_not_repeated() {
        let power_manager = CountingPowerManager::default();
        let mut guard = WakeGuard::acquire(&power_manager, "test");
        guard.release();
        guard.release();
        assert!(!guard.is_held());
        drop(guard);
        assert_eq!(power_manager.acquired(), 1);
        assert_eq!(power_manager.released(), 1);
    }

    #[test]
    fn guard_releases_on_panic() {
        let power_manager = CountingPowerManager::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = WakeGuard::acquire(&power_manager, "test");
            panic!("sink blew up");
        }));
        assert!(result.is_err());
        assert_eq!(power_manager.released(), 1);
    }

    #[test]
    fn noop_power_manager() {
        let mut guard = WakeGuard::acquire(&NoopPowerManager, "noop");
        assert!(guard.is_held());
        guard.release();
        assert!(!guard.is_held());
    }
}
