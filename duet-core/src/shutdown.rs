//! Cooperative shutdown shared by every stage of a session.
//!
//! Setting the flag alone would leave threads parked on queue condition
//! variables, so every blocking queue registers itself here and is woken
//! after the flag is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Something with threads parked on it that must observe shutdown.
pub trait Wake: Send + Sync {
    /// Wake every waiter. Implementations take their own lock first so a
    /// waiter cannot miss the notification between its flag check and wait.
    fn wake_all(&self);
}

#[derive(Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
    waiters: Mutex<Vec<Weak<dyn Wake>>>,
}

impl ShutdownSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn register(&self, waiter: Weak<dyn Wake>) {
        let mut waiters = self.waiters.lock();
        waiters.retain(|w| w.strong_count() > 0);
        waiters.push(waiter);
    }

    /// Set the flag, then wake every registered queue. Returns true for the
    /// call that actually flipped the flag.
    pub fn trigger(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        let waiters: Vec<Arc<dyn Wake>> =
            self.waiters.lock().iter().filter_map(Weak::upgrade).collect();
        for waiter in waiters {
            waiter.wake_all();
        }
        if first {
            tracing::debug!("Shutdown requested");
        }
        first
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("requested", &self.is_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake_all(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn trigger_wakes_live_waiters_only() {
        let signal = ShutdownSignal::new();
        let live = Arc::new(Counter::default());
        let live_dyn: Arc<dyn Wake> = live.clone();
        signal.register(Arc::downgrade(&live_dyn));
        {
            let gone: Arc<dyn Wake> = Arc::new(Counter::default());
            signal.register(Arc::downgrade(&gone));
        }

        assert!(signal.trigger());
        assert!(signal.is_requested());
        assert_eq!(live.0.load(Ordering::SeqCst), 1);

        // Second trigger still wakes but reports it was not the first.
        assert!(!signal.trigger());
        assert_eq!(live.0.load(Ordering::SeqCst), 2);
    }
}
