//! Online/offline signal shared by the facade, the gateway wrapper and the
//! driver loop.
//!
//! Two inputs feed the signal:
//! - the platform's own notifications, via [`ConnectivityMonitor::set_online`];
//! - gateway failures, via [`ConnectivityMonitor::report_network_failure`],
//!   which degrade the link until [`ConnectivityMonitor::report_recovered`].
//!
//! The monitor is online only when the platform says so and the link is not
//! degraded. Listeners fire once per transition, never for repeated values,
//! and always end on the value [`ConnectivityMonitor::is_online`] reports.
//! Listeners must not change the signal from inside the callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{info, warn};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct LinkState {
    platform_online: bool,
    degraded: bool,
}

impl LinkState {
    fn is_online(self) -> bool {
        self.platform_online && !self.degraded
    }
}

struct Inner {
    state: Mutex<LinkState>,
    listeners: Mutex<HashMap<u64, Listener>>,
    /// Last value delivered to listeners; held while they run.
    delivered: Mutex<bool>,
    next_listener_id: AtomicU64,
    tx: watch::Sender<bool>,
}

/// Shared connectivity signal. Clones observe the same state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

/// Listener registration returned by [`ConnectivityMonitor::on_change`].
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LinkState {
                    platform_online: initially_online,
                    degraded: false,
                }),
                listeners: Mutex::new(HashMap::new()),
                delivered: Mutex::new(initially_online),
                next_listener_id: AtomicU64::new(1),
                tx,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.tx.borrow()
    }

    /// True when the link was marked down by a failed gateway call.
    pub fn is_degraded(&self) -> bool {
        self.state().degraded
    }

    /// The platform's own view, ignoring degradation.
    pub fn is_platform_online(&self) -> bool {
        self.state().platform_online
    }

    /// Registers a callback invoked with the new value on every transition.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Channel view of the signal for async consumers.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Platform notification. Coming back online also clears degradation.
    /// Returns true if the effective state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.update(|s| {
            s.platform_online = online;
            if online {
                s.degraded = false;
            }
        })
    }

    /// A gateway call timed out or could not reach the server.
    pub fn report_network_failure(&self) -> bool {
        let changed = self.update(|s| s.degraded = true);
        if changed {
            warn!("[SYNC] cloud unreachable, switching to offline mode");
        }
        changed
    }

    /// Lifts degradation so the next pass can reach the server again.
    pub fn report_recovered(&self) -> bool {
        self.update(|s| s.degraded = false)
    }

    /// Drops every listener. The signal itself keeps working.
    pub fn dispose(&self) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn state(&self) -> LinkState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut LinkState)) -> bool {
        let (online, changed) = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut state);
            let online = state.is_online();
            // Published under the state lock so concurrent updates cannot reorder.
            let changed = self.inner.tx.send_if_modified(|current| {
                if *current == online {
                    false
                } else {
                    *current = online;
                    true
                }
            });
            (online, changed)
        };
        if changed {
            info!("[SYNC] connectivity: {}", if online { "online" } else { "offline" });
            self.notify();
        }
        changed
    }

    /// Delivers the channel's current value; a racing update may have
    /// overtaken the one this call published.
    fn notify(&self) {
        let mut delivered = self
            .inner
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = *self.inner.tx.borrow();
        if *delivered == current {
            return;
        }
        *delivered = current;

        // The listener map lock is released first so callbacks may (un)subscribe.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(current);
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
