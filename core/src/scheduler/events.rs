//! Explicit subscription registry for scheduler notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Payload-free "something changed" notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchedulerEvent {
    /// Fired on the execution thread while paused, after each gate wait,
    /// so the display can repaint the last frame.
    PausedFrameRefresh,
    /// Fired on the thread that called `load_state` once the restore is
    /// complete, so dependents can rebuild derived display/audio state.
    StateLoaded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(SchedulerEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    event: SchedulerEvent,
    handler: Handler,
}

/// Handlers subscribed per event kind.
///
/// Delivery is at-least-once and synchronous on the emitting thread.
/// Handlers run outside the registry lock, so a handler may subscribe or
/// unsubscribe.
#[derive(Default)]
pub struct EventRegistry {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(
        &self,
        event: SchedulerEvent,
        handler: impl Fn(SchedulerEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscription {
            id,
            event,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self, event: SchedulerEvent) -> usize {
        self.lock().iter().filter(|s| s.event == event).count()
    }

    pub fn emit(&self, event: SchedulerEvent) {
        let handlers: Vec<Handler> = self
            .lock()
            .iter()
            .filter(|s| s.event == event)
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_reaches_only_matching_subscribers() {
        let registry = EventRegistry::new();
        let loaded = Arc::new(AtomicUsize::new(0));
        let refresh = Arc::new(AtomicUsize::new(0));
        {
            let loaded = Arc::clone(&loaded);
            registry.subscribe(SchedulerEvent::StateLoaded, move |_| {
                loaded.fetch_add(1, Ordering::Relaxed);
            });
        }
        {
            let refresh = Arc::clone(&refresh);
            registry.subscribe(SchedulerEvent::PausedFrameRefresh, move |_| {
                refresh.fetch_add(1, Ordering::Relaxed);
            });
        }

        registry.emit(SchedulerEvent::StateLoaded);
        registry.emit(SchedulerEvent::StateLoaded);
        assert_eq!(loaded.load(Ordering::Relaxed), 2);
        assert_eq!(refresh.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn unsubscribe_is_symmetric() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let hits = Arc::clone(&hits);
            registry.subscribe(SchedulerEvent::StateLoaded, move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            })
        };
        assert_eq!(registry.subscriber_count(SchedulerEvent::StateLoaded), 1);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.emit(SchedulerEvent::StateLoaded);
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert_eq!(registry.subscriber_count(SchedulerEvent::StateLoaded), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let registry = Arc::new(EventRegistry::new());
        let slot = Arc::new(Mutex::new(None));
        let id = {
            let inner = Arc::clone(&registry);
            let slot = Arc::clone(&slot);
            registry.subscribe(SchedulerEvent::StateLoaded, move |_| {
                if let Some(id) = slot.lock().unwrap().take() {
                    inner.unsubscribe(id);
                }
            })
        };
        *slot.lock().unwrap() = Some(id);
        registry.emit(SchedulerEvent::StateLoaded);
        assert_eq!(registry.subscriber_count(SchedulerEvent::StateLoaded), 0);
    }
}
