//! Subscription registry: fan-out of state-change events.
//!
//! The registry does not know how events travel. Each [`Subscriber`] owns
//! its transport and reports liveness through the result of
//! [`Subscriber::deliver`]; a failed delivery unregisters it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quickvm_common::types::{StateChangeEvent, SubscriberId};
use quickvm_hypervisor::source::EventSink;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Why an event could not be handed to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber's endpoint is gone.
    #[error("subscriber disconnected")]
    Closed,
    /// The subscriber is not keeping up with the event rate.
    #[error("subscriber queue is full")]
    Backpressure,
}

/// An endpoint that wants state-change events.
pub trait Subscriber: Send + Sync {
    /// Stable identity, used for idempotent registration.
    fn id(&self) -> SubscriberId;

    /// Hands one event over without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is dead or cannot accept the event
    /// right now. Either way the registry drops the subscriber.
    fn deliver(&self, event: &StateChangeEvent) -> Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded tokio channel.
///
/// `T` lets the receiving side pick its own frame type, for example a
/// wire frame that wraps the event.
pub struct ChannelSubscriber<T = StateChangeEvent> {
    id: SubscriberId,
    sender: mpsc::Sender<T>,
}

impl<T> ChannelSubscriber<T>
where
    T: From<StateChangeEvent> + Send,
{
    /// Creates a subscriber with a fresh identity and its receiving end.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(SubscriberId::generate(), sender), receiver)
    }

    /// Wraps an existing sender.
    #[must_use]
    pub const fn new(id: SubscriberId, sender: mpsc::Sender<T>) -> Self {
        Self { id, sender }
    }
}

impl<T> Subscriber for ChannelSubscriber<T>
where
    T: From<StateChangeEvent> + Send,
{
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, event: &StateChangeEvent) -> Result<(), DeliveryError> {
        self.sender
            .try_send(T::from(event.clone()))
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Backpressure,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }
}

/// Subscriber backed by an in-process callback.
///
/// The callback runs on the publishing thread, which is the state watcher,
/// and nothing bounds how long it takes. Keep it to quick in-process work
/// such as counters or test recorders; anything that may wait belongs behind
/// a [`ChannelSubscriber`].
pub struct FnSubscriber<F> {
    id: SubscriberId,
    callback: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&StateChangeEvent) -> Result<(), DeliveryError> + Send + Sync,
{
    /// Wraps a callback under a fresh identity.
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self {
            id: SubscriberId::generate(),
            callback,
        }
    }
}

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&StateChangeEvent) -> Result<(), DeliveryError> + Send + Sync,
{
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, event: &StateChangeEvent) -> Result<(), DeliveryError> {
        (self.callback)(event)
    }
}

/// Result of publishing one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that accepted the event.
    pub delivered: usize,
    /// Subscribers that failed and were unregistered.
    pub dropped: Vec<SubscriberId>,
}

/// The set of live subscribers.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Returns `false` if its id is already present,
    /// in which case the registry is unchanged.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        let id = subscriber.id();
        let mut subscribers = self.lock();
        if subscribers.contains_key(&id) {
            return false;
        }
        let _ = subscribers.insert(id, subscriber);
        tracing::info!(subscriber = %id, total = subscribers.len(), "subscriber registered");
        true
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            tracing::info!(subscriber = %id, "subscriber removed");
        }
        removed
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Delivers `event` to every subscriber registered at the time of the
    /// call and unregisters those that fail.
    ///
    /// The lock is released before delivery, so a subscriber joining or
    /// leaving concurrently never waits on a slow delivery.
    pub fn publish(&self, event: &StateChangeEvent) -> PublishReport {
        let snapshot: Vec<Arc<dyn Subscriber>> = self.lock().values().cloned().collect();

        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for subscriber in snapshot {
            match subscriber.deliver(event) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        subscriber = %subscriber.id(),
                        vm = %event.vm,
                        error = %e,
                        "delivery failed, dropping subscriber"
                    );
                    failed.push(subscriber);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.lock();
            for subscriber in failed {
                let id = subscriber.id();
                // Only the entry that failed; a re-registration under the
                // same id after the snapshot stays.
                let same = subscribers
                    .get(&id)
                    .is_some_and(|current| Arc::ptr_eq(current, &subscriber));
                if same {
                    let _ = subscribers.remove(&id);
                    report.dropped.push(id);
                }
            }
        }

        tracing::debug!(
            vm = %event.vm,
            sequence = event.sequence,
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "event published"
        );
        report
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<dyn Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for SubscriptionRegistry {
    fn emit(&self, event: StateChangeEvent) {
        let _ = self.publish(&event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use chrono::Utc;
    use quickvm_common::types::{ClassifiedState, RawState, VmId};

    use super::*;

    fn event(sequence: u64) -> StateChangeEvent {
        StateChangeEvent {
            vm: VmId::new("Test1"),
            state: ClassifiedState::Running,
            critical: false,
            raw: RawState::new(2),
            sequence,
            timestamp: Utc::now(),
        }
    }

    fn counting() -> (Arc<dyn Subscriber>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let subscriber = FnSubscriber::new(move |_event: &StateChangeEvent| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (Arc::new(subscriber), count)
    }

    #[test]
    fn subscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (subscriber, count) = counting();
        assert!(registry.subscribe(subscriber.clone()));
        assert!(!registry.subscribe(subscriber));
        assert_eq!(registry.len(), 1);

        let report = registry.publish(&event(1));
        assert_eq!(report.delivered, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = SubscriptionRegistry::new();
        let (subscriber, count) = counting();
        let id = subscriber.id();
        let _ = registry.subscribe(subscriber);
        assert!(registry.unsubscribe(&id));
        assert!(!registry.unsubscribe(&id));

        let report = registry.publish(&event(1));
        assert_eq!(report.delivered, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_subscriber_is_dropped_and_others_still_receive() {
        let registry = SubscriptionRegistry::new();
        let (healthy, count) = counting();
        let broken = Arc::new(FnSubscriber::new(|_event: &StateChangeEvent| {
            Err(DeliveryError::Closed)
        }));
        let broken_id = broken.id();
        let _ = registry.subscribe(healthy);
        let _ = registry.subscribe(broken);

        let report = registry.publish(&event(1));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, vec![broken_id]);
        assert!(!registry.contains(&broken_id));

        let report = registry.publish(&event(2));
        assert_eq!(report.delivered, 1);
        assert!(report.dropped.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn full_channel_is_backpressure() {
        let (subscriber, mut receiver) = ChannelSubscriber::<StateChangeEvent>::channel(1);
        assert_eq!(subscriber.deliver(&event(1)), Ok(()));
        assert_eq!(subscriber.deliver(&event(2)), Err(DeliveryError::Backpressure));
        assert_eq!(receiver.try_recv().unwrap().sequence, 1);
    }

    #[test]
    fn closed_channel_is_reported() {
        let (subscriber, receiver) = ChannelSubscriber::<StateChangeEvent>::channel(4);
        drop(receiver);
        assert_eq!(subscriber.deliver(&event(1)), Err(DeliveryError::Closed));
    }

    #[test]
    fn registry_is_an_event_sink() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (subscriber, mut receiver) = ChannelSubscriber::<StateChangeEvent>::channel(4);
        let _ = registry.subscribe(Arc::new(subscriber));
        let sink: Arc<dyn EventSink> = registry;
        sink.emit(event(7));
        assert_eq!(receiver.try_recv().unwrap().sequence, 7);
    }

    // ── Concurrency ──────────────────────────────────────────────

    /// Counts deliveries under a caller-chosen id.
    struct Counting {
        id: SubscriberId,
        count: Arc<AtomicUsize>,
    }

    impl Subscriber for Counting {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn deliver(&self, _event: &StateChangeEvent) -> Result<(), DeliveryError> {
            let _ = self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails its first delivery after swapping in a fresh registration under
    /// the same id, the way a reconnecting client would.
    struct Reconnecting {
        id: SubscriberId,
        registry: Arc<SubscriptionRegistry>,
        replacement: Mutex<Option<Arc<dyn Subscriber>>>,
    }

    impl Subscriber for Reconnecting {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn deliver(&self, _event: &StateChangeEvent) -> Result<(), DeliveryError> {
            if let Some(next) = self.replacement.lock().unwrap().take() {
                assert!(self.registry.unsubscribe(&self.id));
                assert!(self.registry.subscribe(next));
            }
            Err(DeliveryError::Closed)
        }
    }

    #[test]
    fn resubscription_during_failed_delivery_survives() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let id = SubscriberId::generate();
        let count = Arc::new(AtomicUsize::new(0));
        let replacement: Arc<dyn Subscriber> = Arc::new(Counting {
            id,
            count: Arc::clone(&count),
        });
        let _ = registry.subscribe(Arc::new(Reconnecting {
            id,
            registry: Arc::clone(&registry),
            replacement: Mutex::new(Some(replacement)),
        }));

        let report = registry.publish(&event(1));
        assert_eq!(report.delivered, 0);
        assert!(report.dropped.is_empty());
        assert!(registry.contains(&id));

        let report = registry.publish(&event(2));
        assert_eq!(report.delivered, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn churn_while_publishing() {
        const CHURNERS: usize = 4;
        const ROUNDS: usize = 200;
        const EVENTS: u64 = 500;

        let registry = Arc::new(SubscriptionRegistry::new());
        let (steady, steady_count) = counting();
        let steady_id = steady.id();
        let _ = registry.subscribe(steady);

        let publisher = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for sequence in 1..=EVENTS {
                    let _ = registry.publish(&event(sequence));
                }
            })
        };
        let churners: Vec<_> = (0..CHURNERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let (subscriber, _count) = counting();
                        let id = subscriber.id();
                        assert!(registry.subscribe(Arc::clone(&subscriber)));
                        assert!(!registry.subscribe(subscriber));
                        assert!(registry.unsubscribe(&id));
                    }
                })
            })
            .collect();

        publisher.join().unwrap();
        for churner in churners {
            churner.join().unwrap();
        }

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&steady_id));
        let delivered = u64::try_from(steady_count.load(Ordering::SeqCst)).unwrap();
        assert_eq!(delivered, EVENTS);
    }
}
