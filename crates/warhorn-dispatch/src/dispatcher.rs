//! The dispatcher: every delivery queue of a client, keyed by message type.

use std::any::TypeId;
use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::queue::ErasedQueue;
use crate::{AnyMessage, DeliveryQueue, DispatchError, HandlerResult};

/// Summary of one pump step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Messages taken off delivery queues.
    pub delivered: usize,
    /// Handler calls made.
    pub invocations: usize,
    /// Handler calls that returned `Err` or panicked.
    pub handler_failures: usize,
}

impl AddAssign for PumpReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.invocations += other.invocations;
        self.handler_failures += other.handler_failures;
    }
}

/// Handle returned when a handler is registered. Pass it to
/// [`Dispatcher::unsubscribe`] to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    type_id: TypeId,
    id: u64,
}

impl Subscription {
    /// The message type this subscription listens to.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// Owns one [`DeliveryQueue`] per receivable message type.
///
/// The set of kinds is fixed while the dispatcher is being set up
/// (`&mut self`); afterwards everything goes through `&self`, so the
/// dispatcher is shared as an `Arc` between the receiver task (pushing)
/// and the application thread (subscribing and pumping).
#[derive(Default)]
pub struct Dispatcher {
    /// Pump order is registration order.
    queues: Vec<Arc<dyn ErasedQueue>>,
    by_type: HashMap<TypeId, usize>,
    next_subscription: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher with no kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the delivery queue for `T`.
    ///
    /// # Errors
    /// [`DispatchError::DuplicateKind`] if `T` already has one.
    pub fn add_kind<T: Send + 'static>(&mut self) -> Result<(), DispatchError> {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return Err(DispatchError::DuplicateKind(std::any::type_name::<T>()));
        }
        self.by_type.insert(type_id, self.queues.len());
        self.queues.push(Arc::new(DeliveryQueue::<T>::new()));
        Ok(())
    }

    /// Returns `true` if `T` has a delivery queue.
    pub fn has_kind<T: 'static>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    fn erased(&self, type_id: TypeId) -> Option<&Arc<dyn ErasedQueue>> {
        self.by_type.get(&type_id).map(|&i| &self.queues[i])
    }

    /// The typed queue for `T`, if `T` is a registered kind.
    pub fn queue<T: Send + 'static>(&self) -> Option<&DeliveryQueue<T>> {
        self.erased(TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<DeliveryQueue<T>>()
    }

    /// Pushes a typed message onto its queue.
    ///
    /// # Errors
    /// [`DispatchError::UnknownKind`] if `T` has no queue.
    pub fn push<T: Send + 'static>(&self, msg: T) -> Result<(), DispatchError> {
        let queue = self
            .queue::<T>()
            .ok_or(DispatchError::UnknownKind(std::any::type_name::<T>()))?;
        queue.push(msg);
        Ok(())
    }

    /// Pushes a type-erased message onto the queue for `type_id`.
    ///
    /// # Errors
    /// [`DispatchError::UnknownKind`] if there is no such queue, or
    /// [`DispatchError::TypeMismatch`] if the value isn't of that type.
    pub fn push_erased(
        &self,
        type_id: TypeId,
        msg: AnyMessage,
    ) -> Result<(), DispatchError> {
        let queue = self
            .erased(type_id)
            .ok_or(DispatchError::UnknownKind("<erased>"))?;
        queue.push_any(msg).map_err(|_| DispatchError::TypeMismatch {
            expected: queue.type_name(),
        })
    }

    /// Registers a handler for `T`. Handlers of one kind run in the order
    /// they were registered. Safe to call while another thread pumps.
    ///
    /// # Errors
    /// [`DispatchError::UnknownKind`] if `T` has no queue.
    pub fn subscribe<T, F>(&self, handler: F) -> Result<Subscription, DispatchError>
    where
        T: Send + 'static,
        F: FnMut(&T) -> HandlerResult + Send + 'static,
    {
        let queue = self
            .queue::<T>()
            .ok_or(DispatchError::UnknownKind(std::any::type_name::<T>()))?;
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        queue.add_handler(id, Box::new(handler));
        tracing::debug!(kind = std::any::type_name::<T>(), id, "handler subscribed");
        Ok(Subscription {
            type_id: TypeId::of::<T>(),
            id,
        })
    }

    /// Removes a handler. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let removed = self
            .erased(subscription.type_id)
            .is_some_and(|queue| queue.remove_handler(subscription.id));
        if removed {
            tracing::debug!(id = subscription.id, "handler unsubscribed");
        }
        removed
    }

    /// Runs one pump step over every queue, in registration order.
    ///
    /// Call this from the application's own loop (e.g. once per frame).
    /// Handlers run on the calling thread.
    pub fn pump(&self) -> PumpReport {
        let mut report = PumpReport::default();
        for queue in &self.queues {
            report += queue.pump();
        }
        report
    }

    /// Runs one pump step over `T`'s queue only.
    ///
    /// # Errors
    /// [`DispatchError::UnknownKind`] if `T` has no queue.
    pub fn pump_kind<T: Send + 'static>(&self) -> Result<PumpReport, DispatchError> {
        self.queue::<T>()
            .map(DeliveryQueue::pump)
            .ok_or(DispatchError::UnknownKind(std::any::type_name::<T>()))
    }

    /// Total messages waiting across all queues.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.pending()).sum()
    }

    /// Number of registered kinds.
    pub fn kind_count(&self) -> usize {
        self.queues.len()
    }
}
