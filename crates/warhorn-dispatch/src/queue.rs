//! One delivery queue: the FIFO of decoded messages of a single kind plus
//! the handlers subscribed to that kind.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::{AnyMessage, HandlerResult, PumpReport};

type BoxedHandler<T> = Box<dyn FnMut(&T) -> HandlerResult + Send>;

/// A registered handler. The `Arc` lets the pump invoke it without holding
/// the handler-list lock, so handlers may subscribe or unsubscribe freely.
struct HandlerSlot<T> {
    id: u64,
    handler: Arc<Mutex<BoxedHandler<T>>>,
}

/// The delivery queue for messages of type `T`.
///
/// Producers (the receiver task) call [`push`](Self::push) from any
/// thread. The application thread calls [`pump`](Self::pump) to hand the
/// queued messages to handlers.
pub struct DeliveryQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    handlers: Mutex<Vec<HandlerSlot<T>>>,
    /// Held for the duration of one pump step; a second concurrent or
    /// re-entrant pump of this kind skips instead of reordering items.
    pumping: Mutex<()>,
    type_name: &'static str,
}

impl<T: Send + 'static> DeliveryQueue<T> {
    /// Creates an empty queue with no handlers.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            handlers: Mutex::new(Vec::new()),
            pumping: Mutex::new(()),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Appends a message. Never blocks.
    pub fn push(&self, msg: T) {
        // Both ends live in `self`, so the channel can't be disconnected.
        let _ = self.tx.send(msg);
    }

    /// Number of messages waiting for the next pump.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Adds a handler under the given subscription id.
    pub(crate) fn add_handler(&self, id: u64, handler: BoxedHandler<T>) {
        self.lock_handlers().push(HandlerSlot {
            id,
            handler: Arc::new(Mutex::new(handler)),
        });
    }

    /// Removes the handler with this id. Returns `false` if it wasn't there.
    pub(crate) fn remove_handler(&self, id: u64) -> bool {
        let mut handlers = self.lock_handlers();
        let before = handlers.len();
        handlers.retain(|slot| slot.id != id);
        handlers.len() != before
    }

    /// Number of handlers currently registered.
    pub fn handler_count(&self) -> usize {
        self.lock_handlers().len()
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, Vec<HandlerSlot<T>>> {
        // Handlers never run under this lock, so poison can only come from
        // a panic in Vec bookkeeping; the data is still consistent.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Arc<Mutex<BoxedHandler<T>>>> {
        self.lock_handlers()
            .iter()
            .map(|slot| Arc::clone(&slot.handler))
            .collect()
    }

    /// Delivers every message queued when the step starts, in FIFO order,
    /// to every handler in registration order.
    ///
    /// Messages that arrive during the step wait for the next one. A
    /// handler that returns `Err` or panics is logged and counted; the
    /// remaining handlers and messages are unaffected. Messages with no
    /// handler registered are drained and dropped.
    pub fn pump(&self) -> PumpReport {
        let mut report = PumpReport::default();
        let Ok(_step) = self.pumping.try_lock() else {
            tracing::warn!(
                kind = self.type_name,
                "pump already in progress for this kind, skipping"
            );
            return report;
        };

        let available = self.rx.len();
        for msg in self.rx.try_iter().take(available) {
            report.delivered += 1;

            // Re-read per message so subscription changes made by a
            // handler apply from the next message on.
            for handler in self.snapshot() {
                report.invocations += 1;
                let mut handler =
                    handler.lock().unwrap_or_else(PoisonError::into_inner);
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| (&mut **handler)(&msg)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        report.handler_failures += 1;
                        tracing::warn!(
                            kind = self.type_name,
                            error = %e,
                            "message handler failed"
                        );
                    }
                    Err(panic) => {
                        report.handler_failures += 1;
                        tracing::warn!(
                            kind = self.type_name,
                            panic = panic_message(&*panic),
                            "message handler panicked"
                        );
                    }
                }
            }
        }

        if report.delivered > 0 {
            tracing::trace!(
                kind = self.type_name,
                delivered = report.delivered,
                "pumped delivery queue"
            );
        }
        report
    }
}

impl<T: Send + 'static> Default for DeliveryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// The type-erased face of a [`DeliveryQueue`], so the dispatcher can keep
/// queues of different types in one collection.
pub(crate) trait ErasedQueue: Send + Sync {
    /// Pushes a boxed message. Hands it back if it isn't a `T`.
    fn push_any(&self, msg: AnyMessage) -> Result<(), AnyMessage>;
    fn pump(&self) -> PumpReport;
    fn pending(&self) -> usize;
    fn remove_handler(&self, id: u64) -> bool;
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + 'static> ErasedQueue for DeliveryQueue<T> {
    fn push_any(&self, msg: AnyMessage) -> Result<(), AnyMessage> {
        let msg = msg.downcast::<T>()?;
        self.push(*msg);
        Ok(())
    }

    fn pump(&self) -> PumpReport {
        DeliveryQueue::pump(self)
    }

    fn pending(&self) -> usize {
        self.len()
    }

    fn remove_handler(&self, id: u64) -> bool {
        DeliveryQueue::remove_handler(self, id)
    }

    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> BoxedHandler<u32> {
        let log = Arc::clone(log);
        Box::new(move |n: &u32| -> HandlerResult {
            log.lock().unwrap().push(format!("{tag}:{n}"));
            Ok(())
        })
    }

    #[test]
    fn test_pump_delivers_fifo_to_handlers_in_registration_order() {
        let queue = DeliveryQueue::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_handler(1, recording(&log, "a"));
        queue.add_handler(2, recording(&log, "b"));

        queue.push(1);
        queue.push(2);
        let report = queue.pump();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.invocations, 4);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:1", "b:1", "a:2", "b:2"]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let queue = DeliveryQueue::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_handler(
            1,
            Box::new(|_: &u32| -> HandlerResult { Err("boom".into()) }),
        );
        queue.add_handler(2, recording(&log, "ok"));

        queue.push(7);
        queue.push(8);
        let report = queue.pump();

        assert_eq!(report.handler_failures, 2);
        assert_eq!(*log.lock().unwrap(), vec!["ok:7", "ok:8"]);
    }

    #[test]
    fn test_panicking_handler_is_caught() {
        let queue = DeliveryQueue::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_handler(
            1,
            Box::new(|n: &u32| -> HandlerResult {
                if *n == 1 {
                    panic!("bad message");
                }
                Ok(())
            }),
        );
        queue.add_handler(2, recording(&log, "ok"));

        queue.push(1);
        queue.push(2);
        let report = queue.pump();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.handler_failures, 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok:1", "ok:2"]);

        // The panicking handler is still usable afterwards.
        queue.push(3);
        assert_eq!(queue.pump().handler_failures, 0);
    }

    #[test]
    fn test_messages_without_handlers_are_drained() {
        let queue = DeliveryQueue::<u32>::new();
        queue.push(1);
        let report = queue.pump();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.invocations, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_handler() {
        let queue = DeliveryQueue::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_handler(1, recording(&log, "a"));
        assert!(queue.remove_handler(1));
        assert!(!queue.remove_handler(1));
        assert_eq!(queue.handler_count(), 0);

        queue.push(1);
        queue.pump();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_push_any_rejects_wrong_type() {
        let queue = DeliveryQueue::<u32>::new();
        let wrong: AnyMessage = Box::new("not a u32");
        assert!(queue.push_any(wrong).is_err());
        assert!(queue.push_any(Box::new(5u32)).is_ok());
        assert_eq!(queue.pending(), 1);
    }
}
