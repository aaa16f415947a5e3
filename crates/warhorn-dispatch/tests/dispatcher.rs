//! Integration tests for the dispatcher: ordering, isolation of failures,
//! and subscription changes while other threads push and pump.

use std::any::TypeId;
use std::sync::{Arc, Mutex};
use std::thread;

use warhorn_dispatch::{Dispatcher, HandlerResult};

#[derive(Debug, Clone, PartialEq)]
struct Move(u32);

#[derive(Debug, Clone, PartialEq)]
struct Chat(String);

fn dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_kind::<Move>().unwrap();
    dispatcher.add_kind::<Chat>().unwrap();
    dispatcher
}

// =========================================================================
// Ordering
// =========================================================================

#[test]
fn test_same_kind_delivered_in_push_order() {
    let dispatcher = dispatcher();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher
        .subscribe(move |m: &Move| -> HandlerResult {
            sink.lock().unwrap().push(m.0);
            Ok(())
        })
        .unwrap();

    for i in 0..100 {
        dispatcher.push(Move(i)).unwrap();
    }
    let report = dispatcher.pump();

    assert_eq!(report.delivered, 100);
    assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_producer_thread_order_is_preserved() {
    let dispatcher = Arc::new(dispatcher());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher
        .subscribe(move |m: &Move| -> HandlerResult {
            sink.lock().unwrap().push(m.0);
            Ok(())
        })
        .unwrap();

    let producer = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            for i in 0..1_000 {
                dispatcher
                    .push_erased(TypeId::of::<Move>(), Box::new(Move(i)))
                    .unwrap();
            }
        })
    };

    // Pump concurrently with the producer, then once more at the end.
    while !producer.is_finished() {
        dispatcher.pump();
    }
    producer.join().unwrap();
    dispatcher.pump();

    assert_eq!(*seen.lock().unwrap(), (0..1_000).collect::<Vec<_>>());
}

// =========================================================================
// Isolation
// =========================================================================

#[test]
fn test_failure_in_one_kind_does_not_affect_another() {
    let dispatcher = dispatcher();
    let chats = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&chats);

    dispatcher
        .subscribe(|_: &Move| -> HandlerResult { Err("move handler broke".into()) })
        .unwrap();
    dispatcher
        .subscribe(move |c: &Chat| -> HandlerResult {
            sink.lock().unwrap().push(c.0.clone());
            Ok(())
        })
        .unwrap();

    dispatcher.push(Move(1)).unwrap();
    dispatcher.push(Chat("hi".into())).unwrap();
    let report = dispatcher.pump();

    assert_eq!(report.delivered, 2);
    assert_eq!(report.handler_failures, 1);
    assert_eq!(*chats.lock().unwrap(), vec!["hi".to_string()]);
}

#[test]
fn test_pump_kind_leaves_other_queues_alone() {
    let dispatcher = dispatcher();
    dispatcher.push(Move(1)).unwrap();
    dispatcher.push(Chat("later".into())).unwrap();

    let report = dispatcher.pump_kind::<Move>().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(dispatcher.pending(), 1);
    assert_eq!(dispatcher.queue::<Chat>().unwrap().len(), 1);
}

// =========================================================================
// Subscriptions
// =========================================================================

#[test]
fn test_unsubscribe_stops_delivery() {
    let dispatcher = dispatcher();
    let count = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&count);
    let sub = dispatcher
        .subscribe(move |_: &Move| -> HandlerResult {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

    dispatcher.push(Move(1)).unwrap();
    dispatcher.pump();
    assert!(dispatcher.unsubscribe(&sub));
    assert!(!dispatcher.unsubscribe(&sub));

    dispatcher.push(Move(2)).unwrap();
    dispatcher.pump();
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn test_handler_can_unsubscribe_itself_mid_pump() {
    let dispatcher = Arc::new(dispatcher());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::new(Mutex::new(None));

    let sub = {
        let dispatcher_ref = Arc::downgrade(&dispatcher);
        let seen = Arc::clone(&seen);
        let slot = Arc::clone(&slot);
        dispatcher
            .subscribe(move |m: &Move| -> HandlerResult {
                seen.lock().unwrap().push(m.0);
                // Only take the first message, then leave.
                if let (Some(d), Some(sub)) =
                    (dispatcher_ref.upgrade(), *slot.lock().unwrap())
                {
                    d.unsubscribe(&sub);
                }
                Ok(())
            })
            .unwrap()
    };
    *slot.lock().unwrap() = Some(sub);

    dispatcher.push(Move(1)).unwrap();
    dispatcher.push(Move(2)).unwrap();
    dispatcher.pump();

    assert_eq!(*seen.lock().unwrap(), vec![1]);
}

#[test]
fn test_subscribe_from_another_thread_while_pumping() {
    let dispatcher = Arc::new(dispatcher());
    let subscriber = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            for _ in 0..50 {
                let sub = dispatcher
                    .subscribe(|_: &Chat| -> HandlerResult { Ok(()) })
                    .unwrap();
                dispatcher.unsubscribe(&sub);
            }
        })
    };

    for i in 0..50 {
        dispatcher.push(Chat(i.to_string())).unwrap();
        dispatcher.pump();
    }
    subscriber.join().unwrap();
    assert_eq!(dispatcher.pending(), 0);
}
