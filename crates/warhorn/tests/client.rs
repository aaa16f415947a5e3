//! Integration tests for the client: queuing, routing, delivery, and the
//! connection lifecycle, over the in-memory transport.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use warhorn::prelude::*;
use warhorn::transport::{
    MemoryAcceptor, MemoryConnection, MemoryPeer, TransportError,
};

// =========================================================================
// Helpers
// =========================================================================

fn game_client() -> (Client<MemoryConnector>, MemoryAcceptor) {
    let (connector, acceptor) = MemoryConnector::new();
    let client = Client::builder()
        .server_uri("ws://game.test")
        .with_game_messages()
        .build(connector)
        .expect("client should build");
    (client, acceptor)
}

async fn connect(
    client: &Client<MemoryConnector>,
    acceptor: &mut MemoryAcceptor,
) -> MemoryPeer {
    client.connect().await.expect("connect should succeed");
    acceptor.accept().await.expect("server should see the connection")
}

/// Polls `condition` until it holds, failing the test after two seconds.
async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn record<T>(
    client: &Client<MemoryConnector>,
    log: &Arc<Mutex<Vec<String>>>,
    describe: fn(&T) -> String,
) -> Subscription
where
    T: Send + 'static,
{
    let log = Arc::clone(log);
    client
        .on_receive(move |msg: &T| -> HandlerResult {
            log.lock().unwrap().push(describe(msg));
            Ok(())
        })
        .expect("kind should be receivable")
}

// =========================================================================
// Receiving
// =========================================================================

#[tokio::test]
async fn test_received_messages_wait_for_pump() {
    let (client, mut acceptor) = game_client();
    let log = Arc::new(Mutex::new(Vec::new()));
    record::<OrderRequest>(&client, &log, |_| "orderRequest".into());
    record::<Winner>(&client, &log, |w| format!("winner:{}", w.winner));

    let peer = connect(&client, &mut acceptor).await;
    peer.send_text(r#"{"orderRequest":{}}"#);
    peer.send_text(r#"{"winner":{"winner":"red"}}"#);

    eventually("both messages queued", || client.pending_inbound() == 2).await;
    assert!(log.lock().unwrap().is_empty(), "nothing runs before pump");

    let report = client.pump();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.invocations, 2);
    assert_eq!(report.handler_failures, 0);

    // Kinds are pumped in catalog order: orderRequest before winner.
    assert_eq!(*log.lock().unwrap(), vec!["orderRequest", "winner:red"]);

    let again = client.pump();
    assert_eq!(again.delivered, 0, "each message delivered once");
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_same_kind_delivered_in_arrival_order() {
    let (client, mut acceptor) = game_client();
    let log = Arc::new(Mutex::new(Vec::new()));
    record::<BattleResults>(&client, &log, |b| b.region.clone());

    let peer = connect(&client, &mut acceptor).await;
    for region in ["winterfell", "riverrun", "the-eyrie"] {
        peer.send_text(format!(
            r#"{{"battleResults":{{"region":"{region}","attacker":"a","defender":"b","attackerStrength":3,"defenderStrength":2,"winner":"a"}}}}"#
        ));
    }

    eventually("three results queued", || client.pending_inbound() == 3).await;
    client.pump();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["winterfell", "riverrun", "the-eyrie"]
    );
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let (client, mut acceptor) = game_client();
    let log = Arc::new(Mutex::new(Vec::new()));
    record::<Winner>(&client, &log, |w| w.winner.to_string());

    let peer = connect(&client, &mut acceptor).await;
    peer.send_text(r#"{"winner":"#);
    peer.send_text(r#"{"winner":{"winner":"red"}}"#);

    eventually("good frame queued", || client.pending_inbound() == 1).await;
    assert_eq!(client.pump().delivered, 1);
    assert_eq!(*log.lock().unwrap(), vec!["red"]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_envelope_without_exactly_one_key_is_skipped() {
    let (client, mut acceptor) = game_client();
    let log = Arc::new(Mutex::new(Vec::new()));
    record::<Winner>(&client, &log, |w| w.winner.to_string());
    record::<OrderRequest>(&client, &log, |_| "orderRequest".into());

    let peer = connect(&client, &mut acceptor).await;
    peer.send_text("{}");
    peer.send_text(r#"{"winner":{"winner":"blue"},"orderRequest":{}}"#);
    peer.send_text(r#"{"winner":{"winner":"red"}}"#);

    eventually("good frame queued", || client.pending_inbound() == 1).await;
    let report = client.pump();
    assert_eq!(report.delivered, 1);
    assert_eq!(*log.lock().unwrap(), vec!["red"]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_unknown_wire_key_is_dropped() {
    let (client, mut acceptor) = game_client();
    let log = Arc::new(Mutex::new(Vec::new()));
    record::<Winner>(&client, &log, |w| w.winner.to_string());

    let peer = connect(&client, &mut acceptor).await;
    peer.send_text(r#"{"fooBar":{}}"#);
    peer.send_text(r#"{"error":{"message":"bad order"}}"#);
    peer.send_text(r#"{"winner":{"winner":"blue"}}"#);

    eventually("known frames queued", || client.pending_inbound() == 2).await;
    let report = client.pump();
    assert_eq!(report.delivered, 2);
    assert_eq!(*log.lock().unwrap(), vec!["blue"]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_binary_frame_is_dropped() {
    let (client, mut acceptor) = game_client();
    let peer = connect(&client, &mut acceptor).await;
    peer.send_binary(vec![0x7b, 0x7d]);
    peer.send_text(r#"{"orderRequest":{}}"#);

    eventually("text frame queued", || client.pending_inbound() == 1).await;
    assert_eq!(client.pump().delivered, 1);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_failing_handlers_do_not_stop_delivery() {
    let (client, mut acceptor) = game_client();
    let log = Arc::new(Mutex::new(Vec::new()));

    client
        .on_receive(|_: &Winner| -> HandlerResult { Err("scoreboard broke".into()) })
        .unwrap();
    client
        .on_receive(|_: &Winner| -> HandlerResult { panic!("handler bug") })
        .unwrap();
    record::<Winner>(&client, &log, |w| w.winner.to_string());
    record::<OrderRequest>(&client, &log, |_| "orderRequest".into());

    let peer = connect(&client, &mut acceptor).await;
    peer.send_text(r#"{"winner":{"winner":"red"}}"#);
    peer.send_text(r#"{"orderRequest":{}}"#);
    eventually("messages queued", || client.pending_inbound() == 2).await;

    let report = client.pump();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.handler_failures, 2);
    let mut seen = log.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["orderRequest", "red"]);
}

#[tokio::test]
async fn test_removed_handler_is_not_called() {
    let (client, mut acceptor) = game_client();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sub = record::<Winner>(&client, &log, |w| w.winner.to_string());
    assert!(client.remove_handler(&sub));

    let peer = connect(&client, &mut acceptor).await;
    peer.send_text(r#"{"winner":{"winner":"red"}}"#);
    eventually("message queued", || client.pending_inbound() == 1).await;

    let report = client.pump();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.invocations, 0);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_pump_kind_only_drains_that_kind() {
    let (client, mut acceptor) = game_client();
    let peer = connect(&client, &mut acceptor).await;
    peer.send_text(r#"{"orderRequest":{}}"#);
    peer.send_text(r#"{"winner":{"winner":"red"}}"#);
    eventually("messages queued", || client.pending_inbound() == 2).await;

    let report = client.pump_kind::<Winner>().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(client.pending_inbound(), 1);

    assert!(client.pump_kind::<SelectGameId>().is_err());
}

// =========================================================================
// Sending
// =========================================================================

#[tokio::test]
async fn test_message_sent_before_connect_goes_out_first() {
    let (client, mut acceptor) = game_client();
    client
        .send(&SelectGameId {
            game_id: GameId::from("abc"),
        })
        .unwrap();
    assert_eq!(client.pending_outbound(), 1);

    let mut peer = connect(&client, &mut acceptor).await;
    client.send(&Ready {}).unwrap();

    assert_eq!(
        peer.recv().await.unwrap(),
        r#"{"selectGameId":{"gameId":"abc"}}"#
    );
    assert_eq!(peer.recv().await.unwrap(), r#"{"ready":{}}"#);
    eventually("queue drained", || client.pending_outbound() == 0).await;
}

#[tokio::test]
async fn test_send_unregistered_kind_is_rejected() {
    let (client, _acceptor) = game_client();
    let err = client.send(&Winner { winner: "red".into() }).unwrap_err();
    assert!(matches!(err, WarhornError::Protocol(_)));
    assert_eq!(client.pending_outbound(), 0);
}

#[tokio::test]
async fn test_concurrent_sends_produce_whole_frames() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 50;

    let (client, mut acceptor) = game_client();
    let client = Arc::new(client);

    let senders: Vec<_> = (0..THREADS)
        .map(|t| {
            let client = Arc::clone(&client);
            std::thread::spawn(move || {
                for i in 0..PER_THREAD {
                    client
                        .send(&WinterVote {
                            choice: format!("{t}-{i}"),
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    let mut peer = connect(&client, &mut acceptor).await;
    let mut next_per_thread = [0usize; THREADS];
    for _ in 0..THREADS * PER_THREAD {
        let frame = peer.recv().await.unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&frame).expect("every frame is whole JSON");
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 1);

        let choice = object["winterVote"]["choice"].as_str().unwrap();
        let (t, i) = choice.split_once('-').unwrap();
        let (t, i): (usize, usize) = (t.parse().unwrap(), i.parse().unwrap());
        assert_eq!(i, next_per_thread[t], "per-thread order is kept");
        next_per_thread[t] += 1;
    }
    assert_eq!(next_per_thread, [PER_THREAD; THREADS]);
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_connect_and_disconnect_report_events() {
    let (client, mut acceptor) = game_client();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let peer = connect(&client, &mut acceptor).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.connection_id().await, Some(peer.id()));

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(peer.is_closed_by_client());
    assert_eq!(client.connection_id().await, None);

    let events = client.drain_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ConnectionEvent::Connected(id) if id == peer.id()));
    assert!(matches!(events[1], ConnectionEvent::Disconnected(id) if id == peer.id()));
    assert!(client.drain_events().is_empty());
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let (client, mut acceptor) = game_client();
    let (first, second) = tokio::join!(client.connect(), client.connect());

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(WarhornError::AlreadyConnected(_))))
    );
    acceptor.accept().await.unwrap();

    assert!(matches!(
        client.connect().await,
        Err(WarhornError::AlreadyConnected(ConnectionState::Connected))
    ));
}

#[tokio::test]
async fn test_refused_connect_leaves_client_disconnected() {
    let (connector, _acceptor) = MemoryConnector::new();
    connector.refuse_connections(true);
    let client = Client::builder()
        .with_game_messages()
        .build(connector)
        .unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(
        err,
        WarhornError::Transport(TransportError::ConnectFailed(_))
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.drain_events().is_empty());
}

/// Never finishes its first `connect`; later calls go to a memory
/// connector.
struct StallingConnector {
    stall_next: AtomicBool,
    inner: MemoryConnector,
}

impl Connector for StallingConnector {
    type Connection = MemoryConnection;

    fn connect(
        &self,
        uri: &str,
    ) -> impl Future<Output = Result<MemoryConnection, TransportError>> + Send {
        let stall = self.stall_next.swap(false, Ordering::SeqCst);
        let uri = uri.to_string();
        async move {
            if stall {
                std::future::pending::<()>().await;
            }
            self.inner.connect(&uri).await
        }
    }
}

#[tokio::test]
async fn test_cancelled_connect_leaves_client_disconnected() {
    let (inner, mut acceptor) = MemoryConnector::new();
    let client = Client::builder()
        .with_game_messages()
        .build(StallingConnector {
            stall_next: AtomicBool::new(true),
            inner,
        })
        .unwrap();

    let result =
        tokio::time::timeout(Duration::from_millis(50), client.connect()).await;
    assert!(result.is_err(), "connect should still be pending");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.disconnect().await,
        Err(WarhornError::NotConnected)
    ));
    assert!(client.drain_events().is_empty());

    client.connect().await.expect("retry should connect");
    acceptor.accept().await.unwrap();
    assert!(client.is_connected());
    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_write_failure_loses_connection_and_queue() {
    let (client, mut acceptor) = game_client();
    let peer = connect(&client, &mut acceptor).await;
    peer.fail_writes();

    for _ in 0..3 {
        client.send(&Ready {}).unwrap();
    }
    eventually("connection lost", || {
        client.state() == ConnectionState::Disconnected
    })
    .await;

    assert_eq!(client.pending_outbound(), 0, "queued messages discarded");
    let events = client.drain_events();
    assert!(matches!(events.last(), Some(ConnectionEvent::Lost(_, _))));
    assert!(matches!(
        client.disconnect().await,
        Err(WarhornError::NotConnected)
    ));
}

#[tokio::test]
async fn test_server_close_loses_connection_then_reconnects() {
    let (client, mut acceptor) = game_client();
    let peer = connect(&client, &mut acceptor).await;
    peer.close();

    eventually("connection lost", || {
        client.state() == ConnectionState::Disconnected
    })
    .await;
    let events = client.drain_events();
    assert!(matches!(
        events.last(),
        Some(ConnectionEvent::Lost(_, TransportError::ConnectionClosed(_)))
    ));

    client.send(&Ready {}).unwrap();
    let mut peer = connect(&client, &mut acceptor).await;
    assert_eq!(peer.recv().await.unwrap(), r#"{"ready":{}}"#);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_messages_queued_after_disconnect_wait_for_next_connect() {
    let (client, mut acceptor) = game_client();
    let _first = connect(&client, &mut acceptor).await;
    client.disconnect().await.unwrap();

    client.send(&SwordMsg { use_sword: true }).unwrap();
    assert_eq!(client.pending_outbound(), 1);

    let mut second = connect(&client, &mut acceptor).await;
    assert_eq!(
        second.recv().await.unwrap(),
        r#"{"swordMsg":{"useSword":true}}"#
    );
}
