//! A minimal bot that joins a game and plays it with fixed answers.
//!
//! Usage: `warhorn-cli [SERVER_URI | CONFIG.json] [GAME_ID]`
//!
//! Handlers never send on their own; they push a [`Reply`] that the main
//! loop sends after each pump.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use warhorn::prelude::*;

// ---------------------------------------------------------------------------
// Bot behaviour
// ---------------------------------------------------------------------------

/// What the bot wants to say back to the server.
#[derive(Debug, PartialEq)]
enum Reply {
    Ready,
    Orders(SubmitOrders),
    Support(GiveSupport),
    Done(PlayerId),
}

fn install_handlers<C: Connector>(
    client: &Client<C>,
    replies: Sender<Reply>,
) -> Result<(), WarhornError> {
    client.on_receive(|e: &ServerError| -> HandlerResult {
        tracing::warn!(message = %e.message, "server error");
        Ok(())
    })?;

    client.on_receive(|s: &PlayerStatus| -> HandlerResult {
        let ready = s.players.iter().filter(|p| p.ready).count();
        tracing::info!(players = s.players.len(), ready, "lobby status");
        Ok(())
    })?;

    // Our own house, as assigned by the server.
    let me: Arc<Mutex<Option<PlayerId>>> = Arc::default();

    let tx = replies.clone();
    let seat = Arc::clone(&me);
    client.on_receive(move |j: &LobbyJoined| -> HandlerResult {
        tracing::info!(game_id = %j.game_id.0, player_id = %j.player_id, "joined lobby");
        *seat.lock().unwrap_or_else(PoisonError::into_inner) = Some(j.player_id.clone());
        tx.send(Reply::Ready)?;
        Ok(())
    })?;

    let seat = Arc::clone(&me);
    client.on_receive(move |s: &StartGame| -> HandlerResult {
        tracing::info!(player_id = %s.player_id, turn_order = ?s.turn_order, "game started");
        *seat.lock().unwrap_or_else(PoisonError::into_inner) = Some(s.player_id.clone());
        Ok(())
    })?;

    let tx = replies.clone();
    client.on_receive(move |_: &OrderRequest| -> HandlerResult {
        tx.send(Reply::Orders(SubmitOrders {
            orders: vec![Order {
                region: "home".into(),
                kind: OrderKind::Defend,
                star: false,
            }],
        }))?;
        Ok(())
    })?;

    client.on_receive(|c: &OrdersConfirmation| -> HandlerResult {
        if c.accepted {
            tracing::info!("orders accepted");
        } else {
            tracing::warn!(reason = ?c.reason, "orders rejected");
        }
        Ok(())
    })?;

    client.on_receive(|r: &OrdersReceived| -> HandlerResult {
        for (player, orders) in &r.0 {
            tracing::info!(%player, orders = orders.len(), "orders revealed");
        }
        Ok(())
    })?;

    let tx = replies.clone();
    client.on_receive(move |s: &SupportRequest| -> HandlerResult {
        let Some(player_id) = me.lock().unwrap_or_else(PoisonError::into_inner).clone()
        else {
            return Err("support requested before the server assigned us a house".into());
        };
        // The bot stays neutral.
        tx.send(Reply::Support(GiveSupport {
            region: s.region.clone(),
            player_id,
            supports: None,
        }))?;
        Ok(())
    })?;

    client.on_receive(|b: &BattleResults| -> HandlerResult {
        tracing::info!(
            region = %b.region,
            winner = %b.winner,
            attacker_strength = b.attacker_strength,
            defender_strength = b.defender_strength,
            "battle resolved"
        );
        Ok(())
    })?;

    client.on_receive(|g: &GiveSupport| -> HandlerResult {
        tracing::info!(region = %g.region, player_id = %g.player_id, supports = ?g.supports, "support given");
        Ok(())
    })?;

    client.on_receive(move |w: &Winner| -> HandlerResult {
        replies.send(Reply::Done(w.winner.clone()))?;
        Ok(())
    })?;

    Ok(())
}

/// Sends every pending reply. Returns the winner once the game is over.
fn flush_replies<C: Connector>(
    client: &Client<C>,
    replies: &Receiver<Reply>,
) -> Result<Option<PlayerId>, WarhornError> {
    for reply in replies.try_iter() {
        match reply {
            Reply::Ready => client.send(&Ready {})?,
            Reply::Orders(orders) => client.send(&orders)?,
            Reply::Support(support) => client.send(&support)?,
            Reply::Done(winner) => return Ok(Some(winner)),
        }
    }
    Ok(None)
}

fn load_config(arg: Option<String>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match arg {
        Some(path) if path.ends_with(".json") => {
            Ok(ClientConfig::from_json(&std::fs::read_to_string(path)?)?)
        }
        Some(uri) => Ok(ClientConfig {
            server_uri: uri,
            ..ClientConfig::default()
        }),
        None => Ok(ClientConfig::default()),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    warhorn::init_logging();

    let mut args = std::env::args().skip(1);
    let config = load_config(args.next())?;
    let game_id = GameId::from(args.next().as_deref().unwrap_or("lobby"));

    let client = Client::builder()
        .config(config)
        .with_game_messages()
        .build(WebSocketConnector::new())?;

    let (replies_tx, replies_rx) = crossbeam_channel::unbounded();
    install_handlers(&client, replies_tx)?;

    client.send(&SelectGameId { game_id })?;
    client.connect().await?;

    let mut tick = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }

        let report = client.pump();
        if report.handler_failures > 0 {
            tracing::warn!(failures = report.handler_failures, "some handlers failed");
        }
        if let Some(winner) = flush_replies(&client, &replies_rx)? {
            tracing::info!(%winner, "game over");
            break;
        }
        for event in client.drain_events() {
            if let ConnectionEvent::Lost(conn_id, error) = event {
                tracing::error!(%conn_id, %error, "connection lost");
                return Err(error.into());
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
