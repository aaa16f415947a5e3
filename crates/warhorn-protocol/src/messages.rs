//! The game protocol: every message kind the client exchanges with the
//! game server, and the wire key each one travels under.
//!
//! Payload field names are camelCase on the wire (`gameId`, not
//! `game_id`), which is what `#[serde(rename_all = "camelCase")]` gives us.
//!
//! Direction matters: some kinds only go client → server (sendable), some
//! only server → client (receivable), and `giveSupport` goes both ways.
//! [`register_game_messages`] registers the whole catalog with the right
//! direction(s).
//!
//! The wire keys are fixed. Most payload fields beyond the ones the keys
//! imply (order tokens, battle strengths, turn order, the raven swap) are
//! provisional and may have to change to match the server.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Registrar;

/// Wire keys of the game protocol.
pub mod keys {
    use crate::WireKey;

    pub const ERROR: WireKey = "error";
    pub const PLAYER_STATUS: WireKey = "playerStatus";
    pub const LOBBY_JOINED: WireKey = "lobbyJoined";
    pub const SELECT_GAME_ID: WireKey = "selectGameId";
    pub const READY: WireKey = "ready";
    pub const START_GAME: WireKey = "startGame";
    pub const SUPPORT_REQUEST: WireKey = "supportRequest";
    pub const ORDER_REQUEST: WireKey = "orderRequest";
    pub const ORDERS_RECEIVED: WireKey = "ordersReceived";
    pub const ORDERS_CONFIRMATION: WireKey = "ordersConfirmation";
    pub const BATTLE_RESULTS: WireKey = "battleResults";
    pub const WINNER: WireKey = "winner";
    pub const SUBMIT_ORDERS: WireKey = "submitOrders";
    pub const GIVE_SUPPORT: WireKey = "giveSupport";
    pub const WINTER_VOTE: WireKey = "winterVote";
    pub const SWORD_MSG: WireKey = "swordMsg";
    // Does not follow the struct-name pattern of its siblings
    // (`RavenMessage` → "raven"). Kept as the server sends it.
    pub const RAVEN: WireKey = "raven";
}

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A player as the server names them (their house colour, e.g. `"red"`).
///
/// `#[serde(transparent)]` keeps it a bare string on the wire.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A lobby / game instance on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// The kind of order token placed on a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderKind {
    March,
    Defend,
    Support,
    Raid,
    ConsolidatePower,
}

/// One order token on one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Region the token is placed on.
    pub region: String,
    /// `"type"` on the wire.
    #[serde(rename = "type")]
    pub kind: OrderKind,
    /// Starred (upgraded) order. Absent on the wire means `false`.
    #[serde(default)]
    pub star: bool,
}

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

/// Server → client: something the client did was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub message: String,
}

/// One row of [`PlayerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub player_id: PlayerId,
    #[serde(default)]
    pub ready: bool,
}

/// Server → client: who is in the lobby and whether they are ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub players: Vec<PlayerInfo>,
}

/// Server → client: the lobby join succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyJoined {
    pub game_id: GameId,
    pub player_id: PlayerId,
}

/// Client → server: join (or create) the lobby with this ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectGameId {
    pub game_id: GameId,
}

/// Client → server: this player is ready to start. Empty payload (`{}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {}

/// Server → client: the game begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGame {
    /// The house this client plays.
    pub player_id: PlayerId,
    /// Turn order for the first round.
    pub turn_order: Vec<PlayerId>,
}

// ---------------------------------------------------------------------------
// Planning and action phases
// ---------------------------------------------------------------------------

/// Server → client: place your orders now. Empty payload (`{}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {}

/// Client → server: the orders for this round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrders {
    pub orders: Vec<Order>,
}

/// Server → client: whether submitted orders were accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersConfirmation {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Server → client: every player's revealed orders.
///
/// The payload *is* the map (`{"red": [...], "blue": [...]}`), so the
/// struct is transparent over it. `BTreeMap` keeps iteration stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrdersReceived(pub BTreeMap<PlayerId, Vec<Order>>);

/// Client → server: play the Raven token to swap one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RavenMessage {
    /// Region whose order is replaced, if the player chose to swap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// The new order placed there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_order: Option<OrderKind>,
}

// ---------------------------------------------------------------------------
// Combat
// ---------------------------------------------------------------------------

/// Server → client: a battle needs this player's support decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportRequest {
    pub region: String,
    pub attacker: PlayerId,
    pub defender: PlayerId,
}

/// Both directions: which side a supporting player backs.
///
/// The client sends its own choice; the server echoes every player's choice
/// back under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiveSupport {
    pub region: String,
    /// The supporting player.
    pub player_id: PlayerId,
    /// The side supported, or `None` to stay out of the battle.
    #[serde(default)]
    pub supports: Option<PlayerId>,
}

/// Client → server: whether to spend the Valyrian Steel Blade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwordMsg {
    pub use_sword: bool,
}

/// Server → client: outcome of one battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleResults {
    pub region: String,
    pub attacker: PlayerId,
    pub defender: PlayerId,
    pub attacker_strength: u32,
    pub defender_strength: u32,
    pub winner: PlayerId,
}

// ---------------------------------------------------------------------------
// Westeros phase and end of game
// ---------------------------------------------------------------------------

/// Client → server: vote on the Westeros card choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinterVote {
    pub choice: String,
}

/// Server → client: the game is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub winner: PlayerId,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Registers every game message kind on `registrar` in its direction(s).
///
/// # Panics
/// If any of these types or keys were already registered on `registrar`.
#[track_caller]
pub fn register_game_messages<R: Registrar>(registrar: &mut R) {
    // Client → server
    registrar.sendable::<SelectGameId>(keys::SELECT_GAME_ID);
    registrar.sendable::<Ready>(keys::READY);
    registrar.sendable::<SubmitOrders>(keys::SUBMIT_ORDERS);
    registrar.sendable::<GiveSupport>(keys::GIVE_SUPPORT);
    registrar.sendable::<WinterVote>(keys::WINTER_VOTE);
    registrar.sendable::<SwordMsg>(keys::SWORD_MSG);
    registrar.sendable::<RavenMessage>(keys::RAVEN);

    // Server → client
    registrar.receivable::<ServerError>(keys::ERROR);
    registrar.receivable::<PlayerStatus>(keys::PLAYER_STATUS);
    registrar.receivable::<LobbyJoined>(keys::LOBBY_JOINED);
    registrar.receivable::<StartGame>(keys::START_GAME);
    registrar.receivable::<SupportRequest>(keys::SUPPORT_REQUEST);
    registrar.receivable::<OrderRequest>(keys::ORDER_REQUEST);
    registrar.receivable::<OrdersReceived>(keys::ORDERS_RECEIVED);
    registrar.receivable::<OrdersConfirmation>(keys::ORDERS_CONFIRMATION);
    registrar.receivable::<BattleResults>(keys::BATTLE_RESULTS);
    registrar.receivable::<GiveSupport>(keys::GIVE_SUPPORT);
    registrar.receivable::<Winner>(keys::WINNER);
}
