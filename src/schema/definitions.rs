// =============================================================================
// Canonical JSON Schemas — embedded as static text, compiled once at startup
// =============================================================================
//
// Mirrors the teacher's pattern of bundling static default data directly into
// the binary rather than reading it from disk at runtime: there is nothing to
// hot-reload here, so embedding avoids a startup-time file dependency.

pub struct SchemaDef {
    pub key: &'static str,
    pub outbound_type: &'static str,
    pub text: &'static str,
}

pub const GAME_STATE_UPDATE: &str = r#"{
  "$id": "gameStateUpdate",
  "title": "gameStateUpdate",
  "type": "object",
  "required": ["gameId", "tickCount", "price", "active"],
  "properties": {
    "gameId": { "type": "string" },
    "tickCount": { "type": "integer", "minimum": 0 },
    "price": { "type": "number" },
    "active": { "type": "boolean" },
    "rugged": { "type": "boolean" },
    "cooldownTimer": { "type": "number" },
    "allowPreRoundBuys": { "type": "boolean" },
    "gameHistory": { "type": "array" },
    "provablyFair": { "type": "object" },
    "serverSeedHash": { "type": "string" }
  }
}"#;

pub const NEW_TRADE: &str = r#"{
  "$id": "newTrade",
  "title": "newTrade",
  "type": "object",
  "required": ["id", "gameId", "playerId", "type", "tickIndex", "amount", "qty"],
  "properties": {
    "id": { "type": "string" },
    "gameId": { "type": "string" },
    "playerId": { "type": "string" },
    "type": { "type": "string", "enum": ["buy", "sell"] },
    "tickIndex": { "type": "integer", "minimum": 0 },
    "amount": { "type": "number" },
    "qty": { "type": "number" },
    "price": { "type": ["number", "null"] },
    "coin": { "type": "string" }
  }
}"#;

pub const CURRENT_SIDE_BET: &str = r#"{
  "$id": "currentSideBet",
  "title": "currentSideBet",
  "type": "object",
  "required": ["id", "gameId", "playerId", "event"],
  "properties": {
    "id": { "type": "string" },
    "gameId": { "type": "string" },
    "playerId": { "type": "string" },
    "event": { "type": "string" },
    "startTick": { "type": "integer" },
    "betAmount": { "type": "number" },
    "targetMultiplier": { "type": "number" }
  }
}"#;

pub const NEW_SIDE_BET: &str = r#"{
  "$id": "newSideBet",
  "title": "newSideBet",
  "type": "object",
  "required": ["id", "gameId", "playerId", "event"],
  "properties": {
    "id": { "type": "string" },
    "gameId": { "type": "string" },
    "playerId": { "type": "string" },
    "event": { "type": "string" },
    "endTick": { "type": "integer" },
    "payoutRatio": { "type": "number" },
    "won": { "type": "boolean" },
    "pnl": { "type": "number" }
  }
}"#;

pub const GAME_STATE_PLAYER_UPDATE: &str = r#"{
  "$id": "gameStatePlayerUpdate",
  "title": "gameStatePlayerUpdate",
  "type": "object",
  "required": ["gameId", "playerId"],
  "properties": {
    "gameId": { "type": "string" },
    "playerId": { "type": "string" }
  }
}"#;

pub const PLAYER_UPDATE: &str = r#"{
  "$id": "playerUpdate",
  "title": "playerUpdate",
  "type": "object",
  "required": ["playerId"],
  "properties": {
    "playerId": { "type": "string" }
  }
}"#;

/// All canonical schemas, keyed for lookup at registry construction.
pub fn all() -> Vec<SchemaDef> {
    vec![
        SchemaDef {
            key: "gameStateUpdate",
            outbound_type: "game_state_update",
            text: GAME_STATE_UPDATE,
        },
        SchemaDef {
            key: "newTrade",
            outbound_type: "trade",
            text: NEW_TRADE,
        },
        SchemaDef {
            key: "currentSideBet",
            outbound_type: "side_bet",
            text: CURRENT_SIDE_BET,
        },
        SchemaDef {
            key: "newSideBet",
            outbound_type: "side_bet",
            text: NEW_SIDE_BET,
        },
        SchemaDef {
            key: "gameStatePlayerUpdate",
            outbound_type: "gameStatePlayerUpdate",
            text: GAME_STATE_PLAYER_UPDATE,
        },
        SchemaDef {
            key: "playerUpdate",
            outbound_type: "playerUpdate",
            text: PLAYER_UPDATE,
        },
    ]
}
