// =============================================================================
// Outbound tagged union — frames published to `/api/ws/stream` subscribers
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Price, ValidationSummary};

/// Envelope wrapper every data-carrying outbound frame shares: a fixed
/// `schema: "v1"` discriminant plus the type tag, so subscribers can version
/// the wire format independently of the frame shape evolving.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    #[serde(rename = "hello")]
    Hello { ts: DateTime<Utc> },

    #[serde(rename = "heartbeat")]
    Heartbeat { ts: DateTime<Utc> },

    #[serde(rename = "game_state_update")]
    GameStateUpdate {
        schema: &'static str,
        #[serde(rename = "gameId")]
        game_id: String,
        tick: u64,
        price: Price,
        phase: String,
        validation: ValidationSummary,
        ts: DateTime<Utc>,
    },

    #[serde(rename = "trade")]
    Trade {
        schema: &'static str,
        #[serde(rename = "gameId")]
        game_id: String,
        #[serde(rename = "playerId")]
        player_id: String,
        #[serde(rename = "tradeType")]
        trade_type: String,
        #[serde(rename = "tickIndex")]
        tick_index: u64,
        amount: Price,
        qty: Price,
        #[serde(skip_serializing_if = "Option::is_none")]
        price: Option<Price>,
        validation: ValidationSummary,
        ts: DateTime<Utc>,
    },

    #[serde(rename = "side_bet")]
    SideBet {
        schema: &'static str,
        event: String,
        #[serde(rename = "gameId")]
        game_id: String,
        #[serde(rename = "playerId")]
        player_id: String,
        validation: ValidationSummary,
        ts: DateTime<Utc>,
    },

    #[serde(rename = "god_candle")]
    GodCandle {
        schema: &'static str,
        #[serde(rename = "gameId")]
        game_id: String,
        tick: u64,
        #[serde(rename = "fromPrice")]
        from_price: Price,
        #[serde(rename = "toPrice")]
        to_price: Price,
        ratio: Price,
        ts: DateTime<Utc>,
    },

    #[serde(rename = "rug")]
    Rug {
        schema: &'static str,
        #[serde(rename = "gameId")]
        game_id: String,
        tick: u64,
        #[serde(rename = "endPrice")]
        end_price: Price,
        ts: DateTime<Utc>,
    },
}

pub const SCHEMA_V1: &str = "v1";

impl OutboundFrame {
    pub fn hello() -> Self {
        Self::Hello { ts: Utc::now() }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat { ts: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rug_frame_serializes_with_type_tag_and_schema() {
        let frame = OutboundFrame::Rug {
            schema: SCHEMA_V1,
            game_id: "g1".to_string(),
            tick: 42,
            end_price: "1.5".parse().unwrap(),
            ts: Utc::now(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "rug");
        assert_eq!(json["gameId"], "g1");
        assert_eq!(json["schema"], "v1");
    }

    #[test]
    fn hello_and_heartbeat_carry_no_payload_beyond_ts() {
        let hello = serde_json::to_value(OutboundFrame::hello()).unwrap();
        assert_eq!(hello["type"], "hello");
        assert!(hello.get("ts").is_some());
    }
}
