// =============================================================================
// Inbound tagged union — replaces dynamic dispatch on upstream event names
// =============================================================================
//
// Every frame read off the upstream socket carries an `event` name string.
// Rather than branching on that string at every call site, the router parses
// it once into one of these variants and everything downstream matches on
// the enum.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One event as received from the upstream feed, tagged by kind.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    GameStateUpdate(Value),
    NewTrade(Value),
    SideBetCurrent(Value),
    SideBetNew(Value),
    GameStatePlayerUpdate(Value),
    PlayerUpdate(Value),
    /// `rugPool`, `leaderboard`, or any unrecognized event name. Archived
    /// verbatim, never routed to the tracker or broadcaster.
    Other { name: String, payload: Value },
}

impl InboundEvent {
    /// Parse a raw `(eventName, payload)` pair into its tagged variant. This
    /// is the single place the event-name → kind mapping lives.
    pub fn parse(event_name: &str, payload: Value) -> Self {
        match event_name {
            "gameStateUpdate" => Self::GameStateUpdate(payload),
            "standard/newTrade" => Self::NewTrade(payload),
            "standard/sideBetPlaced" => Self::SideBetCurrent(payload),
            "sideBet" | "standard/sideBetResult" => Self::SideBetNew(payload),
            "gameStatePlayerUpdate" => Self::GameStatePlayerUpdate(payload),
            "playerUpdate" => Self::PlayerUpdate(payload),
            other => Self::Other {
                name: other.to_string(),
                payload,
            },
        }
    }

    /// The schema registry key this event validates against, or `None` for
    /// ancillary/unrecognized events that have no registered schema.
    pub fn schema_key(&self) -> Option<&'static str> {
        match self {
            Self::GameStateUpdate(_) => Some("gameStateUpdate"),
            Self::NewTrade(_) => Some("newTrade"),
            Self::SideBetCurrent(_) => Some("currentSideBet"),
            Self::SideBetNew(_) => Some("newSideBet"),
            Self::GameStatePlayerUpdate(_) => Some("gameStatePlayerUpdate"),
            Self::PlayerUpdate(_) => Some("playerUpdate"),
            Self::Other { .. } => None,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            Self::GameStateUpdate(v)
            | Self::NewTrade(v)
            | Self::SideBetCurrent(v)
            | Self::SideBetNew(v)
            | Self::GameStatePlayerUpdate(v)
            | Self::PlayerUpdate(v) => v,
            Self::Other { payload, .. } => payload,
        }
    }

    pub fn event_name(&self) -> &str {
        match self {
            Self::GameStateUpdate(_) => "gameStateUpdate",
            Self::NewTrade(_) => "standard/newTrade",
            Self::SideBetCurrent(_) => "standard/sideBetPlaced",
            Self::SideBetNew(_) => "sideBet",
            Self::GameStatePlayerUpdate(_) => "gameStatePlayerUpdate",
            Self::PlayerUpdate(_) => "playerUpdate",
            Self::Other { name, .. } => name,
        }
    }
}

/// A raw frame as handed from the upstream consumer to the router queue.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub event_name: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_known_event_names_to_variants() {
        let ev = InboundEvent::parse("gameStateUpdate", json!({}));
        assert!(matches!(ev, InboundEvent::GameStateUpdate(_)));
        assert_eq!(ev.schema_key(), Some("gameStateUpdate"));

        let ev = InboundEvent::parse("standard/sideBetResult", json!({}));
        assert!(matches!(ev, InboundEvent::SideBetNew(_)));
        assert_eq!(ev.schema_key(), Some("newSideBet"));

        let ev = InboundEvent::parse("sideBet", json!({}));
        assert!(matches!(ev, InboundEvent::SideBetNew(_)));
    }

    #[test]
    fn unrecognized_events_become_other_with_no_schema() {
        let ev = InboundEvent::parse("rugPool", json!({"a": 1}));
        assert!(matches!(ev, InboundEvent::Other { .. }));
        assert_eq!(ev.schema_key(), None);
        assert_eq!(ev.event_name(), "rugPool");
    }
}
