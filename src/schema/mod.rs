// =============================================================================
// Schema registry — compiles the canonical schemas once, validates warn-only
// =============================================================================

mod definitions;

use std::collections::HashMap;

use jsonschema::Validator;
use serde::Serialize;
use serde_json::Value;

use crate::errors::ValidationError;
use crate::types::ValidationSummary;

/// Descriptor returned by `list()` — enough for a REST client to introspect
/// the registered schemas without fetching the full JSON Schema documents.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaDescriptor {
    pub key: String,
    pub id: String,
    pub title: String,
    pub required: Vec<String>,
    pub properties: Vec<String>,
    #[serde(rename = "outboundType")]
    pub outbound_type: String,
}

struct CompiledEntry {
    descriptor: SchemaDescriptor,
    schema: Validator,
}

/// Compiled, in-memory registry of every canonical schema. Built once at
/// startup; schemas never change during a process lifetime so the leaked
/// `'static` backing values cost nothing beyond a one-time allocation.
pub struct SchemaRegistry {
    entries: HashMap<&'static str, CompiledEntry>,
}

impl SchemaRegistry {
    pub fn compile() -> Result<Self, ValidationError> {
        let mut entries = HashMap::new();

        for def in definitions::all() {
            let value: &'static Value =
                Box::leak(Box::new(serde_json::from_str(def.text).expect("embedded schema text is valid JSON")));

            let schema = jsonschema::validator_for(value).map_err(|e| ValidationError::Compile {
                key: def.key.to_string(),
                source: Box::new(e),
            })?;

            let required = value
                .get("required")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();

            let properties = value
                .get("properties")
                .and_then(Value::as_object)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();

            let descriptor = SchemaDescriptor {
                key: def.key.to_string(),
                id: value.get("$id").and_then(Value::as_str).unwrap_or(def.key).to_string(),
                title: value.get("title").and_then(Value::as_str).unwrap_or(def.key).to_string(),
                required,
                properties,
                outbound_type: def.outbound_type.to_string(),
            };

            entries.insert(def.key, CompiledEntry { descriptor, schema });
        }

        Ok(Self { entries })
    }

    pub fn list(&self) -> Vec<SchemaDescriptor> {
        let mut out: Vec<_> = self.entries.values().map(|e| e.descriptor.clone()).collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn outbound_type_for(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.descriptor.outbound_type.as_str())
    }

    /// Warn-only validation: never returns an error that should stop
    /// processing, only a pass/fail summary to tag onto the persisted record.
    pub fn validate(&self, key: &str, payload: &Value) -> ValidationSummary {
        let Some(entry) = self.entries.get(key) else {
            return ValidationSummary::fail(key, "unknown schema key");
        };

        let errors = entry.schema.iter_errors(payload);
        let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
        if reasons.is_empty() {
            ValidationSummary::pass(key)
        } else {
            ValidationSummary::fail(key, reasons.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compiles_every_canonical_schema() {
        let registry = SchemaRegistry::compile().unwrap();
        let keys: Vec<_> = registry.list().into_iter().map(|d| d.key).collect();
        assert!(keys.contains(&"gameStateUpdate".to_string()));
        assert!(keys.contains(&"newTrade".to_string()));
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn valid_payload_passes() {
        let registry = SchemaRegistry::compile().unwrap();
        let summary = registry.validate(
            "newTrade",
            &json!({
                "id": "T1", "gameId": "g1", "playerId": "p1",
                "type": "buy", "tickIndex": 3, "amount": 1.0, "qty": 2.0
            }),
        );
        assert!(summary.ok);
    }

    #[test]
    fn invalid_payload_fails_but_is_tagged_not_rejected() {
        let registry = SchemaRegistry::compile().unwrap();
        let summary = registry.validate("gameStateUpdate", &json!({"gameId": "g1"}));
        assert!(!summary.ok);
        assert_eq!(summary.schema.as_deref(), Some("gameStateUpdate"));
        assert!(summary.error.is_some());
    }

    #[test]
    fn unknown_schema_key_fails_cleanly() {
        let registry = SchemaRegistry::compile().unwrap();
        let summary = registry.validate("nonexistent", &json!({}));
        assert!(!summary.ok);
    }
}
