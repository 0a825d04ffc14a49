use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Field names that have carried the chat destination across record versions, in priority order.
pub const DESTINATION_FIELDS: [&str; 3] = ["telegramChatId", "chatId", "tgChatId"];

/// One raw record from the `users` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationId(pub String);

impl DestinationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record that carries a usable destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub destination: DestinationId,
}

impl StoredRecord {
    pub fn new(id: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// First populated destination alias, checked in `DESTINATION_FIELDS` order.
    pub fn destination(&self) -> Option<DestinationId> {
        DESTINATION_FIELDS
            .iter()
            .find_map(|name| self.fields.get(*name).and_then(destination_from_value))
    }

    pub fn into_recipient(self) -> Option<Recipient> {
        let destination = self.destination()?;
        Some(Recipient {
            id: self.id,
            destination,
        })
    }
}

fn destination_from_value(value: &Value) -> Option<DestinationId> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| DestinationId(s.to_string()))
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(DestinationId(i.to_string()));
            }
            // Chat ids are integral; a float only counts if it has no fractional part.
            let f = n.as_f64()?;
            (f.is_finite() && f.fract() == 0.0).then(|| DestinationId(format!("{f:.0}")))
        }
        _ => None,
    }
}
