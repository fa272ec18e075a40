//! ---
//! ingest_section: "02-envelope-data-model"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Envelope model and normalization helpers."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Open bag of source-specific attributes not promoted to canonical fields.
pub type Extension = Map<String, JsonValue>;

/// Names of the canonical envelope fields, in resolution order.
pub const CANONICAL_FIELDS: [&str; 3] = ["id", "name", "email"];

/// Invariant violations detected on an envelope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The identifier is empty or whitespace only.
    #[error("envelope id must not be blank")]
    BlankId,
}

/// Normalized record shape carried from producers to the queue.
///
/// Absent canonical fields are `None` and are omitted from the serialized form; an empty
/// string is never used to signal absence. `extension` distinguishes "no extra data"
/// (`None`) from an empty bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier of the entity within its producer's namespace.
    pub id: String,
    /// Display name of the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Contact email of the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Source-specific attributes. Canonical fields take precedence over same-named entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<Extension>,
}

impl Envelope {
    /// Construct an envelope carrying only an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, EnvelopeError> {
        let envelope = Self {
            id: id.into(),
            name: None,
            email: None,
            extension: None,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Attach a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a contact email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Attach an extension entry, creating the bag on first use.
    pub fn with_extension(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.insert_extension(key, value);
        self
    }

    /// Insert an extension entry and return the previous value under that key.
    ///
    /// A key equal to a canonical field name is stored but never shadows the canonical
    /// value when resolved through [`Envelope::field`].
    pub fn insert_extension(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.extension
            .get_or_insert_with(Extension::new)
            .insert(key.into(), value)
    }

    /// Check the envelope invariants. Struct literals bypass [`Envelope::new`], so the
    /// publisher re-validates every envelope before sending it.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.id.trim().is_empty() {
            return Err(EnvelopeError::BlankId);
        }
        Ok(())
    }

    /// Resolve a field by name, consulting canonical fields before the extension bag.
    pub fn field(&self, name: &str) -> Option<JsonValue> {
        let canonical = match name {
            "id" => Some(self.id.clone()),
            "name" => self.name.clone(),
            "email" => self.email.clone(),
            _ => None,
        };
        if let Some(value) = canonical {
            return Some(JsonValue::String(value));
        }
        self.extension
            .as_ref()
            .and_then(|extension| extension.get(name))
            .cloned()
    }

    /// Key downstream consumers can use to deduplicate at-least-once deliveries.
    pub fn idempotency_key(&self, source_name: &str) -> String {
        format!("{}:{}", source_name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_ids_are_rejected() {
        assert_eq!(Envelope::new("").unwrap_err(), EnvelopeError::BlankId);
        assert_eq!(Envelope::new("   ").unwrap_err(), EnvelopeError::BlankId);
        let literal = Envelope {
            id: "\t".into(),
            name: None,
            email: None,
            extension: None,
        };
        assert!(literal.validate().is_err());
    }

    #[test]
    fn absent_fields_are_omitted_when_serialized() {
        let envelope = Envelope::new("42").unwrap().with_name("Customer 42");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value, json!({ "id": "42", "name": "Customer 42" }));
    }

    #[test]
    fn canonical_fields_win_over_extension_entries() {
        let envelope = Envelope::new("7")
            .unwrap()
            .with_email("customer7@example.com")
            .with_extension("email", json!("shadow@example.com"))
            .with_extension("phone", json!("078807"));
        assert_eq!(
            envelope.field("email"),
            Some(json!("customer7@example.com"))
        );
        assert_eq!(envelope.field("phone"), Some(json!("078807")));
        assert_eq!(envelope.field("name"), None);
    }

    #[test]
    fn extension_absent_differs_from_empty() {
        let absent = Envelope::new("1").unwrap();
        let mut empty = absent.clone();
        empty.extension = Some(Extension::new());
        assert_ne!(absent, empty);
        assert!(serde_json::to_value(&empty).unwrap().get("extension").is_some());
    }

    #[test]
    fn idempotency_key_combines_source_and_id() {
        let envelope = Envelope::new("9").unwrap();
        assert_eq!(envelope.idempotency_key("crm-customers"), "crm-customers:9");
    }
}
