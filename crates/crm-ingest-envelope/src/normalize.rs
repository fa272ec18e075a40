//! ---
//! ingest_section: "02-envelope-data-model"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Envelope model and normalization helpers."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use crm_ingest_common::FieldMappingConfig;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::trace;

use crate::envelope::{Envelope, Extension};

/// Record as returned by an external system. Its shape is owned by the source.
pub type RawRecord = JsonValue;

/// Reasons a single raw record cannot become an envelope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// The record is not a JSON object.
    #[error("record is not an object (found {found})")]
    NotAnObject {
        /// JSON type that was found instead.
        found: &'static str,
    },
    /// The identifier field is missing, null, or blank.
    #[error("record has no usable '{field}' identifier")]
    MissingId {
        /// Raw field that was expected to carry the identifier.
        field: String,
    },
    /// The identifier field holds a value that cannot be rendered as an id.
    #[error("record identifier '{field}' has unsupported type {found}")]
    InvalidId {
        /// Raw field carrying the identifier.
        field: String,
        /// JSON type that was found.
        found: &'static str,
    },
}

/// Maps raw field names onto canonical envelope fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Raw field holding the identifier.
    pub id: String,
    /// Raw field holding the display name.
    pub name: String,
    /// Raw field holding the contact email.
    pub email: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::from(&FieldMappingConfig::default())
    }
}

impl From<&FieldMappingConfig> for FieldMapping {
    fn from(config: &FieldMappingConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            email: config.email.clone(),
        }
    }
}

impl FieldMapping {
    /// Normalize one raw record.
    ///
    /// Canonical string values are promoted; missing or `null` canonical values stay
    /// absent; canonical values of any other type are kept verbatim in the extension bag.
    /// Every unmapped field lands in the extension bag, which stays `None` when empty.
    pub fn normalize(&self, record: &RawRecord) -> Result<Envelope, NormalizeError> {
        let Some(object) = record.as_object() else {
            return Err(NormalizeError::NotAnObject {
                found: json_kind(record),
            });
        };

        let id = match object.get(&self.id) {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(value)) => Some(value.clone()),
            Some(JsonValue::Number(value)) => Some(value.to_string()),
            Some(other) => {
                return Err(NormalizeError::InvalidId {
                    field: self.id.clone(),
                    found: json_kind(other),
                })
            }
        };
        let id = id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| NormalizeError::MissingId {
                field: self.id.clone(),
            })?;

        let mut envelope = Envelope {
            id,
            name: None,
            email: None,
            extension: None,
        };
        let mut extension = Extension::new();

        for (key, value) in object {
            if key == &self.id {
                continue;
            }
            if key == &self.name || key == &self.email {
                match value {
                    JsonValue::Null => {}
                    JsonValue::String(text) if key == &self.name => {
                        envelope.name = Some(text.clone());
                    }
                    JsonValue::String(text) => {
                        envelope.email = Some(text.clone());
                    }
                    other => {
                        trace!(field = %key, kind = json_kind(other), "non-string canonical value kept in extension");
                        extension.insert(key.clone(), other.clone());
                    }
                }
                continue;
            }
            extension.insert(key.clone(), value.clone());
        }

        if !extension.is_empty() {
            envelope.extension = Some(extension);
        }
        Ok(envelope)
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
