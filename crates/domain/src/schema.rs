use serde_json::Value;

/// Classified form of one output-schema descriptor.
///
/// Callers hand the kernel a heterogeneous schema: a bare type-hint string,
/// a descriptor object, or an arbitrary object we keep as opaque metadata.
/// All downstream code works against this classification instead of poking
/// at raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaValue {
    /// `"email"`, `"string"`, ...
    TypeHint(String),
    /// `{ "type": "phone", "optional": true, "description": "..." }`
    Descriptor {
        type_hint: Option<String>,
        optional: bool,
        description: Option<String>,
    },
    /// Anything else. Treated as metadata; the field falls back to name
    /// heuristics for its validation type.
    Opaque(Value),
}

impl SchemaValue {
    pub fn classify(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::TypeHint(s.clone()),
            Value::Object(map) => {
                let has_descriptor_keys = map.contains_key("type")
                    || map.contains_key("optional")
                    || map.contains_key("description");
                if !has_descriptor_keys {
                    return Self::Opaque(value.clone());
                }
                Self::Descriptor {
                    type_hint: map.get("type").and_then(Value::as_str).map(str::to_string),
                    optional: map
                        .get("optional")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    description: map
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }
            }
            other => Self::Opaque(other.clone()),
        }
    }

    /// The explicit type hint, if the descriptor carries one.
    pub fn type_hint(&self) -> Option<&str> {
        match self {
            Self::TypeHint(s) => Some(s.as_str()),
            Self::Descriptor { type_hint, .. } => type_hint.as_deref(),
            Self::Opaque(_) => None,
        }
    }

    /// Whether the descriptor explicitly marks the field optional.
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Descriptor { optional: true, .. })
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Descriptor { description, .. } => description.as_deref(),
            _ => None,
        }
    }
}
