use regex::Regex;
use serde_json::{json, Value};

use psr_domain::{SchemaValue, ValidationType};

use crate::keys::{key_tokens, normalize_key};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decide a field's validation type from its schema descriptor, falling
/// back to field-name heuristics when the descriptor has no usable hint.
pub fn infer_validation_type(field_name: &str, schema: &SchemaValue) -> ValidationType {
    if let Some(hint) = schema.type_hint() {
        let ty = ValidationType::from(hint.to_string());
        // A hint we do not recognize still beats a name guess only when the
        // name itself says nothing.
        if !matches!(ty, ValidationType::Custom(_)) {
            return ty;
        }
        return infer_from_name(field_name).unwrap_or(ty);
    }
    infer_from_name(field_name).unwrap_or(ValidationType::String)
}

/// Whether the schema descriptor marks the field optional.
pub fn is_field_optional(schema: &SchemaValue) -> bool {
    schema.is_optional()
}

fn infer_from_name(field_name: &str) -> Option<ValidationType> {
    let normalized = normalize_key(field_name);
    let tokens = key_tokens(field_name);
    let has = |needle: &str| normalized.contains(needle);
    let has_token = |needle: &str| tokens.iter().any(|t| t == needle);

    if has("email") {
        return Some(ValidationType::Email);
    }
    if has("phone") || has("mobile") || has_token("tel") || has_token("fax") {
        return Some(ValidationType::Phone);
    }
    if has("isodate") || has("timestamp") {
        return Some(ValidationType::IsoDate);
    }
    if has("date") || has_token("dob") || has("birthday") {
        return Some(ValidationType::Date);
    }
    if has_token("url") || has_token("uri") || has("link") || has("website") {
        return Some(ValidationType::Url);
    }
    if has("currency") || has("price") || has("cost") || has_token("fee") || has("salary") {
        return Some(ValidationType::Currency);
    }
    if has("percent") || has_token("rate") {
        return Some(ValidationType::Percentage);
    }
    if has_token("is") || has_token("has") || has("enabled") || has("active") || has_token("flag") {
        return Some(ValidationType::Boolean);
    }
    if has_token("ids") || has_token("tags") || has_token("items") || has_token("list")
        || has("skills") || has("categories")
    {
        return Some(ValidationType::StringArray);
    }
    if has("count") || has_token("qty") || has("quantity") || has("total") || has("amount")
        || has_token("num") || has_token("age") || has("score")
    {
        return Some(ValidationType::Number);
    }
    if has("address") || has("street") || has_token("city") || has("location") {
        return Some(ValidationType::Address);
    }
    if has_token("name") || has("author") || has("owner") || has("contact") {
        return Some(ValidationType::Name);
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Typed matchers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All typed extraction patterns, compiled once and shared.
pub struct Matchers {
    email: Regex,
    phone: Regex,
    iso_date: Regex,
    date_numeric: Regex,
    date_written: Regex,
    url: Regex,
    number: Regex,
    boolean: Regex,
    currency: Regex,
    percentage: Regex,
    address: Regex,
    name: Regex,
    array_literal: Regex,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static matcher pattern compiles")
}

impl Default for Matchers {
    fn default() -> Self {
        Self::new()
    }
}

impl Matchers {
    pub fn new() -> Self {
        Self {
            email: re(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
            phone: re(r"\+?\d[\d\s().\-]{6,18}\d"),
            iso_date: re(
                r"\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2})?(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)?",
            ),
            date_numeric: re(r"\b\d{1,2}[/.]\d{1,2}[/.]\d{2,4}\b"),
            date_written: re(
                r"(?i)\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}\b",
            ),
            url: re(r#"(?:https?://|www\.)[^\s<>"')]+"#),
            number: re(r"-?\d{1,3}(?:,\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?"),
            boolean: re(r"(?i)\b(true|false|yes|no|enabled|disabled|on|off)\b"),
            currency: re(
                r"[$€£¥]\s?\d[\d,]*(?:\.\d{1,2})?|\d[\d,]*(?:\.\d{1,2})?\s?(?:USD|EUR|GBP|dollars?|euros?)\b",
            ),
            percentage: re(r"-?\d+(?:\.\d+)?\s?%"),
            address: re(
                r"(?i)\d+\s+[A-Za-z0-9 .'\-]+\s(?:st|street|ave|avenue|rd|road|blvd|boulevard|ln|lane|dr|drive|ct|court|way|pl|place)\b[^\n]*",
            ),
            name: re(r"\b[A-Z][a-z]+(?:\s+[A-Z][A-Za-z'.\-]+){1,3}\b"),
            array_literal: re(r"\[([^\[\]]*)\]"),
        }
    }

    /// Find the first value of the given type anywhere in `text`, returning
    /// the coerced JSON value and the type's baseline confidence.
    pub fn find(&self, ty: &ValidationType, text: &str) -> Option<(Value, f64)> {
        let confidence = ty.baseline_confidence();
        let found = match ty {
            ValidationType::Email => self.email.find(text).map(|m| json!(m.as_str())),
            ValidationType::Phone => self
                .phone
                .find(text)
                .filter(|m| digit_count(m.as_str()) >= 7)
                .map(|m| json!(m.as_str().trim())),
            ValidationType::IsoDate => self.iso_date.find(text).map(|m| json!(m.as_str())),
            ValidationType::Date => self
                .iso_date
                .find(text)
                .or_else(|| self.date_numeric.find(text))
                .or_else(|| self.date_written.find(text))
                .map(|m| json!(m.as_str())),
            ValidationType::Url => self.url.find(text).map(|m| json!(m.as_str())),
            ValidationType::Number => self
                .number
                .find(text)
                .and_then(|m| parse_number(m.as_str()))
                .map(|n| json!(n)),
            ValidationType::Boolean => self
                .boolean
                .find(text)
                .map(|m| json!(parse_boolean(m.as_str()))),
            ValidationType::Currency => self.currency.find(text).map(|m| json!(m.as_str().trim())),
            ValidationType::Percentage => self
                .percentage
                .find(text)
                .map(|m| json!(m.as_str().trim())),
            ValidationType::Address => self.address.find(text).map(|m| json!(m.as_str().trim())),
            ValidationType::Name => self.name.find(text).map(|m| json!(m.as_str())),
            ValidationType::StringArray => self.find_array(text).map(|items| json!(items)),
            ValidationType::NumberArray => self.find_array(text).map(|items| {
                json!(items
                    .iter()
                    .filter_map(|i| parse_number(i))
                    .collect::<Vec<f64>>())
            }),
            // Free-form types have no global pattern; label-based resolvers
            // handle them.
            ValidationType::String | ValidationType::Object | ValidationType::Custom(_) => None,
        };
        found.map(|v| (v, confidence))
    }

    /// Validate and coerce a candidate snippet against the expected type.
    /// Used once a resolver has already located a likely value.
    pub fn coerce(&self, ty: &ValidationType, candidate: &str) -> Option<Value> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return None;
        }
        match ty {
            ValidationType::String | ValidationType::Object | ValidationType::Custom(_) => {
                Some(json!(trimmed))
            }
            ValidationType::Name | ValidationType::Address => Some(json!(trimmed)),
            ValidationType::StringArray => Some(json!(split_list(trimmed))),
            ValidationType::NumberArray => Some(json!(split_list(trimmed)
                .iter()
                .filter_map(|i| parse_number(i))
                .collect::<Vec<f64>>())),
            ValidationType::Number => parse_number(trimmed).map(|n| json!(n)),
            ValidationType::Boolean => self
                .boolean
                .find(trimmed)
                .map(|m| json!(parse_boolean(m.as_str()))),
            _ => self.find(ty, trimmed).map(|(v, _)| v),
        }
    }

    fn find_array(&self, text: &str) -> Option<Vec<String>> {
        let inner = self.array_literal.captures(text)?.get(1)?.as_str();
        let items = split_list(inner);
        if items.is_empty() {
            None
        } else {
            Some(items)
        }
    }
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_digit()).count()
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().replace(',', "").parse::<f64>().ok()
}

fn parse_boolean(s: &str) -> bool {
    matches!(
        s.to_lowercase().as_str(),
        "true" | "yes" | "enabled" | "on"
    )
}

fn split_list(s: &str) -> Vec<String> {
    s.split([',', ';', '\n'])
        .map(|item| item.trim().trim_matches(['"', '\'']).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
