/// Canonical form of a field key: lowercase alphanumerics only.
///
/// `"Contact Email"`, `"contact_email"` and `"contactEmail"` all normalize
/// to `"contactemail"`, which is the equality used when matching schema
/// fields against keys found in the input.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Words of a key: split on delimiters and camelCase boundaries, lowercased.
pub fn key_tokens(key: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in key.chars() {
        if c.is_ascii_alphanumeric() {
            // camelCase boundary: uppercase following lowercase.
            if c.is_ascii_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            current.push(c.to_ascii_lowercase());
            prev_lower = c.is_ascii_lowercase();
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// snake_case form of a key.
pub fn underscore_key(key: &str) -> String {
    key_tokens(key).join("_")
}

/// Distinct lookup variants for a key, most specific first: the raw key,
/// its lowercase, collapsed, snake_case, and space-separated forms.
pub fn key_variants(key: &str) -> Vec<String> {
    let mut variants = vec![
        key.to_string(),
        key.to_lowercase(),
        normalize_key(key),
        underscore_key(key),
        key_tokens(key).join(" "),
    ];
    let mut seen = std::collections::HashSet::new();
    variants.retain(|v| !v.is_empty() && seen.insert(v.clone()));
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_styles() {
        assert_eq!(normalize_key("Contact Email"), "contactemail");
        assert_eq!(normalize_key("contact_email"), "contactemail");
        assert_eq!(normalize_key("contactEmail"), "contactemail");
    }

    #[test]
    fn tokens_split_camel_case_and_delimiters() {
        assert_eq!(key_tokens("contactEmail"), ["contact", "email"]);
        assert_eq!(key_tokens("order-total_usd"), ["order", "total", "usd"]);
    }

    #[test]
    fn variants_are_distinct_and_nonempty() {
        let variants = key_variants("contactEmail");
        assert!(variants.contains(&"contactEmail".to_string()));
        assert!(variants.contains(&"contactemail".to_string()));
        assert!(variants.contains(&"contact_email".to_string()));
        assert!(variants.contains(&"contact email".to_string()));
        let unique: std::collections::HashSet<_> = variants.iter().collect();
        assert_eq!(unique.len(), variants.len());
    }
}
