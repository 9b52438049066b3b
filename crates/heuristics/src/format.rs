use psr_domain::DetectedFormat;

/// Sniff the overall shape of the input.
///
/// JSON wins only when the whole input actually parses; HTML needs real tag
/// structure, not a stray `<`; CSV-like requires a consistent delimiter
/// count across the leading rows.
pub fn detect_format(input: &str) -> DetectedFormat {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return DetectedFormat::Text;
    }

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return DetectedFormat::Json;
    }

    if looks_like_html(trimmed) {
        return DetectedFormat::Html;
    }

    if looks_like_csv(trimmed) {
        return DetectedFormat::CsvLike;
    }

    DetectedFormat::Text
}

fn looks_like_html(input: &str) -> bool {
    let lower = input.to_lowercase();
    if lower.starts_with("<!doctype html") || lower.starts_with("<html") {
        return true;
    }
    // Require a handful of closing tags so "a < b" prose does not count.
    lower.matches("</").count() >= 2
        && ["<div", "<p>", "<span", "<td", "<li", "<body", "<table"]
            .iter()
            .any(|tag| lower.contains(tag))
}

fn looks_like_csv(input: &str) -> bool {
    let rows: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).take(5).collect();
    if rows.len() < 2 {
        return false;
    }

    for delim in [',', '\t', ';'] {
        let counts: Vec<usize> = rows.iter().map(|r| r.matches(delim).count()).collect();
        if counts[0] >= 1 && counts.iter().all(|&c| c == counts[0]) {
            return true;
        }
    }
    false
}
