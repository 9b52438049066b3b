use crate::keys::{key_tokens, normalize_key};

/// A heading-delimited slice of the input.
#[derive(Debug, Clone)]
pub struct Section {
    /// Heading text with trailing colon stripped. Empty for the preamble
    /// before the first recognized heading.
    pub heading: String,
    pub body: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Split the input into heading-delimited sections.
///
/// Heading heuristics, in order: a short line ending in a bare colon, a
/// short ALL-CAPS line, a short Title-Case line. Content before the first
/// heading becomes a heading-less preamble section.
pub fn segment(input: &str) -> Vec<Section> {
    let lines: Vec<&str> = input.lines().collect();
    let mut sections: Vec<Section> = Vec::new();
    let mut current_heading = String::new();
    let mut current_start = 0usize;
    let mut current_body: Vec<&str> = Vec::new();

    let flush = |sections: &mut Vec<Section>, heading: &str, body: &[&str], start: usize, end: usize| {
        if heading.is_empty() && body.iter().all(|l| l.trim().is_empty()) {
            return;
        }
        sections.push(Section {
            heading: heading.to_string(),
            body: body.join("\n"),
            start_line: start,
            end_line: end,
        });
    };

    for (idx, line) in lines.iter().enumerate() {
        if let Some(heading) = heading_of(line) {
            flush(&mut sections, &current_heading, &current_body, current_start, idx);
            current_heading = heading;
            current_start = idx;
            current_body = Vec::new();
        } else {
            current_body.push(line);
        }
    }
    flush(
        &mut sections,
        &current_heading,
        &current_body,
        current_start,
        lines.len(),
    );

    sections
}

/// Return the heading text if the line reads as a section heading.
fn heading_of(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.len() > 60 {
        return None;
    }

    // "Shipping Details:" but not "Name: Jane" (value after the colon).
    if let Some(head) = trimmed.strip_suffix(':') {
        if !head.is_empty() && !head.contains(':') {
            return Some(head.trim().to_string());
        }
    }

    // A line with an interior colon is a labeled value, never a heading.
    let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 2 && !trimmed.contains(':') {
        // Short ALL-CAPS line.
        if trimmed.len() <= 40 && letters.iter().all(|c| c.is_uppercase()) {
            return Some(trimmed.to_string());
        }
        // Short Title-Case line without sentence punctuation.
        let words: Vec<&str> = trimmed.split_whitespace().collect();
        if words.len() <= 5
            && !trimmed.ends_with(['.', ',', ';', '!', '?'])
            && words.iter().all(|w| {
                w.chars()
                    .next()
                    .is_some_and(|c| c.is_uppercase() || c.is_numeric())
            })
            && letters.iter().any(|c| c.is_lowercase())
        {
            return Some(trimmed.to_string());
        }
    }

    None
}

/// Score how well a section matches the target key.
///
/// Exact normalized heading match scores 1.0, substring containment 0.8,
/// partial token overlap up to 0.6. A `key:`-labeled line inside the body
/// adds 0.7 on top.
pub fn score(section: &Section, target_key: &str) -> f64 {
    let target = normalize_key(target_key);
    let heading = normalize_key(&section.heading);

    let mut score = if !heading.is_empty() && heading == target {
        1.0
    } else if !heading.is_empty() && !target.is_empty()
        && (heading.contains(&target) || target.contains(&heading))
    {
        0.8
    } else {
        let target_tokens = key_tokens(target_key);
        if target_tokens.is_empty() {
            0.0
        } else {
            let heading_tokens = key_tokens(&section.heading);
            let overlap = target_tokens
                .iter()
                .filter(|t| heading_tokens.contains(t))
                .count();
            0.6 * overlap as f64 / target_tokens.len() as f64
        }
    };

    if labeled_line(section, &target) {
        score += 0.7;
    }
    score
}

/// Whether any body line labels a value with the target key (`key: value`,
/// `key = value`, `key - value`).
fn labeled_line(section: &Section, normalized_target: &str) -> bool {
    section.body.lines().any(|line| {
        line.split_once([':', '=', '-'])
            .map(|(label, rest)| {
                !rest.trim().is_empty() && normalize_key(label) == *normalized_target
            })
            .unwrap_or(false)
    })
}
