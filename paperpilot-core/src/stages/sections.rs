//! Labeled-section parsing for model responses.
//!
//! The stages ask the model for plain text under uppercase labels such as
//! `SUMMARY:` or `THEMES:`. Responses are parsed with a line accumulator:
//! a line starting with a known label opens that section, and following
//! non-empty lines belong to it until the next label. Lines before the
//! first label are ignored. Any section may be missing; callers decide
//! the fallback.

use std::collections::HashMap;

/// Split a response into sections keyed by lowercase label name.
/// Each section holds its trimmed, non-empty lines in order, with the
/// remainder of the label line itself first when non-empty.
pub fn parse_sections(response: &str, labels: &[&str]) -> HashMap<String, Vec<String>> {
    let mut sections: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<String> = None;

    for raw in response.lines() {
        let line = raw.trim();
        if let Some(label) = labels.iter().find(|l| line.starts_with(&format!("{l}:"))) {
            let key = label.to_lowercase();
            let rest = line[label.len() + 1..].trim();
            let entry = sections.entry(key.clone()).or_default();
            if !rest.is_empty() {
                entry.push(rest.to_string());
            }
            current = Some(key);
        } else if !line.is_empty()
            && let Some(key) = &current
        {
            sections
                .entry(key.clone())
                .or_default()
                .push(line.to_string());
        }
    }
    sections
}

/// Section lines flattened into one string, space-joined.
pub fn joined(sections: &HashMap<String, Vec<String>>, key: &str) -> Option<String> {
    sections
        .get(key)
        .filter(|lines| !lines.is_empty())
        .map(|lines| lines.join(" "))
}

/// Bullet items (`-` or `*`) from a section, with markers stripped.
/// Non-bullet lines in the section are ignored.
pub fn list_items(sections: &HashMap<String, Vec<String>>, key: &str) -> Vec<String> {
    sections
        .get(key)
        .map(|lines| {
            lines
                .iter()
                .filter(|l| l.starts_with('-') || l.starts_with('*'))
                .map(|l| l.trim_start_matches(['-', '*', ' ']).to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: &[&str] = &["SUMMARY", "KEY_FINDINGS", "THEMES"];

    #[test]
    fn splits_sections_by_label() {
        let response = "preamble to ignore\n\
            SUMMARY: A concise overview.\n\
            continued on the next line.\n\
            \n\
            KEY_FINDINGS:\n\
            - first finding\n\
            - second finding\n";
        let sections = parse_sections(response, LABELS);
        assert_eq!(
            joined(&sections, "summary").as_deref(),
            Some("A concise overview. continued on the next line.")
        );
        assert_eq!(
            list_items(&sections, "key_findings"),
            vec!["first finding", "second finding"]
        );
    }

    #[test]
    fn missing_sections_yield_none_and_empty() {
        let sections = parse_sections("SUMMARY: only this", LABELS);
        assert_eq!(joined(&sections, "themes"), None);
        assert!(list_items(&sections, "themes").is_empty());
    }

    #[test]
    fn unlabeled_response_parses_to_nothing() {
        let sections = parse_sections("free-form prose with no labels", LABELS);
        assert!(sections.is_empty());
    }

    #[test]
    fn star_bullets_and_blank_items_are_handled() {
        let response = "THEMES:\n* alpha\n-\n- beta\nnot a bullet\n";
        let sections = parse_sections(response, LABELS);
        assert_eq!(list_items(&sections, "themes"), vec!["alpha", "beta"]);
    }
}
