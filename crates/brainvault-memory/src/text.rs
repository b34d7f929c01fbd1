//! Term extraction for the keyword index.
//!
//! A record is indexed under every term of its searchable text; a free-text
//! query matches a record when they share at least one term.

use std::collections::BTreeSet;

use brainvault_types::{Record, value_text};

/// Terms shorter than this never enter the index.
pub const MIN_TERM_LEN: usize = 3;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "all", "also", "and", "any", "are", "because", "been", "before",
    "being", "but", "can", "could", "did", "does", "each", "for", "from", "had", "has", "have",
    "her", "his", "how", "into", "its", "just", "more", "not", "now", "off", "only", "our",
    "out", "over", "she", "should", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "too", "use", "very", "was", "were",
    "what", "when", "where", "which", "while", "who", "why", "will", "with", "would", "you",
    "your",
];

/// Lowercased, de-duplicated significant terms of `text`.
pub fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_TERM_LEN && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Terms a record is indexed under.
pub fn record_terms(record: &Record) -> BTreeSet<String> {
    let text = match record {
        Record::Conversation(c) => format!("{} {}", c.input, c.response),
        Record::Knowledge(f) => format!("{} {}", f.key, value_text(&f.value)),
        Record::Pattern(p) => format!("{} {}", p.pattern_type, value_text(&p.pattern_data)),
        Record::Skill(s) => s.skill_name.clone(),
        Record::Mistake(m) => format!(
            "{} {} {}",
            m.mistake_type,
            m.context,
            m.solution.as_deref().unwrap_or_default()
        ),
        Record::Topic(t) => t.topic_name.clone(),
    };
    terms(&text)
}
