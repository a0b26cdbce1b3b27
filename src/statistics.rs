use serde::Serialize;
use std::collections::BTreeMap;

use crate::plate::{DASH_LABEL, DIGITS, LETTERS};

/// Running count of every emitted label.
///
/// Owned by the caller and threaded through each generation call; there is no
/// reset, start a new accumulator instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    counts: BTreeMap<String, u64>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    /// Starts with every letter, digit and the dash at zero.
    pub fn new() -> Self {
        let mut counts = BTreeMap::new();
        for symbol in LETTERS.iter().chain(DIGITS.iter()) {
            counts.insert(symbol.to_string(), 0);
        }
        counts.insert(DASH_LABEL.to_string(), 0);
        Self { counts }
    }

    pub fn record(&mut self, label: &str) {
        *self.counts.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn merge(&mut self, other: &Statistics) {
        for (label, count) in &other.counts {
            *self.counts.entry(label.clone()).or_insert(0) += count;
        }
    }

    /// Letters, then digits, then the dash, then any other label.
    pub fn ordered(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = self
            .counts
            .iter()
            .map(|(label, count)| (label.as_str(), *count))
            .collect();
        entries.sort_by_key(|(label, _)| (display_rank(label), *label));
        entries
    }
}

fn display_rank(label: &str) -> u8 {
    let mut chars = label.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) if ch.is_ascii_uppercase() => 0,
        (Some(ch), None) if ch.is_ascii_digit() => 1,
        _ if label == DASH_LABEL => 2,
        _ => 3,
    }
}
