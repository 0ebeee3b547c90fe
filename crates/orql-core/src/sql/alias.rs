//! Table alias generation.
//!
//! Every table group gets an [`AliasBase`] from the statement's
//! [`AliasGenerator`]; each table reference in the group takes the next alias
//! from its base. Aliases look like `{stem}{n}_{i}`: the stem is letters only,
//! `n` is a per-stem counter for the statement and `i` is the position within
//! the group. Because stems never contain digits the three parts are always
//! recoverable, so aliases are unique per statement regardless of stem
//! collisions.

use std::collections::HashMap;

/// Derive an alias stem from a navigable or table name.
///
/// Takes the last dotted segment, keeps ASCII letters, lowercases. Stems longer
/// than `max_length` are truncated and suffixed with two hash-derived letters so
/// that distinct long names rarely share a stem.
pub fn alias_stem(name: &str, max_length: usize) -> String {
    let short = name.rsplit('.').next().unwrap_or(name);
    let letters: String = short
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if letters.is_empty() {
        return "t".to_string();
    }
    let max_length = max_length.max(3);
    if letters.len() <= max_length {
        return letters;
    }
    let hash = blake3::hash(short.as_bytes());
    let suffix: String = hash.as_bytes()[..2]
        .iter()
        .map(|b| char::from(b'a' + b % 26))
        .collect();
    format!("{}{}", &letters[..max_length - 2], suffix)
}

/// Statement-wide alias allocator, shared with subqueries.
#[derive(Debug)]
pub struct AliasGenerator {
    max_stem_length: usize,
    counters: HashMap<String, u32>,
}

impl AliasGenerator {
    /// Create a generator.
    pub fn new(max_stem_length: usize) -> Self {
        Self {
            max_stem_length,
            counters: HashMap::new(),
        }
    }

    /// Allocate an alias base for a table group named `name`.
    pub fn allocate_base(&mut self, name: &str) -> AliasBase {
        let stem = alias_stem(name, self.max_stem_length);
        let counter = self.counters.entry(stem.clone()).or_insert(0);
        *counter += 1;
        AliasBase {
            stem,
            group: *counter,
            next: 0,
        }
    }
}

/// Alias source for the table references of one table group.
#[derive(Debug, Clone)]
pub struct AliasBase {
    stem: String,
    group: u32,
    next: u32,
}

impl AliasBase {
    /// Next alias for a table reference in this group.
    pub fn next_alias(&mut self) -> String {
        let alias = format!("{}{}_{}", self.stem, self.group, self.next);
        self.next += 1;
        alias
    }

    /// The stem shared by this base's aliases.
    pub fn stem(&self) -> &str {
        &self.stem
    }
}
