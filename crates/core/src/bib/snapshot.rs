//! Immutable parsed state of the database at one specific commit.

use std::collections::BTreeMap;

use tracing::warn;

use crate::bib::codec;
use crate::bib::record::BibRecord;
use crate::errors::ParseError;

/// The database as it existed at one revision, keyed by citation key.
///
/// Built fresh per merge attempt and never mutated after parse. Content that
/// did not exist at the revision (`None`) parses to an empty snapshot.
#[derive(Debug, Clone, Default)]
pub struct DatabaseSnapshot {
    records: BTreeMap<String, BibRecord>,
}

impl DatabaseSnapshot {
    /// Parse retrieved file content into a snapshot.
    ///
    /// Records without a citation key cannot participate in a key-joined
    /// merge and are skipped. Duplicate keys keep the last occurrence.
    /// Malformed content aborts the merge; a corrupt base or remote makes
    /// safe planning impossible.
    pub fn parse(content: Option<&str>) -> Result<Self, ParseError> {
        let Some(content) = content else {
            return Ok(Self::default());
        };
        let mut records = BTreeMap::new();
        for record in codec::parse(content)? {
            if record.citation_key().is_empty() {
                warn!(
                    entry_type = record.entry_type(),
                    "skipping entry without citation key"
                );
                continue;
            }
            let key = record.citation_key().to_string();
            if records.insert(key.clone(), record).is_some() {
                warn!(citation_key = %key, "duplicate citation key, keeping last occurrence");
            }
        }
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<BibRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.citation_key().to_string(), r))
                .collect(),
        }
    }

    pub fn get(&self, citation_key: &str) -> Option<&BibRecord> {
        self.records.get(citation_key)
    }

    pub fn contains(&self, citation_key: &str) -> bool {
        self.records.contains_key(citation_key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
