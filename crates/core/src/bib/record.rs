//! In-memory model of bibliographic records and the live database.

use serde::{Deserialize, Serialize};

/// Pseudo-field name under which entry-type changes travel through the
/// field-patch and conflict machinery.
pub const ENTRY_TYPE_FIELD: &str = "entrytype";

/// A single bibliographic record: citation key, entry type, and an ordered
/// field map.
///
/// Field order is preserved for serialization, but equality ignores it.
/// Field names and the entry type are stored lowercased; field values are
/// normalized to `\n` line endings so that CRLF-only differences never
/// register as edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BibRecord {
    citation_key: String,
    entry_type: String,
    fields: Vec<(String, String)>,
}

impl BibRecord {
    pub fn new(entry_type: impl Into<String>, citation_key: impl Into<String>) -> Self {
        Self {
            citation_key: citation_key.into(),
            entry_type: entry_type.into().to_lowercase(),
            fields: Vec::new(),
        }
    }

    pub fn citation_key(&self) -> &str {
        &self.citation_key
    }

    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    pub fn set_entry_type(&mut self, entry_type: impl Into<String>) {
        self.entry_type = entry_type.into().to_lowercase();
    }

    /// Look up a field value by (case-insensitive) name.
    pub fn field(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set or overwrite a field, keeping its position if it already exists.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        let value = normalize_line_endings(&value.into());
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field if present.
    pub fn clear_field(&mut self, name: &str) {
        let name = name.to_lowercase();
        self.fields.retain(|(n, _)| *n != name);
    }

    /// Fields in serialization order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Builder-style helper, mostly for tests and fixtures.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }
}

impl PartialEq for BibRecord {
    /// Order-insensitive: two records are equal when the key, the type, and
    /// the field *sets* match, regardless of field order.
    fn eq(&self, other: &Self) -> bool {
        if self.citation_key != other.citation_key
            || self.entry_type != other.entry_type
            || self.fields.len() != other.fields.len()
        {
            return false;
        }
        self.fields
            .iter()
            .all(|(n, v)| other.field(n) == Some(v.as_str()))
    }
}

impl Eq for BibRecord {}

fn normalize_line_endings(value: &str) -> String {
    if value.contains('\r') {
        value.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        value.to_string()
    }
}

/// The live, mutable database a merge is applied to.
///
/// Owned by the caller of the engine; the applier mutates it in place.
/// Record order is preserved so a merge does not reorder the library file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BibDatabase {
    records: Vec<BibRecord>,
}

impl BibDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<BibRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[BibRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, citation_key: &str) -> Option<&BibRecord> {
        self.records.iter().find(|r| r.citation_key() == citation_key)
    }

    pub fn get_mut(&mut self, citation_key: &str) -> Option<&mut BibRecord> {
        self.records
            .iter_mut()
            .find(|r| r.citation_key() == citation_key)
    }

    pub fn insert(&mut self, record: BibRecord) {
        self.records.push(record);
    }

    /// Remove a record by key, returning it if it was present.
    pub fn remove(&mut self, citation_key: &str) -> Option<BibRecord> {
        let idx = self
            .records
            .iter()
            .position(|r| r.citation_key() == citation_key)?;
        Some(self.records.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_order_ignored_in_equality() {
        let a = BibRecord::new("article", "a")
            .with_field("title", "Hello")
            .with_field("author", "Alice");
        let b = BibRecord::new("article", "a")
            .with_field("author", "Alice")
            .with_field("title", "Hello");
        assert_eq!(a, b);
    }

    #[test]
    fn test_entry_type_case_insensitive() {
        let a = BibRecord::new("Article", "a");
        let b = BibRecord::new("article", "a");
        assert_eq!(a, b);
    }

    #[test]
    fn test_line_endings_normalized() {
        let a = BibRecord::new("article", "a").with_field("comment", "line1\r\n\r\nline3");
        let b = BibRecord::new("article", "a").with_field("comment", "line1\n\nline3");
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_field_keeps_position() {
        let mut rec = BibRecord::new("article", "a")
            .with_field("author", "A")
            .with_field("year", "2020");
        rec.set_field("Author", "B");
        assert_eq!(rec.fields()[0], ("author".to_string(), "B".to_string()));
        assert_eq!(rec.field("author"), Some("B"));
    }

    #[test]
    fn test_database_lookup_and_remove() {
        let mut db = BibDatabase::from_records(vec![
            BibRecord::new("article", "k1").with_field("year", "2020"),
            BibRecord::new("book", "k2"),
        ]);
        assert!(db.get("k1").is_some());
        assert!(db.remove("k1").is_some());
        assert!(db.get("k1").is_none());
        assert!(db.remove("k1").is_none());
        assert_eq!(db.len(), 1);
    }
}
