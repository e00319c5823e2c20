//! BibTeX-subset parser and serializer for library files.
//!
//! This is the record serialization boundary of the engine: the rest of the
//! crate only ever calls [`parse`] and [`serialize`]. The parser is a small
//! char-level scanner that understands `@type{key, field = value, ...}`
//! entries with braced, quoted, or bare values, skips `@comment` /
//! `@preamble` / `@string` blocks, and ignores free text between entries.

use tracing::debug;

use crate::bib::record::BibRecord;
use crate::errors::ParseError;

/// Parse a library file into records, in file order.
pub fn parse(text: &str) -> Result<Vec<BibRecord>, ParseError> {
    let mut cursor = Cursor::new(text);
    let mut records = Vec::new();

    while cursor.seek_entry_start() {
        let header_line = cursor.line;
        let entry_type = cursor.read_identifier();
        if entry_type.is_empty() {
            return Err(ParseError::BadEntryHeader {
                line: header_line,
                detail: "missing entry type after '@'".into(),
            });
        }
        cursor.skip_whitespace();
        if cursor.peek() != Some('{') {
            return Err(ParseError::BadEntryHeader {
                line: cursor.line,
                detail: format!("expected '{{' after '@{entry_type}'"),
            });
        }
        cursor.bump();

        // Non-record blocks are skipped wholesale by brace matching.
        let lowered = entry_type.to_lowercase();
        if matches!(lowered.as_str(), "comment" | "preamble" | "string") {
            cursor.skip_balanced(header_line, &lowered)?;
            continue;
        }

        records.push(parse_entry_body(&mut cursor, &lowered, header_line)?);
    }

    debug!(count = records.len(), "parsed library content");
    Ok(records)
}

/// Serialize records back to library-file text.
///
/// Output is deterministic: one entry per block, two-space indent, a
/// trailing comma after the last field, blank line between entries.
pub fn serialize(records: &[BibRecord]) -> String {
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push('@');
        out.push_str(record.entry_type());
        out.push('{');
        out.push_str(record.citation_key());
        out.push_str(",\n");
        for (name, value) in record.fields() {
            out.push_str("  ");
            out.push_str(name);
            out.push_str(" = {");
            out.push_str(value);
            out.push_str("},\n");
        }
        out.push_str("}\n");
    }
    out
}

fn parse_entry_body(
    cursor: &mut Cursor,
    entry_type: &str,
    start_line: usize,
) -> Result<BibRecord, ParseError> {
    cursor.skip_whitespace();

    // Citation key runs to the first ',' or '}'.
    let mut key = String::new();
    loop {
        match cursor.peek() {
            Some(',') => {
                cursor.bump();
                break;
            }
            Some('}') => {
                cursor.bump();
                return Ok(BibRecord::new(entry_type, key.trim()));
            }
            Some(c) if !c.is_whitespace() => {
                key.push(c);
                cursor.bump();
            }
            Some(_) => {
                cursor.bump();
            }
            None => {
                return Err(ParseError::UnterminatedEntry {
                    key,
                    line: start_line,
                });
            }
        }
    }

    let mut record = BibRecord::new(entry_type, key.trim());
    loop {
        cursor.skip_whitespace();
        match cursor.peek() {
            Some('}') => {
                cursor.bump();
                return Ok(record);
            }
            Some(c) if c.is_alphanumeric() || c == '_' || c == '-' => {
                let field = cursor.read_identifier();
                cursor.skip_whitespace();
                if cursor.peek() != Some('=') {
                    return Err(ParseError::UnexpectedChar {
                        found: cursor.peek().unwrap_or('\0'),
                        line: cursor.line,
                    });
                }
                cursor.bump();
                cursor.skip_whitespace();
                let value = read_value(cursor, &field)?;
                record.set_field(field, value);
                cursor.skip_whitespace();
                match cursor.peek() {
                    Some(',') => {
                        cursor.bump();
                    }
                    Some('}') => {
                        cursor.bump();
                        return Ok(record);
                    }
                    Some(other) => {
                        return Err(ParseError::UnexpectedChar {
                            found: other,
                            line: cursor.line,
                        });
                    }
                    None => {
                        return Err(ParseError::UnterminatedEntry {
                            key: record.citation_key().to_string(),
                            line: start_line,
                        });
                    }
                }
            }
            Some(other) => {
                return Err(ParseError::UnexpectedChar {
                    found: other,
                    line: cursor.line,
                });
            }
            None => {
                return Err(ParseError::UnterminatedEntry {
                    key: record.citation_key().to_string(),
                    line: start_line,
                });
            }
        }
    }
}

/// Read one field value: `{...}` with brace nesting, `"..."`, or a bare
/// token (number / macro name) running to the next ',' or '}'.
fn read_value(cursor: &mut Cursor, field: &str) -> Result<String, ParseError> {
    let value_line = cursor.line;
    match cursor.peek() {
        Some('{') => {
            cursor.bump();
            let mut depth = 1usize;
            let mut value = String::new();
            loop {
                match cursor.peek() {
                    Some('{') => {
                        depth += 1;
                        value.push('{');
                        cursor.bump();
                    }
                    Some('}') => {
                        depth -= 1;
                        cursor.bump();
                        if depth == 0 {
                            return Ok(value);
                        }
                        value.push('}');
                    }
                    Some(c) => {
                        value.push(c);
                        cursor.bump();
                    }
                    None => {
                        return Err(ParseError::UnterminatedValue {
                            field: field.to_string(),
                            line: value_line,
                        });
                    }
                }
            }
        }
        Some('"') => {
            cursor.bump();
            let mut depth = 0usize;
            let mut value = String::new();
            loop {
                match cursor.peek() {
                    Some('"') if depth == 0 => {
                        cursor.bump();
                        return Ok(value);
                    }
                    Some(c) => {
                        if c == '{' {
                            depth += 1;
                        } else if c == '}' {
                            depth = depth.saturating_sub(1);
                        }
                        value.push(c);
                        cursor.bump();
                    }
                    None => {
                        return Err(ParseError::UnterminatedValue {
                            field: field.to_string(),
                            line: value_line,
                        });
                    }
                }
            }
        }
        _ => {
            let mut value = String::new();
            loop {
                match cursor.peek() {
                    Some(',') | Some('}') => return Ok(value.trim().to_string()),
                    Some(c) => {
                        value.push(c);
                        cursor.bump();
                    }
                    None => {
                        return Err(ParseError::UnterminatedValue {
                            field: field.to_string(),
                            line: value_line,
                        });
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) {
        if let Some('\n') = self.peek() {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    /// Advance past free text until the next '@', consuming it.
    /// Returns false at end of input.
    fn seek_entry_start(&mut self) -> bool {
        loop {
            match self.peek() {
                Some('@') => {
                    self.bump();
                    return true;
                }
                Some(_) => self.bump(),
                None => return false,
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        ident
    }

    /// Consume a brace-balanced block whose opening '{' was already eaten.
    fn skip_balanced(&mut self, start_line: usize, block: &str) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            match self.peek() {
                Some('{') => {
                    depth += 1;
                    self.bump();
                }
                Some('}') => {
                    depth -= 1;
                    self.bump();
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => self.bump(),
                None => {
                    return Err(ParseError::UnterminatedEntry {
                        key: format!("@{block}"),
                        line: start_line,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_entry() {
        let records = parse(
            "@article{smith2020,\n  author = {Smith, J.},\n  year = {2020},\n}\n",
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].citation_key(), "smith2020");
        assert_eq!(records[0].entry_type(), "article");
        assert_eq!(records[0].field("author"), Some("Smith, J."));
        assert_eq!(records[0].field("year"), Some("2020"));
    }

    #[test]
    fn test_parse_nested_braces_and_quotes() {
        let records = parse(
            "@book{k, title = {The {BibTeX} Book}, publisher = \"Acme {Press}\", year = 1988 }",
        )
        .unwrap();
        assert_eq!(records[0].field("title"), Some("The {BibTeX} Book"));
        assert_eq!(records[0].field("publisher"), Some("Acme {Press}"));
        assert_eq!(records[0].field("year"), Some("1988"));
    }

    #[test]
    fn test_parse_skips_comment_and_free_text() {
        let input = "This file is managed by bibsync.\n\
                     @comment{databaseType:bibtex;}\n\
                     @article{a, author = {A}, }\n";
        let records = parse(input).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].citation_key(), "a");
    }

    #[test]
    fn test_parse_entry_without_trailing_comma() {
        let records = parse("@article{a, author = {A} }").unwrap();
        assert_eq!(records[0].field("author"), Some("A"));
    }

    #[test]
    fn test_parse_empty_entry() {
        let records = parse("@misc{only-key}").unwrap();
        assert_eq!(records[0].citation_key(), "only-key");
        assert!(records[0].fields().is_empty());
    }

    #[test]
    fn test_unterminated_value_is_error() {
        let err = parse("@article{a, author = {unclosed").unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedValue { .. }));
    }

    #[test]
    fn test_missing_brace_after_type_is_error() {
        let err = parse("@article a,").unwrap_err();
        assert!(matches!(err, ParseError::BadEntryHeader { .. }));
    }

    #[test]
    fn test_error_reports_line() {
        let err = parse("@article{a,\n  author = {A},\n  % = {b},\n}").unwrap_err();
        match err {
            ParseError::UnexpectedChar { found, line } => {
                assert_eq!(found, '%');
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_serialize_then_parse_preserves_records() {
        let records = vec![
            BibRecord::new("article", "a")
                .with_field("author", "Alice")
                .with_field("title", "Hello {World}"),
            BibRecord::new("book", "b").with_field("year", "1999"),
        ];
        let text = serialize(&records);
        let reparsed = parse(&text).unwrap();
        assert_eq!(records, reparsed);
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let records = vec![BibRecord::new("article", "a").with_field("author", "A")];
        assert_eq!(serialize(&records), serialize(&records));
        assert_eq!(
            serialize(&records),
            "@article{a,\n  author = {A},\n}\n"
        );
    }
}
