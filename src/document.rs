//! Weighted search documents and the builder that folds a dialog's content
//! fragments into one.
//!
//! A [`SearchDocument`] is an ordered list of lexeme occurrences, each with a
//! 1-based position and a [`WeightClass`]. Its canonical text form groups
//! occurrences by lexeme:
//!
//! ```text
//! hello:1A,4C world:2A
//! ```
//!
//! The builder groups fragments by language, tokenizes each with the
//! language's profile and stops accepting lexemes once either the term
//! ceiling or the byte ceiling is reached. Both ceilings belong to the
//! builder, and fragments arrive in a fixed order, so the same dialog always
//! truncates to the same document.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;

use crate::analyzer::{self, normalize_tag};
use crate::error::{BuildError, ReindexError, Result};
use crate::models::{ContentFragment, DialogId, WeightClass};
use crate::projection::ContentSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub lexeme: String,
    pub position: u32,
    pub weight: WeightClass,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchDocument {
    terms: Vec<Term>,
}

impl SearchDocument {
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn contains(&self, lexeme: &str) -> bool {
        self.terms.iter().any(|t| t.lexeme == lexeme)
    }

    /// True when every lexeme of `query` occurs in the document.
    pub fn matches(&self, query: &str) -> bool {
        let mut lexemes = analyzer::SIMPLE.tokenize(query).peekable();
        if lexemes.peek().is_none() {
            return false;
        }
        lexemes.all(|lexeme| self.contains(&lexeme))
    }

    /// Space-separated lexemes of one weight class, in position order.
    pub fn column_text(&self, weight: WeightClass) -> String {
        self.terms
            .iter()
            .filter(|t| t.weight == weight)
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for SearchDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut grouped: BTreeMap<&str, Vec<&Term>> = BTreeMap::new();
        for term in &self.terms {
            grouped.entry(term.lexeme.as_str()).or_default().push(term);
        }

        for (i, (lexeme, occurrences)) in grouped.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}:", lexeme)?;
            for (j, term) in occurrences.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}{}", term.position, term.weight.as_char())?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDocumentError(String);

impl fmt::Display for ParseDocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid document encoding: {}", self.0)
    }
}

impl std::error::Error for ParseDocumentError {}

impl FromStr for SearchDocument {
    type Err = ParseDocumentError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut terms = Vec::new();
        for entry in s.split_whitespace() {
            let (lexeme, positions) = entry
                .rsplit_once(':')
                .ok_or_else(|| ParseDocumentError(format!("missing positions in '{}'", entry)))?;
            if lexeme.is_empty() {
                return Err(ParseDocumentError(format!("empty lexeme in '{}'", entry)));
            }
            for occurrence in positions.split(',') {
                let weight_char = occurrence
                    .chars()
                    .last()
                    .ok_or_else(|| ParseDocumentError(format!("empty position in '{}'", entry)))?;
                let weight = WeightClass::from_char(weight_char).ok_or_else(|| {
                    ParseDocumentError(format!("unknown weight '{}' in '{}'", weight_char, entry))
                })?;
                let position: u32 = occurrence[..occurrence.len() - 1]
                    .parse()
                    .map_err(|_| ParseDocumentError(format!("bad position in '{}'", entry)))?;
                terms.push(Term {
                    lexeme: lexeme.to_string(),
                    position,
                    weight,
                });
            }
        }
        terms.sort_by_key(|t| t.position);
        Ok(Self { terms })
    }
}

/// Outcome of building one dialog's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltDocument {
    pub document: SearchDocument,
    /// Set when a limit stopped the fragment stream early.
    pub truncated: bool,
    pub fragments_read: usize,
}

/// Collects fragments for one dialog until a limit is reached.
pub struct DocumentAccumulator {
    max_terms: usize,
    max_bytes: usize,
    groups: BTreeMap<String, Vec<(String, WeightClass)>>,
    accepted: usize,
    buffered_bytes: usize,
    fragments_read: usize,
    truncated: bool,
    error: Option<BuildError>,
}

impl DocumentAccumulator {
    /// Feed one fragment. Returns `Break` once nothing more will be accepted.
    pub fn accept(&mut self, fragment: ContentFragment) -> ControlFlow<()> {
        let index = self.fragments_read;
        self.fragments_read += 1;

        if fragment.text.contains('\0') {
            self.error = Some(BuildError::MalformedText { index });
            return ControlFlow::Break(());
        }

        let language = fragment.language.as_deref();
        let profile = analyzer::profile_for(language);
        let group = self
            .groups
            .entry(language.and_then(normalize_tag).unwrap_or_default())
            .or_default();

        for lexeme in profile.tokenize(&fragment.text) {
            if self.accepted >= self.max_terms
                || self.buffered_bytes + lexeme.len() > self.max_bytes
            {
                self.truncated = true;
                return ControlFlow::Break(());
            }
            self.accepted += 1;
            self.buffered_bytes += lexeme.len();
            group.push((lexeme, fragment.weight));
        }

        ControlFlow::Continue(())
    }

    /// Concatenate the per-language partial documents in tag order.
    pub fn finish(self) -> std::result::Result<BuiltDocument, BuildError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut terms = Vec::with_capacity(self.accepted);
        for (lexeme, weight) in self.groups.into_values().flatten() {
            terms.push(Term {
                lexeme,
                position: terms.len() as u32 + 1,
                weight,
            });
        }

        Ok(BuiltDocument {
            document: SearchDocument { terms },
            truncated: self.truncated,
            fragments_read: self.fragments_read,
        })
    }
}

/// Lexeme bytes one document may hold by default.
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct DocumentBuilder {
    max_terms: usize,
    max_bytes: usize,
}

impl DocumentBuilder {
    pub fn new(max_terms: usize) -> Self {
        Self {
            max_terms,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn max_terms(&self) -> usize {
        self.max_terms
    }

    /// Upper bound on the lexeme bytes buffered for one document.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn accumulator(&self) -> DocumentAccumulator {
        DocumentAccumulator {
            max_terms: self.max_terms,
            max_bytes: self.max_bytes,
            groups: BTreeMap::new(),
            accepted: 0,
            buffered_bytes: 0,
            fragments_read: 0,
            truncated: false,
            error: None,
        }
    }

    /// Build from an in-memory fragment list.
    pub fn build_from<I>(&self, fragments: I) -> std::result::Result<BuiltDocument, BuildError>
    where
        I: IntoIterator<Item = ContentFragment>,
    {
        let mut acc = self.accumulator();
        for fragment in fragments {
            if acc.accept(fragment).is_break() {
                break;
            }
        }
        acc.finish()
    }

    /// Stream a dialog's fragments from `source` and build its document.
    pub async fn build(
        &self,
        source: &dyn ContentSource,
        dialog_id: &DialogId,
    ) -> Result<BuiltDocument> {
        let mut acc = self.accumulator();
        source
            .for_each_fragment(dialog_id, &mut |fragment: ContentFragment| {
                acc.accept(fragment)
            })
            .await?;
        acc.finish().map_err(|source| ReindexError::Build {
            dialog_id: *dialog_id,
            source,
        })
    }
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(weight: WeightClass, lang: Option<&str>, text: &str) -> ContentFragment {
        ContentFragment::new(weight, lang, text)
    }

    #[test]
    fn empty_input_builds_empty_document() {
        let built = DocumentBuilder::default()
            .build_from(Vec::new())
            .unwrap();
        assert!(built.document.is_empty());
        assert!(!built.truncated);
        assert_eq!(built.document.to_string(), "");
    }

    #[test]
    fn groups_by_language_in_tag_order() {
        let built = DocumentBuilder::default()
            .build_from(vec![
                frag(WeightClass::Primary, Some("nb"), "Skattemelding"),
                frag(WeightClass::Primary, Some("en"), "Tax return"),
                frag(WeightClass::Detail, Some("nb"), "Vedlegg"),
            ])
            .unwrap();

        let lexemes: Vec<&str> = built
            .document
            .terms()
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect();
        assert_eq!(lexemes, vec!["tax", "return", "skattemelding", "vedlegg"]);
        assert_eq!(built.document.terms()[3].weight, WeightClass::Detail);
        assert_eq!(built.document.terms()[3].position, 4);
    }

    #[test]
    fn encoding_groups_positions_per_lexeme() {
        let built = DocumentBuilder::default()
            .build_from(vec![
                frag(WeightClass::Primary, Some("en"), "hello world"),
                frag(WeightClass::Detail, Some("en"), "hello again"),
            ])
            .unwrap();
        assert_eq!(
            built.document.to_string(),
            "again:4C hello:1A,3C world:2A"
        );

        let parsed: SearchDocument = built.document.to_string().parse().unwrap();
        assert_eq!(parsed, built.document);
    }

    #[test]
    fn matches_requires_every_query_lexeme() {
        let doc = DocumentBuilder::default()
            .build_from(vec![frag(WeightClass::Primary, Some("en"), "hello world")])
            .unwrap()
            .document;
        assert!(doc.matches("hello"));
        assert!(doc.matches("World HELLO"));
        assert!(!doc.matches("xyzzy"));
        assert!(!doc.matches("hello xyzzy"));
        assert!(!doc.matches("  "));
    }

    #[test]
    fn caps_terms_deterministically() {
        let text = (0..500)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let builder = DocumentBuilder::new(100);
        let first = builder
            .build_from(vec![frag(WeightClass::Secondary, None, &text)])
            .unwrap();
        let second = builder
            .build_from(vec![frag(WeightClass::Secondary, None, &text)])
            .unwrap();

        assert_eq!(first.document.len(), 100);
        assert!(first.truncated);
        assert_eq!(first.document, second.document);
        assert_eq!(first.document.terms()[99].lexeme, "word99");
    }

    #[test]
    fn byte_limit_stops_the_stream() {
        let built = DocumentBuilder::default()
            .with_max_bytes(10)
            .build_from(vec![
                frag(WeightClass::Primary, None, "aaaa bbbb"),
                frag(WeightClass::Detail, None, "cccc dddd"),
            ])
            .unwrap();
        assert_eq!(built.document.to_string(), "aaaa:1A bbbb:2A");
        assert!(built.truncated);
        assert_eq!(built.fragments_read, 2);
    }

    #[test]
    fn nul_characters_fail_the_build() {
        let err = DocumentBuilder::default()
            .build_from(vec![
                frag(WeightClass::Primary, None, "fine"),
                frag(WeightClass::Detail, None, "bro\0ken"),
            ])
            .unwrap_err();
        assert_eq!(err, BuildError::MalformedText { index: 1 });
    }

    #[test]
    fn column_text_splits_by_weight() {
        let doc = DocumentBuilder::default()
            .build_from(vec![
                frag(WeightClass::Primary, None, "title words"),
                frag(WeightClass::Detail, None, "attachment.pdf"),
            ])
            .unwrap()
            .document;
        assert_eq!(doc.column_text(WeightClass::Primary), "title words");
        assert_eq!(doc.column_text(WeightClass::Secondary), "");
        assert_eq!(doc.column_text(WeightClass::Detail), "attachment pdf");
    }

    #[test]
    fn rejects_malformed_encoding() {
        assert!("hello".parse::<SearchDocument>().is_err());
        assert!("hello:1Z".parse::<SearchDocument>().is_err());
        assert!("hello:xA".parse::<SearchDocument>().is_err());
        assert!(":1A".parse::<SearchDocument>().is_err());
    }
}
