//! Minimal RDF graph model
//!
//! No syntax is parsed or produced here. A [`Graph`] is an ordered list of
//! [`Triple`]s whose subjects and URI objects are resource identifiers or
//! external URIs, compared as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `ldp:contains`
pub const LDP_CONTAINS: &str = "http://www.w3.org/ns/ldp#contains";
/// `memento:mementoDatetime`
pub const MEMENTO_DATETIME: &str = "http://mementoweb.org/ns#mementoDatetime";
/// `fedora:created`
pub const FEDORA_CREATED: &str = "http://fedora.info/definitions/v4/repository#created";
/// `dcterms:title`, handy for fixtures
pub const DC_TITLE: &str = "http://purl.org/dc/terms/title";

/// Object position of a triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// Reference to a resource or external URI; no integrity is enforced
    Uri(String),
    /// Plain literal
    Literal(String),
}

impl Term {
    /// URI term
    pub fn uri(value: impl Into<String>) -> Self {
        Term::Uri(value.into())
    }

    /// Literal term
    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal(value.into())
    }

    /// Lexical value
    pub fn value(&self) -> &str {
        match self {
            Term::Uri(v) | Term::Literal(v) => v,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Uri(v) => write!(f, "<{}>", v),
            Term::Literal(v) => write!(f, "\"{}\"", v),
        }
    }
}

/// One statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    /// Subject URI
    pub subject: String,
    /// Predicate URI
    pub predicate: String,
    /// Object
    pub object: Term,
}

impl Triple {
    /// Build a triple
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> <{}> {} .", self.subject, self.predicate, self.object)
    }
}

/// Ordered set of triples
///
/// Insertion order is preserved and duplicates are dropped, so a graph read
/// back from storage compares equal to the one written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    triples: Vec<Triple>,
}

impl Graph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a triple unless already present
    pub fn insert(&mut self, triple: Triple) -> bool {
        if self.triples.contains(&triple) {
            return false;
        }
        self.triples.push(triple);
        true
    }

    /// Builder form of [`Graph::insert`]
    pub fn with(mut self, triple: Triple) -> Self {
        self.insert(triple);
        self
    }

    /// Whether the exact triple is present
    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    /// Whether any triple links `subject` to `object` through `predicate`
    pub fn has(&self, subject: &str, predicate: &str, object: &Term) -> bool {
        self.triples
            .iter()
            .any(|t| t.subject == subject && t.predicate == predicate && &t.object == object)
    }

    /// Objects of `(subject, predicate, ?)`
    pub fn objects<'a>(&'a self, subject: &'a str, predicate: &'a str) -> impl Iterator<Item = &'a Term> + 'a {
        self.triples
            .iter()
            .filter(move |t| t.subject == subject && t.predicate == predicate)
            .map(|t| &t.object)
    }

    /// Drop every triple with this predicate
    pub fn remove_predicate(&mut self, predicate: &str) {
        self.triples.retain(|t| t.predicate != predicate);
    }

    /// Append all triples of `other`
    pub fn extend(&mut self, other: Graph) {
        for t in other.triples {
            self.insert(t);
        }
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Triple> {
        self.triples.iter()
    }

    /// Number of triples
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    /// Whether empty
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

impl FromIterator<Triple> for Graph {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        let mut g = Graph::new();
        for t in iter {
            g.insert(t);
        }
        g
    }
}

impl IntoIterator for Graph {
    type Item = Triple;
    type IntoIter = std::vec::IntoIter<Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.into_iter()
    }
}

impl<'a> IntoIterator for &'a Graph {
    type Item = &'a Triple;
    type IntoIter = std::slice::Iter<'a, Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.iter()
    }
}
