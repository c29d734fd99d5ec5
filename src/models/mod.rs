// Knowledge base value objects

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::{KnowledgeError, Result};

/// Longest accepted title; leaves room for the `.json` suffix in a 255 byte filename
pub const MAX_TITLE_LEN: usize = 250;

/// Opaque label naming a subject area
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    #[inline]
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Topic {
    #[inline]
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    /// Empty when the document was reloaded from persisted metadata
    pub content: String,
    pub topic: Topic,
}

impl Document {
    #[inline]
    pub fn new(name: impl Into<String>, content: impl Into<String>, topic: impl Into<Topic>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            topic: topic.into(),
        }
    }
}

/// A named, independently searchable group of embedded documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub collection_id: u64,
    /// Unique per store; doubles as the vector index collection name
    pub title: String,
    pub documents: Vec<Document>,
    /// May hold topics that no uploaded document carries yet
    pub topics: BTreeSet<Topic>,
    /// Number of points uploaded; base offset for the next point id
    pub size: u64,
}

impl Collection {
    #[inline]
    pub fn new(collection_id: u64, title: impl Into<String>) -> Self {
        Self {
            collection_id,
            title: title.into(),
            documents: Vec::new(),
            topics: BTreeSet::new(),
            size: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_document(mut self, document: Document) -> Self {
        self.record_document(document);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<Topic>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    #[inline]
    pub fn has_document(&self, name: &str) -> bool {
        self.documents.iter().any(|d| d.name == name)
    }

    /// Append a document unless one with the same name is already recorded.
    /// Its topic joins the topic set either way. Returns whether it was appended.
    #[inline]
    pub fn record_document(&mut self, document: Document) -> bool {
        self.topics.insert(document.topic.clone());
        if self.has_document(&document.name) {
            return false;
        }
        self.documents.push(document);
        true
    }
}

/// Titles name both a remote collection and a local file, so they are kept to
/// ASCII alphanumerics, `-` and `_`
#[inline]
pub fn validate_title(title: &str) -> Result<()> {
    if title.is_empty() {
        return Err(KnowledgeError::InvalidTitle("title cannot be empty".to_string()));
    }

    if title.len() > MAX_TITLE_LEN {
        return Err(KnowledgeError::InvalidTitle(format!(
            "'{}' is longer than {} characters",
            title, MAX_TITLE_LEN
        )));
    }

    if let Some(bad) = title
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(KnowledgeError::InvalidTitle(format!(
            "'{}' contains unsupported character {:?}",
            title, bad
        )));
    }

    Ok(())
}
