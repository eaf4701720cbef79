//! Indexed documents and their type tags.

use serde::{Deserialize, Serialize};

use crate::vector::VectorId;

/// Content class of a document.
///
/// Source files are `code`; the assistant also stores conversational
/// snippets. Any other tag is accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocType(String);

impl DocType {
    pub const CODE: &'static str = "code";
    pub const CONVERSATION: &'static str = "conversation";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn code() -> Self {
        Self::new(Self::CODE)
    }

    #[must_use]
    pub fn conversation() -> Self {
        Self::new(Self::CONVERSATION)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocType {
    fn default() -> Self {
        Self::code()
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for DocType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// One live entry of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,

    /// Row label inside the index structure
    pub vector_id: VectorId,

    pub embedding: Vec<f32>,

    /// Digest of the indexed content, absent for caller-supplied embeddings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    #[serde(default)]
    pub doc_type: DocType,

    /// Last-indexed time, UTC seconds
    pub timestamp: u64,
}
